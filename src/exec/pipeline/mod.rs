// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Pipelined execution engine core.
//!
//! Responsibilities:
//! - Bounded tuple channels between producer and consumer stages.
//! - Packets with merge sets, stage containers with worker pools, and the
//!   dispatcher that routes packets by operator type.
//! - CPU assignment policies.

pub mod dispatcher;
pub mod packet;
pub mod schedule;
pub mod stage;
pub mod stage_container;
pub mod tuple_buffer;
