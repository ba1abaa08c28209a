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
//! Integration tests for work sharing through merge sets.

use std::sync::Arc;

use crate::common::{
    TIMEOUT, decode_key, drain, drain_concurrently, key_rows, packet, run_plan,
    run_with_timeout, shared_scan_packet, test_dispatcher, wait_for,
};
use qpipe::exec::functors::{FnFilter, Joiner, PassThroughFilter};
use qpipe::exec::operators::{TupleSource, VecSource};
use qpipe::{EngineError, Packet, PacketPayload, StageKind, Tuple, TupleBuffer};

mod common;

fn lineitem(n: u32) -> Arc<dyn TupleSource> {
    Arc::new(VecSource::new(key_rows(&(0..n).collect::<Vec<_>>())))
}

fn keys(rows: &[Tuple]) -> Vec<u32> {
    rows.iter().map(decode_key).collect()
}

#[test]
fn test_merged_packets_share_one_execution() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let source = lineitem(500);
    let packets: Vec<_> = (0..4)
        .map(|i| {
            shared_scan_packet(
                &format!("scan_{i}"),
                Arc::clone(&source),
                Arc::new(PassThroughFilter),
                "lineitem",
            )
        })
        .collect();
    for p in &packets {
        let qs = dispatcher.query_state_create();
        dispatcher.dispatch_packet(p, &qs).unwrap();
    }
    assert_eq!(scan.queue_len(), 1);
    assert_eq!(packets[0].merged_count(), 3);
    scan.resume();

    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&packets));
    let expected: Vec<u32> = (0..500).collect();
    for result in results {
        assert_eq!(keys(&assert_ok!(result)), expected);
    }

    let stats = scan.stats();
    assert_eq!(stats.enqueued, 4);
    assert_eq!(stats.merged, 3);
    assert_eq!(stats.processed, 1);
    dispatcher.shutdown();
}

#[test]
fn test_late_arrival_gets_independent_execution() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    let source = lineitem(1_000);

    let first = Arc::new(
        Packet::create(
            "first",
            TupleBuffer::with_capacity(0, 2),
            Arc::new(PassThroughFilter),
            PacketPayload::Scan {
                source: Arc::clone(&source),
            },
            true,
        )
        .with_signature("lineitem"),
    );
    let qs = dispatcher.query_state_create();
    dispatcher.dispatch_packet(&first, &qs).unwrap();
    assert!(wait_for(
        || !first.is_mergeable() && first.output_buffer().len() == 2,
        TIMEOUT
    ));

    let late = shared_scan_packet(
        "late",
        Arc::clone(&source),
        Arc::new(PassThroughFilter),
        "lineitem",
    );
    assert_eq!(
        first.try_merge(Arc::clone(&late)),
        Err(EngineError::NotMergeable("first".to_string()))
    );
    dispatcher
        .dispatch_packet(&late, &dispatcher.query_state_create())
        .unwrap();

    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&[first, late]));
    for result in results {
        assert_eq!(assert_ok!(result).len(), 1_000);
    }
    assert!(wait_for(|| scan.stats().processed == 2, TIMEOUT));
    assert_eq!(scan.stats().merged, 0);
    dispatcher.shutdown();
}

#[test]
fn test_each_member_applies_its_own_filter() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let source = lineitem(100);
    let all = shared_scan_packet(
        "all",
        Arc::clone(&source),
        Arc::new(PassThroughFilter),
        "lineitem",
    );
    let even = shared_scan_packet(
        "even",
        Arc::clone(&source),
        Arc::new(FnFilter::selecting(|t: &Tuple| decode_key(t) % 2 == 0)),
        "lineitem",
    );
    for p in [&all, &even] {
        dispatcher
            .dispatch_packet(p, &dispatcher.query_state_create())
            .unwrap();
    }
    scan.resume();

    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&[all, even]));
    assert_eq!(keys(results[0].as_ref().unwrap()).len(), 100);
    assert_eq!(
        keys(results[1].as_ref().unwrap()),
        (0..100).filter(|k| k % 2 == 0).collect::<Vec<u32>>()
    );
    assert_eq!(scan.stats().processed, 1);
    dispatcher.shutdown();
}

#[test]
fn test_different_signatures_are_not_merged() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let a = shared_scan_packet("a", lineitem(10), Arc::new(PassThroughFilter), "lineitem");
    let b = shared_scan_packet("b", lineitem(10), Arc::new(PassThroughFilter), "orders");
    let c = Arc::new(
        Packet::create(
            "c",
            TupleBuffer::new(0),
            Arc::new(PassThroughFilter),
            PacketPayload::Scan {
                source: lineitem(10),
            },
            false,
        )
        .with_signature("lineitem"),
    );
    for p in [&a, &b, &c] {
        dispatcher
            .dispatch_packet(p, &dispatcher.query_state_create())
            .unwrap();
    }
    assert_eq!(scan.queue_len(), 3);
    scan.resume();

    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&[a, b, c]));
    for result in results {
        assert_eq!(assert_ok!(result).len(), 10);
    }
    assert!(wait_for(|| scan.stats().processed == 3, TIMEOUT));
    dispatcher.shutdown();
}

#[test]
fn test_caller_merge_feeds_every_member() {
    let dispatcher = test_dispatcher();
    let source = lineitem(50);
    let owner = Arc::new(Packet::create(
        "owner",
        TupleBuffer::new(0),
        Arc::new(PassThroughFilter),
        PacketPayload::Scan {
            source: Arc::clone(&source),
        },
        true,
    ));
    let sibling = Arc::new(Packet::create(
        "sibling",
        TupleBuffer::new(0),
        Arc::new(PassThroughFilter),
        PacketPayload::Scan { source },
        true,
    ));
    owner.merge(Arc::clone(&sibling));

    let qs = dispatcher.query_state_create();
    dispatcher.dispatch_packet(&owner, &qs).unwrap();
    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&[owner, sibling]));
    let a = assert_ok!(results[0].clone());
    let b = assert_ok!(results[1].clone());
    assert_eq!(a.len(), 50);
    assert_eq!(a, b);
    dispatcher.shutdown();
}

#[test]
fn test_one_member_leaving_does_not_stop_the_others() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let source = lineitem(300);
    let stays = shared_scan_packet(
        "stays",
        Arc::clone(&source),
        Arc::new(PassThroughFilter),
        "lineitem",
    );
    let leaves = shared_scan_packet("leaves", source, Arc::new(PassThroughFilter), "lineitem");
    for p in [&stays, &leaves] {
        dispatcher
            .dispatch_packet(p, &dispatcher.query_state_create())
            .unwrap();
    }
    leaves.output_buffer().close();
    scan.resume();

    let rows = run_with_timeout(TIMEOUT, move || drain(&stays));
    assert_eq!(keys(&assert_ok!(rows)), (0..300).collect::<Vec<u32>>());
    assert!(wait_for(|| scan.stats().processed == 1, TIMEOUT));
    assert_eq!(scan.stats().failed, 0);
    dispatcher.shutdown();
}

#[test]
fn test_packets_of_one_query_are_not_merged() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let source = lineitem(20);
    let packets: Vec<_> = (0..3)
        .map(|i| {
            shared_scan_packet(
                &format!("scan_{i}"),
                Arc::clone(&source),
                Arc::new(PassThroughFilter),
                "lineitem",
            )
        })
        .collect();
    let qs = dispatcher.query_state_create();
    dispatcher.dispatch_packet(&packets[0], &qs).unwrap();
    dispatcher.dispatch_packet(&packets[1], &qs).unwrap();
    assert_eq!(scan.queue_len(), 2);
    assert_eq!(scan.stats().merged, 0);

    let other = dispatcher.query_state_create();
    dispatcher.dispatch_packet(&packets[2], &other).unwrap();
    assert_eq!(scan.queue_len(), 2);
    assert_eq!(scan.stats().merged, 1);
    scan.resume();

    let results = run_with_timeout(TIMEOUT, move || drain_concurrently(&packets));
    for result in results {
        assert_eq!(assert_ok!(result).len(), 20);
    }
    dispatcher.shutdown();
}

#[test]
fn test_self_join_over_shared_scans_completes() {
    let dispatcher = test_dispatcher();
    let scan = dispatcher.container(StageKind::Scan).unwrap();
    scan.pause();

    let source = lineitem(50);
    let side = |id: &str| {
        Arc::new(
            Packet::create(
                id,
                TupleBuffer::with_capacity(0, 4),
                Arc::new(PassThroughFilter),
                PacketPayload::Scan {
                    source: Arc::clone(&source),
                },
                true,
            )
            .with_signature("t"),
        )
    };
    let joiner: Arc<dyn Joiner> = Arc::new(|o: &Tuple, i: &Tuple| -> Option<Tuple> {
        (decode_key(o) == decode_key(i)).then(|| {
            let mut row = o.to_vec();
            row.extend_from_slice(i);
            Tuple::from_vec(row)
        })
    });
    let root = packet(
        "self_join",
        PacketPayload::Join {
            outer: side("outer"),
            inner: side("inner"),
            joiner,
        },
    );

    let plan = {
        let dispatcher = Arc::clone(&dispatcher);
        let root = Arc::clone(&root);
        std::thread::spawn(move || run_plan(&dispatcher, &root))
    };
    assert!(wait_for(|| scan.queue_len() == 1, TIMEOUT));
    scan.resume();

    let result = run_with_timeout(TIMEOUT, move || plan.join().expect("plan thread"));
    let rows = assert_ok!(result);
    let pairs: Vec<(u32, u32)> = rows
        .iter()
        .map(|t| (decode_key(t), decode_key(&Tuple::copy_from_slice(&t[4..8]))))
        .collect();
    assert_eq!(pairs, (0..50).map(|k| (k, k)).collect::<Vec<_>>());

    assert!(wait_for(|| scan.stats().processed == 2, TIMEOUT));
    assert_eq!(scan.stats().merged, 0);
    dispatcher.shutdown();
}
