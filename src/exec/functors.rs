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
//! Capability interfaces supplied by query-construction callers.
//!
//! Stages are generic over these small traits, never over concrete strategy types:
//! - `TupleFilter`: selection and projection applied on a stage's output.
//! - `KeyExtractor`: locates the grouping key inside a tuple.
//! - `Aggregator`: init / accumulate / finalize over a byte accumulator.
//! - `Joiner`: combines an outer and an inner tuple when the join predicate holds.
//! - `TupleComparator`: total order used by the sort stage.

use std::cmp::Ordering;

use crate::common::types::Tuple;

/// Selection/projection applied to every tuple a stage emits for one packet.
pub trait TupleFilter: Send + Sync {
    fn select(&self, tuple: &Tuple) -> bool {
        let _ = tuple;
        true
    }

    fn project(&self, src: &Tuple) -> Tuple {
        src.clone()
    }
}

/// Filter that lets every tuple through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughFilter;

impl TupleFilter for PassThroughFilter {}

/// Filter built from closures.
pub struct FnFilter<S, P> {
    select: S,
    project: P,
}

impl<S> FnFilter<S, fn(&Tuple) -> Tuple>
where
    S: Fn(&Tuple) -> bool + Send + Sync,
{
    pub fn selecting(select: S) -> Self {
        Self {
            select,
            project: Tuple::clone,
        }
    }
}

impl<S, P> FnFilter<S, P>
where
    S: Fn(&Tuple) -> bool + Send + Sync,
    P: Fn(&Tuple) -> Tuple + Send + Sync,
{
    pub fn new(select: S, project: P) -> Self {
        Self { select, project }
    }
}

impl<S, P> TupleFilter for FnFilter<S, P>
where
    S: Fn(&Tuple) -> bool + Send + Sync,
    P: Fn(&Tuple) -> Tuple + Send + Sync,
{
    fn select(&self, tuple: &Tuple) -> bool {
        (self.select)(tuple)
    }

    fn project(&self, src: &Tuple) -> Tuple {
        (self.project)(src)
    }
}

/// Locates the grouping key.
///
/// Callers must pass tuples of at least `min_tuple_len()` bytes; `extract_key` may
/// panic on shorter ones. The aggregate stage checks the length first and fails the
/// execution with `TupleSizeMismatch`.
pub trait KeyExtractor: Send + Sync {
    /// Number of key bytes compared on group break. Zero means one global group.
    fn key_size(&self) -> usize;

    /// Shortest tuple the key can be extracted from.
    fn min_tuple_len(&self) -> usize {
        self.key_size()
    }

    /// Returns exactly `key_size()` bytes of `tuple`.
    fn extract_key<'a>(&self, tuple: &'a [u8]) -> &'a [u8];
}

/// Key stored contiguously at `offset..offset + size`.
#[derive(Clone, Copy, Debug)]
pub struct PrefixKey {
    pub offset: usize,
    pub size: usize,
}

impl PrefixKey {
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// Degenerate key: the whole input forms one group.
    pub fn global() -> Self {
        Self { offset: 0, size: 0 }
    }
}

impl KeyExtractor for PrefixKey {
    fn key_size(&self) -> usize {
        self.size
    }

    fn min_tuple_len(&self) -> usize {
        self.offset + self.size
    }

    fn extract_key<'a>(&self, tuple: &'a [u8]) -> &'a [u8] {
        &tuple[self.offset..self.offset + self.size]
    }
}

/// Group-at-a-time aggregation over a fixed-size byte accumulator.
pub trait Aggregator: Send + Sync {
    /// Size in bytes of the accumulator the stage allocates once per execution.
    fn accumulator_size(&self) -> usize;

    /// Resets `acc` for a new group whose key is `key`.
    fn init(&self, acc: &mut [u8], key: &[u8]);

    fn accumulate(&self, acc: &mut [u8], tuple: &Tuple);

    /// Produces the output row of the group held in `acc`.
    fn finalize(&self, acc: &[u8]) -> Tuple;
}

/// `COUNT(*)` per group. Output row: key bytes followed by a little-endian `u64` count.
#[derive(Clone, Copy, Debug)]
pub struct CountAggregator {
    key_size: usize,
}

impl CountAggregator {
    pub fn new(key_size: usize) -> Self {
        Self { key_size }
    }
}

impl Aggregator for CountAggregator {
    fn accumulator_size(&self) -> usize {
        self.key_size + 8
    }

    fn init(&self, acc: &mut [u8], key: &[u8]) {
        acc[..self.key_size].copy_from_slice(key);
        acc[self.key_size..].fill(0);
    }

    fn accumulate(&self, acc: &mut [u8], _tuple: &Tuple) {
        let slot = self.key_size..self.key_size + 8;
        let mut count = [0u8; 8];
        count.copy_from_slice(&acc[slot.clone()]);
        acc[slot].copy_from_slice(&(u64::from_le_bytes(count) + 1).to_le_bytes());
    }

    fn finalize(&self, acc: &[u8]) -> Tuple {
        Tuple::copy_from_slice(acc)
    }
}

pub trait Joiner: Send + Sync {
    /// Composite tuple when `outer` and `inner` satisfy the join predicate.
    fn join(&self, outer: &Tuple, inner: &Tuple) -> Option<Tuple>;
}

impl<F> Joiner for F
where
    F: Fn(&Tuple, &Tuple) -> Option<Tuple> + Send + Sync,
{
    fn join(&self, outer: &Tuple, inner: &Tuple) -> Option<Tuple> {
        self(outer, inner)
    }
}

/// Total order for the sort stage. Must not panic on any tuple it is handed.
pub trait TupleComparator: Send + Sync {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering;
}

/// Lexicographic byte order over `offset..offset + size` (whole tuple if `size == 0`).
///
/// The range is clipped to the tuple, so a short tuple compares by the bytes it has
/// and orders before any longer tuple sharing them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByteComparator {
    pub offset: usize,
    pub size: usize,
}

impl ByteComparator {
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    fn slice<'a>(&self, t: &'a Tuple) -> &'a [u8] {
        let start = self.offset.min(t.len());
        let end = if self.size == 0 {
            t.len()
        } else {
            (self.offset + self.size).min(t.len())
        };
        &t[start..end]
    }
}

impl TupleComparator for ByteComparator {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        self.slice(a).cmp(self.slice(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_aggregator_counts_group_rows() {
        let agg = CountAggregator::new(2);
        let mut acc = vec![0u8; agg.accumulator_size()];
        agg.init(&mut acc, &[7, 9]);
        for _ in 0..3 {
            agg.accumulate(&mut acc, &Tuple::from_vec(vec![7, 9, 1]));
        }
        let out = agg.finalize(&acc);
        assert_eq!(&out[..2], &[7, 9]);
        assert_eq!(u64::from_le_bytes(out[2..10].try_into().unwrap()), 3);
    }

    #[test]
    fn prefix_key_global_is_empty() {
        let key = PrefixKey::global();
        assert_eq!(key.key_size(), 0);
        assert!(key.extract_key(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn fn_filter_selects_and_projects() {
        let filter = FnFilter::new(
            |t: &Tuple| t[0] > 1,
            |t: &Tuple| Tuple::copy_from_slice(&t[..1]),
        );
        let t = Tuple::from_vec(vec![5, 6]);
        assert!(filter.select(&t));
        assert_eq!(filter.project(&t).as_bytes(), &[5]);
        assert!(!filter.select(&Tuple::from_vec(vec![0, 6])));
    }

    #[test]
    fn byte_comparator_orders_key_range() {
        let cmp = ByteComparator::new(1, 1);
        let a = Tuple::from_vec(vec![9, 1]);
        let b = Tuple::from_vec(vec![0, 2]);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn byte_comparator_clips_short_tuples() {
        let cmp = ByteComparator::new(1, 4);
        let short = Tuple::from_vec(vec![0, 3]);
        let full = Tuple::from_vec(vec![0, 3, 0, 0, 0]);
        let empty = Tuple::empty();
        assert_eq!(cmp.compare(&short, &full), Ordering::Less);
        assert_eq!(cmp.compare(&empty, &short), Ordering::Less);
        assert_eq!(cmp.compare(&empty, &empty), Ordering::Equal);
    }

    #[test]
    fn prefix_key_reports_required_length() {
        assert_eq!(PrefixKey::new(2, 4).min_tuple_len(), 6);
        assert_eq!(PrefixKey::global().min_tuple_len(), 0);
    }
}
