// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation ID generation
//!
//! IDs double as the recency ordering of the log, so they must be
//! process-unique and monotonically sortable.

use crate::operation::OperationId;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Number of low bits reserved for same-millisecond sequencing
const SEQ_BITS: i64 = 10;

/// Generates unique, monotonically increasing operation IDs
pub trait OpIdGen: Send + Sync {
    fn next(&self) -> OperationId;
}

/// Wall-clock-seeded ID generator for production use
///
/// IDs are `unix_millis << 10` with the low bits absorbing bursts within a
/// millisecond; a clock stepping backwards still yields increasing IDs.
#[derive(Clone, Default)]
pub struct ClockIdGen {
    last: Arc<AtomicI64>,
}

impl ClockIdGen {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpIdGen for ClockIdGen {
    fn next(&self) -> OperationId {
        let candidate = Utc::now().timestamp_millis() << SEQ_BITS;
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = candidate.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return OperationId(next),
                Err(observed) => last = observed,
            }
        }
    }
}

/// Sequential ID generator for testing
#[derive(Clone)]
pub struct SequentialIdGen {
    counter: Arc<AtomicI64>,
}

impl SequentialIdGen {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Start counting from the given ID
    pub fn starting_at(first: i64) -> Self {
        Self {
            counter: Arc::new(AtomicI64::new(first - 1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new()
    }
}

impl OpIdGen for SequentialIdGen {
    fn next(&self) -> OperationId {
        OperationId(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_gen_creates_strictly_increasing_ids() {
        let id_gen = ClockIdGen::new();
        let mut prev = id_gen.next();
        for _ in 0..1000 {
            let next = id_gen.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn clock_gen_is_shared_across_clones() {
        let id_gen1 = ClockIdGen::new();
        let id_gen2 = id_gen1.clone();
        let a = id_gen1.next();
        let b = id_gen2.next();
        assert!(b > a);
    }

    #[test]
    fn sequential_gen_creates_predictable_ids() {
        let id_gen = SequentialIdGen::new();
        assert_eq!(id_gen.next(), OperationId(1));
        assert_eq!(id_gen.next(), OperationId(2));
        assert_eq!(id_gen.next(), OperationId(3));
    }

    #[test]
    fn sequential_gen_starting_at_offsets_the_counter() {
        let id_gen = SequentialIdGen::starting_at(100);
        assert_eq!(id_gen.next(), OperationId(100));
        assert_eq!(id_gen.next(), OperationId(101));
    }
}
