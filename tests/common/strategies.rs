//! Proptest strategies for registry tests.

#![allow(dead_code)]

use proptest::prelude::*;

#[derive(Debug, Clone)]
pub enum LockOp {
    Acquire(usize),
    Drop(usize),
}

/// Resource ids drawn from a small pool so collisions are frequent
pub fn resource_id_strategy(pool: usize) -> impl Strategy<Value = usize> {
    0..pool
}

pub fn lock_op_strategy(pool: usize) -> impl Strategy<Value = LockOp> {
    prop_oneof![
        3 => resource_id_strategy(pool).prop_map(LockOp::Acquire),
        2 => resource_id_strategy(pool).prop_map(LockOp::Drop),
    ]
}

pub fn lock_ops_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<LockOp>> {
    prop::collection::vec(lock_op_strategy(pool), 1..max_len)
}
