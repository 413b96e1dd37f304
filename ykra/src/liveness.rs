//! Live range analysis.
//!
//! For every value in a trace, [LiveRanges] records the op that defines it (formal arguments are
//! defined by op 0) and every op that uses it. A guard uses both its operands and its liveboxes,
//! since the latter must be recoverable if the guard fails. A value that is never used has a last
//! use equal to its definition.

use crate::trace::{OpIdx, Trace, VarIdx};
use index_vec::IndexVec;

pub struct LiveRanges {
    /// The op that defines each value.
    defs: IndexVec<VarIdx, OpIdx>,
    /// The ops that use each value, in ascending order without duplicates.
    uses: IndexVec<VarIdx, Vec<OpIdx>>,
}

impl LiveRanges {
    pub fn new(trace: &Trace) -> Self {
        let mut defs = IndexVec::from_vec(vec![OpIdx::new(0); trace.vars_len()]);
        let mut uses = IndexVec::from_vec(vec![Vec::new(); trace.vars_len()]);
        for (idx, op) in trace.ops() {
            if idx == OpIdx::new(0) {
                // The merge point defines the formal arguments, which `defs` already accounts
                // for.
                continue;
            }
            for v in op.arg_vars().chain(op.liveboxes().iter().copied()) {
                let vuses: &mut Vec<OpIdx> = &mut uses[v];
                if vuses.last() != Some(&idx) {
                    vuses.push(idx);
                }
            }
            if let Some(v) = op.result() {
                defs[v] = idx;
            }
        }
        Self { defs, uses }
    }

    /// The op that defines `v`.
    pub fn def(&self, v: VarIdx) -> OpIdx {
        self.defs[v]
    }

    /// The last op that uses `v`, or `v`'s definition if it is never used.
    pub fn last_use(&self, v: VarIdx) -> OpIdx {
        self.uses[v].last().copied().unwrap_or(self.defs[v])
    }

    /// Is `v` still needed after op `cur`?
    pub fn is_used_after(&self, cur: OpIdx, v: VarIdx) -> bool {
        self.last_use(v) > cur
    }

    /// The first op after `cur` that uses `v`, if there is one.
    pub fn next_use(&self, cur: OpIdx, v: VarIdx) -> Option<OpIdx> {
        let vuses = &self.uses[v];
        vuses.get(vuses.partition_point(|x| *x <= cur)).copied()
    }
}
