//! Check that a [Trace] is well-formed.
//!
//! The location assigner assumes that the properties checked here hold: if they don't, it may
//! produce nonsensical locations rather than fail cleanly. The properties are:
//!
//!   1. Op 0 is a merge point whose operands are distinct values.
//!   2. The last op is a jump or a finish, and there are no other merge points, jumps, or
//!      finishes.
//!   3. Every op has the number of operands, the descriptor, and the result its opcode requires.
//!   4. Only guards have liveboxes, and a guard's liveboxes are distinct.
//!   5. Every value is defined exactly once, before it is used.

use super::{Defines, Descr, OpIdx, OpKind, Trace};
use crate::compile::CompilationError;
use vob::Vob;

impl Trace {
    pub fn check_well_formed(&self) -> Result<(), CompilationError> {
        let err = |idx: OpIdx, msg: String| {
            Err(CompilationError::InternalError(format!(
                "trace is not well formed at op {idx}: {msg}"
            )))
        };

        let mut defined = Vob::from_elem(false, self.vars_len());
        let last = match self.ops_len().checked_sub(1) {
            Some(x) => OpIdx::new(x),
            None => {
                return Err(CompilationError::InternalError(
                    "trace is not well formed: it has no ops".into(),
                ))
            }
        };

        for (idx, op) in self.ops() {
            let kind = op.kind();
            if idx == OpIdx::new(0) {
                if kind != OpKind::MergePoint {
                    return err(idx, format!("expected merge_point, found {kind}"));
                }
                for x in op.args() {
                    match x.as_var() {
                        Some(v) => {
                            if defined.get(v.index()) == Some(true) {
                                return err(
                                    idx,
                                    format!("{} appears more than once", self.var(v).name()),
                                );
                            }
                            defined.set(v.index(), true);
                        }
                        None => return err(idx, "formal arguments can't be constants".into()),
                    }
                }
                continue;
            }

            match kind {
                OpKind::MergePoint => return err(idx, "merge_point can only start a trace".into()),
                OpKind::Jump | OpKind::Finish if idx != last => {
                    return err(idx, format!("{kind} can only end a trace"))
                }
                _ if idx == last && kind != OpKind::Jump && kind != OpKind::Finish => {
                    return err(idx, format!("trace must end in jump or finish, not {kind}"))
                }
                _ => (),
            }

            match kind.arity() {
                Some(n) if n != op.args().len() => {
                    return err(
                        idx,
                        format!("{kind} takes {n} operands, but has {}", op.args().len()),
                    )
                }
                None if kind == OpKind::Call && op.args().is_empty() => {
                    return err(idx, "call needs a target".into())
                }
                _ => (),
            }

            match (kind.wants_field_descr(), op.descr()) {
                (None, None)
                | (Some(true), Some(Descr::Field { .. }))
                | (Some(false), Some(Descr::Array { .. })) => (),
                (None, Some(_)) => return err(idx, format!("{kind} doesn't take a descr")),
                (Some(_), _) => return err(idx, format!("{kind} has a missing or wrong descr")),
            }

            match (kind.defines(), op.result()) {
                (Defines::Always, None) => return err(idx, format!("{kind} must define a value")),
                (Defines::Never, Some(_)) => {
                    return err(idx, format!("{kind} can't define a value"))
                }
                _ => (),
            }

            if !kind.is_guard() && !op.liveboxes().is_empty() {
                return err(idx, format!("{kind} is not a guard but has liveboxes"));
            }

            for v in op.arg_vars().chain(op.liveboxes().iter().copied()) {
                if defined.get(v.index()) != Some(true) {
                    return err(
                        idx,
                        format!("{} is used before it is defined", self.var(v).name()),
                    );
                }
            }
            for (i, v) in op.liveboxes().iter().enumerate() {
                if op.liveboxes()[..i].contains(v) {
                    return err(
                        idx,
                        format!("{} appears more than once in liveboxes", self.var(*v).name()),
                    );
                }
            }

            if let Some(v) = op.result() {
                if defined.get(v.index()) == Some(true) {
                    return err(
                        idx,
                        format!("{} is defined more than once", self.var(v).name()),
                    );
                }
                defined.set(v.index(), true);
            }
        }
        Ok(())
    }
}
