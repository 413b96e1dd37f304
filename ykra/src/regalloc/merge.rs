//! Trace entry and exit: where formal arguments start out, and how a jump's operands are moved to
//! where the target merge point expects them.
//!
//! A loop decides its own merge point locations. Formal arguments get the first stack slots of
//! the frame and, where a register is free, start out in a register. A formal argument that the
//! trace's jump passes back unchanged stays in its stack slot: it will never need moving.
//!
//! A bridge inherits both its entry locations and its frame from the guard it is attached to.
//!
//! At a jump, every operand must end up in the location the target merge point expects. The
//! moves form a parallel assignment: any move whose destination isn't the source of another
//! pending move can go first. If no such move exists the remaining moves form cycles, which we
//! break by saving one blocked value to a stack slot.

use super::RegAlloc;
use crate::{
    compile::{CompilationError, GuardState},
    config::Config,
    location::{Location, PseudoOp, StackSlot},
    regfile::RegFile,
    trace::{Const, Op, OpIdx, OpKind, Operand, Trace, VarIdx},
};
use smallvec::SmallVec;

impl<'a> RegAlloc<'a> {
    /// Create an allocator for a trace that starts a loop.
    pub(crate) fn for_loop(
        trace: &'a Trace,
        regfile: &'a RegFile,
        config: &'a Config,
    ) -> Result<Self, CompilationError> {
        let mut ra = Self::new(trace, regfile, config);
        let formals = trace.formals().collect::<Vec<_>>();
        let nformals = u32::try_from(formals.len())
            .map_err(|_| CompilationError::InternalError("too many formal arguments".into()))?;
        if nformals > config.max_frame_slots {
            return Err(CompilationError::FrameOverflow {
                slot: config.max_frame_slots,
                max: config.max_frame_slots,
            });
        }
        let jump_args = match trace.terminator() {
            Some(op) if op.kind() == OpKind::Jump => {
                if op.args().len() != formals.len() {
                    return Err(CompilationError::InternalError(format!(
                        "jump passes {} values to a merge point with {} formal arguments",
                        op.args().len(),
                        formals.len()
                    )));
                }
                Some(op.args())
            }
            _ => None,
        };

        let mut locs = Vec::with_capacity(formals.len());
        for (i, f) in formals.iter().enumerate() {
            let slot = StackSlot(i as u32);
            ra.vars[*f].slot = Some(slot);
            let invariant = jump_args.map(|x| x[i] == Operand::Var(*f)).unwrap_or(false);
            if !invariant && ra.lr.is_used_after(OpIdx::new(0), *f) {
                if let Some(r) = ra.free_reg(ra.class_of(*f), Some(*f)) {
                    ra.bind(*f, r);
                    ra.set_dirty(*f, true);
                    locs.push(Location::Reg(r));
                    continue;
                }
            }
            locs.push(Location::Stack(slot));
        }
        ra.stack_depth = nformals;

        if let Some(jump_args) = jump_args {
            for (i, (f, a)) in formals.iter().zip(jump_args).enumerate() {
                let Some(a) = a.as_var() else { continue };
                if a == *f {
                    continue;
                }
                if let Location::Reg(r) = locs[i] {
                    if ra.jump_cands[a].is_none() {
                        ra.jump_cands[a] = Some(r);
                    }
                }
                // If `f` is dead by the time `a` is defined, `a` can share `f`'s slot: if `a` is
                // ever spilled, it is then already where the jump wants it.
                if ra.lr.last_use(*f) <= ra.lr.def(a)
                    && ra.lr.def(a) != OpIdx::new(0)
                    && ra.vars[a].slot.is_none()
                {
                    ra.vars[a].slot = Some(StackSlot(i as u32));
                }
            }
            ra.jump_target = Some(locs.clone());
        }
        ra.merge_point_locs = locs;
        Ok(ra)
    }

    /// Create an allocator for a bridge attached to a guard whose state is `guard`. If the bridge
    /// ends in a jump, `target` is the merge point it jumps to.
    pub(crate) fn for_bridge(
        trace: &'a Trace,
        regfile: &'a RegFile,
        config: &'a Config,
        guard: &GuardState,
        target: Option<&[Location]>,
    ) -> Result<Self, CompilationError> {
        let mut ra = Self::new(trace, regfile, config);
        let formals = trace.formals().collect::<Vec<_>>();
        if formals.len() != guard.locs.len() {
            return Err(CompilationError::InternalError(format!(
                "bridge has {} formal arguments but its guard has {} liveboxes",
                formals.len(),
                guard.locs.len()
            )));
        }
        if guard.frame_depth > config.max_frame_slots {
            return Err(CompilationError::FrameOverflow {
                slot: config.max_frame_slots,
                max: config.max_frame_slots,
            });
        }
        ra.stack_depth = guard.frame_depth;

        for (f, (_, loc)) in formals.iter().zip(&guard.locs) {
            match loc {
                Location::Reg(r) => {
                    if r.index() >= regfile.len()
                        || regfile.class(*r) != ra.class_of(*f)
                        || ra.vars[*f].reg.is_some()
                        || ra.regs[*r] != super::RegState::Empty
                    {
                        return Err(CompilationError::InternalError(format!(
                            "guard state puts {} in an unusable register",
                            trace.var(*f).name()
                        )));
                    }
                    if ra.lr.is_used_after(OpIdx::new(0), *f) {
                        ra.bind(*f, *r);
                        ra.set_dirty(*f, true);
                    }
                }
                Location::Stack(s) => {
                    if s.0 >= guard.frame_depth {
                        return Err(CompilationError::InternalError(format!(
                            "guard state puts {} outside the frame",
                            trace.var(*f).name()
                        )));
                    }
                    ra.vars[*f].slot = Some(*s);
                }
                Location::Imm(_) => {
                    return Err(CompilationError::InternalError(format!(
                        "guard state gives {} no location",
                        trace.var(*f).name()
                    )))
                }
            }
        }
        ra.merge_point_locs = guard.locs.iter().map(|(_, l)| *l).collect();

        if let Some(op) = trace.terminator().filter(|x| x.kind() == OpKind::Jump) {
            let target = target.ok_or_else(|| {
                CompilationError::InternalError("bridge jumps to an unknown merge point".into())
            })?;
            if target.len() != op.args().len() {
                return Err(CompilationError::InternalError(format!(
                    "jump passes {} values to a merge point with {} formal arguments",
                    op.args().len(),
                    target.len()
                )));
            }
            for (a, l) in op.args().iter().zip(target) {
                if let (Some(a), Location::Reg(r)) = (a.as_var(), l) {
                    if ra.jump_cands[a].is_none() {
                        ra.jump_cands[a] = Some(*r);
                    }
                }
            }
            ra.jump_target = Some(target.to_vec());
        }
        Ok(ra)
    }

    /// Is `v` already in `loc`? A value in a stack slot only counts if the slot is up to date.
    fn is_at(&self, v: VarIdx, loc: &Location) -> bool {
        let vs = &self.vars[v];
        match loc {
            Location::Reg(r) => vs.reg == Some(*r),
            Location::Stack(s) => vs.slot == Some(*s) && (vs.reg.is_none() || !self.is_dirty(v)),
            Location::Imm(_) => false,
        }
    }

    /// Move the jump at `idx`'s operands to the target merge point's locations.
    pub(super) fn reconcile_jump(&mut self, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
        let target = self
            .jump_target
            .clone()
            .ok_or_else(|| self.internal("jump to an unknown merge point"))?;
        if target.len() != op.args().len() {
            return Err(self.internal("jump arity doesn't match its target"));
        }
        if target.iter().any(|x| matches!(x, Location::Imm(_))) {
            return Err(self.internal("merge point location is an immediate"));
        }

        let mut consts: SmallVec<[(Const, Location); 4]> = SmallVec::new();
        let mut moves: Vec<(VarIdx, Location, Location)> = Vec::new();
        for (o, dst) in op.args().iter().zip(&target) {
            match o {
                Operand::Const(c) => consts.push((*c, *dst)),
                Operand::Var(v) => {
                    if !self.is_at(*v, dst) {
                        moves.push((*v, self.loc(*v)?, *dst));
                    }
                }
            }
        }

        while !moves.is_empty() {
            let ready = moves
                .iter()
                .position(|(_, _, dst)| !moves.iter().any(|(_, src, _)| src == dst));
            if let Some(i) = ready {
                let (v, src, dst) = moves.remove(i);
                self.emit_move(Operand::Var(v), src, dst)?;
                continue;
            }

            // Every pending destination is still needed as a source: save the value that blocks
            // the first move somewhere safe and redirect its readers there.
            let blocked = moves[0].2;
            let val = moves
                .iter()
                .find_map(|(v, src, _)| (*src == blocked).then_some(*v))
                .ok_or_else(|| self.internal("unresolvable move cycle"))?;
            let home = self.vars[val]
                .slot
                .filter(|s| !target.contains(&Location::Stack(*s)));
            let saved = match home {
                Some(s) if blocked.is_reg() && !self.is_dirty(val) => s,
                Some(s) => {
                    self.emit_move(Operand::Var(val), blocked, Location::Stack(s))?;
                    s
                }
                None => {
                    let s = self.alloc_slot()?;
                    self.emit_move(Operand::Var(val), blocked, Location::Stack(s))?;
                    s
                }
            };
            for (_, src, _) in moves.iter_mut() {
                if *src == blocked {
                    *src = Location::Stack(saved);
                }
            }
        }

        for (c, dst) in consts {
            self.emit_move(Operand::Const(c), Location::Imm(c), dst)?;
        }
        self.push(PseudoOp::PerformDiscard(idx, target.into_iter().collect()));
        self.release_all(false)
    }

    fn emit_move(
        &mut self,
        val: Operand,
        src: Location,
        dst: Location,
    ) -> Result<(), CompilationError> {
        match dst {
            Location::Reg(_) => self.push(PseudoOp::Load(val, src, dst)),
            Location::Stack(_) => self.push(PseudoOp::Store(val, src, dst)),
            Location::Imm(_) => return Err(self.internal("moving a value to an immediate")),
        }
        Ok(())
    }
}
