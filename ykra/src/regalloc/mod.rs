//! The location assignment engine.
//!
//! [RegAlloc] walks a trace once, front to back. Before each op it establishes the locations the
//! op's encoding needs (loading values into registers, evicting other values, materialising
//! constants) and then records the op as a [PseudoOp::Perform] or [PseudoOp::PerformDiscard].
//! After each op, registers holding values that are no longer needed are returned to the pool.
//!
//! Each value has at most one register and at most one stack slot. A value in a register is
//! "dirty" if its stack slot is stale or absent: evicting a dirty value requires a store, evicting
//! a clean one doesn't. Stack slots are allocated lazily, numbered monotonically, and never
//! reused by another value while the first is alive.
//!
//! Within an op, registers that hold the op's operands (or scratch values the op needs) are
//! "pinned" and can't be chosen for eviction. Registers in the [RegState::Temp] state hold
//! scratch values that don't outlive the op.

use crate::{
    compile::{Allocation, CompilationError, GuardState},
    config::Config,
    liveness::LiveRanges,
    location::{Location, PseudoOp, StackSlot},
    regfile::{RegClass, RegFile, RegIdx, RegSet},
    trace::{Const, Kind, Op, OpIdx, Operand, Trace, VarIdx},
};
use index_vec::IndexVec;
use smallvec::SmallVec;
use vob::Vob;

mod merge;
mod ops;
mod spill;

pub(crate) use ops::OpTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegState {
    Empty,
    Var(VarIdx),
    /// A scratch value that lives only for the current op: a materialised constant, a second copy
    /// of a value, or a register the op clobbers.
    Temp,
}

#[derive(Clone, Debug, Default)]
struct VarState {
    reg: Option<RegIdx>,
    slot: Option<StackSlot>,
}

pub(crate) struct RegAlloc<'a> {
    trace: &'a Trace,
    regfile: &'a RegFile,
    config: &'a Config,
    lr: LiveRanges,
    regs: IndexVec<RegIdx, RegState>,
    vars: IndexVec<VarIdx, VarState>,
    /// Which values' register copies differ from their stack slots.
    dirty: Vob,
    /// The next stack slot to allocate.
    stack_depth: u32,
    /// Registers that values should preferably be put in because that's where the jump at the end
    /// of the trace will want them.
    jump_cands: IndexVec<VarIdx, Option<RegIdx>>,
    /// The locations of the merge point the trace's jump targets.
    jump_target: Option<Vec<Location>>,
    /// Registers that the current op needs and that mustn't be evicted.
    pinned: RegSet,
    /// The op currently being processed.
    cur: OpIdx,
    merge_point_locs: Vec<Location>,
    guards: Vec<(OpIdx, GuardState)>,
    pseudo_ops: Vec<PseudoOp>,
}

impl<'a> RegAlloc<'a> {
    fn new(trace: &'a Trace, regfile: &'a RegFile, config: &'a Config) -> Self {
        let nvars = trace.vars_len();
        Self {
            trace,
            regfile,
            config,
            lr: LiveRanges::new(trace),
            regs: IndexVec::from_vec(vec![RegState::Empty; regfile.len()]),
            vars: IndexVec::from_vec(vec![VarState::default(); nvars]),
            dirty: Vob::from_elem(false, nvars),
            stack_depth: 0,
            jump_cands: IndexVec::from_vec(vec![None; nvars]),
            jump_target: None,
            pinned: RegSet::default(),
            cur: OpIdx::new(0),
            merge_point_locs: Vec::new(),
            guards: Vec::new(),
            pseudo_ops: Vec::new(),
        }
    }

    /// Assign locations for every op after the merge point.
    pub(crate) fn run(&mut self, optable: &OpTable) -> Result<(), CompilationError> {
        let trace = self.trace;
        for (idx, op) in trace.ops().skip(1) {
            self.cur = idx;
            let handler = optable
                .handler(op.kind())
                .ok_or(CompilationError::UnknownOpcode {
                    pos: idx,
                    opkind: op.kind(),
                })?;
            handler(self, idx, op)?;
            self.end_op(op);
        }
        Ok(())
    }

    pub(crate) fn into_allocation(self) -> Allocation {
        Allocation {
            pseudo_ops: self.pseudo_ops,
            merge_point_locs: self.merge_point_locs,
            guards: self.guards,
            frame_depth: self.stack_depth,
        }
    }

    /// Release the registers of values that die at the current op and of scratch values.
    fn end_op(&mut self, op: &Op) {
        let dead = op
            .arg_vars()
            .chain(op.liveboxes().iter().copied())
            .chain(op.result())
            .filter(|v| !self.lr.is_used_after(self.cur, *v))
            .collect::<SmallVec<[_; 4]>>();
        for v in dead {
            self.unbind(v);
        }
        for r in self.regs.iter_mut() {
            if *r == RegState::Temp {
                *r = RegState::Empty;
            }
        }
        self.pinned.clear();
    }

    fn internal(&self, msg: &str) -> CompilationError {
        CompilationError::InternalError(format!("op {}: {msg}", self.cur))
    }

    fn push(&mut self, pop: PseudoOp) {
        self.pseudo_ops.push(pop);
    }

    /// Record op `idx` as performed with operands `args` and result `res`.
    fn perform(&mut self, idx: OpIdx, args: SmallVec<[Location; 4]>, res: Option<RegIdx>) {
        match res {
            Some(r) => self.push(PseudoOp::Perform(idx, args, Location::Reg(r))),
            None => self.push(PseudoOp::PerformDiscard(idx, args)),
        }
    }

    fn class_of(&self, v: VarIdx) -> RegClass {
        kind_class(self.trace.var(v).kind())
    }

    fn is_dirty(&self, v: VarIdx) -> bool {
        self.dirty.get(v.index()).unwrap_or(false)
    }

    fn set_dirty(&mut self, v: VarIdx, dirty: bool) {
        self.dirty.set(v.index(), dirty);
    }

    /// Is `v` an operand of the current op?
    fn is_operand(&self, v: VarIdx) -> bool {
        self.trace.op(self.cur).arg_vars().any(|x| x == v)
    }

    /// Where `v` currently lives, preferring its register to its stack slot.
    pub(crate) fn loc(&self, v: VarIdx) -> Result<Location, CompilationError> {
        let vs = &self.vars[v];
        match (vs.reg, vs.slot) {
            (Some(r), _) => Ok(Location::Reg(r)),
            (None, Some(s)) => Ok(Location::Stack(s)),
            (None, None) => Err(self.internal(&format!(
                "{} has no location",
                self.trace.var(v).name()
            ))),
        }
    }

    fn opnd_loc(&self, o: &Operand) -> Result<Location, CompilationError> {
        match o {
            Operand::Var(v) => self.loc(*v),
            Operand::Const(c) => Ok(Location::Imm(*c)),
        }
    }

    fn bind(&mut self, v: VarIdx, r: RegIdx) {
        debug_assert_eq!(self.regs[r], RegState::Empty);
        debug_assert!(self.vars[v].reg.is_none());
        self.regs[r] = RegState::Var(v);
        self.vars[v].reg = Some(r);
    }

    /// Remove `v` from its register, if it has one. This does not store `v`.
    fn unbind(&mut self, v: VarIdx) {
        if let Some(r) = self.vars[v].reg.take() {
            self.regs[r] = RegState::Empty;
            self.pinned.remove(r);
        }
    }

    /// Move `v`'s register binding from its current register to the empty register `to`,
    /// emitting the copy.
    fn move_reg(&mut self, v: VarIdx, to: RegIdx) -> Result<(), CompilationError> {
        let from = self.vars[v]
            .reg
            .ok_or_else(|| self.internal("moving a value that isn't in a register"))?;
        self.push(PseudoOp::Load(
            Operand::Var(v),
            Location::Reg(from),
            Location::Reg(to),
        ));
        self.unbind(v);
        self.bind(v, to);
        Ok(())
    }

    /// The preferred empty register of class `class` for `v`: its jump candidate if that is
    /// free, otherwise the highest numbered free register.
    fn free_reg(&self, class: RegClass, v: Option<VarIdx>) -> Option<RegIdx> {
        if let Some(r) = v.and_then(|v| self.jump_cands[v]) {
            if self.regs[r] == RegState::Empty && self.regfile.class(r) == class {
                return Some(r);
            }
        }
        self.regfile
            .iter_pref()
            .find(|r| self.regs[*r] == RegState::Empty && self.regfile.class(*r) == class)
    }

    /// Find an empty register of class `class` for `v`, evicting another value if necessary.
    /// The register is returned empty and unpinned.
    fn alloc_reg(
        &mut self,
        class: RegClass,
        v: Option<VarIdx>,
    ) -> Result<RegIdx, CompilationError> {
        if let Some(r) = self.free_reg(class, v) {
            return Ok(r);
        }
        let r = self.choose_victim(class, v)?;
        self.evict(r)?;
        Ok(r)
    }

    /// An empty byte addressable register for `v`, evicting another value if necessary.
    fn alloc_byte_reg(&mut self, v: Option<VarIdx>) -> Result<RegIdx, CompilationError> {
        let rf = self.regfile;
        let free = |r: RegIdx| rf.is_byte_addressable(r) && self.regs[r] == RegState::Empty;
        if let Some(r) = v.and_then(|v| self.jump_cands[v]).filter(|r| free(*r)) {
            return Ok(r);
        }
        if let Some(r) = rf.iter_pref().find(|r| free(*r)) {
            return Ok(r);
        }
        let r = self.choose_victim_where(RegClass::Gp, v, |r| rf.is_byte_addressable(r))?;
        self.evict(r)?;
        Ok(r)
    }

    /// Make the specific register `r` empty so that the current op can use it. Fails if `r` is
    /// already pinned by the current op.
    fn free_specific(&mut self, r: RegIdx) -> Result<(), CompilationError> {
        match self.regs[r] {
            RegState::Empty => Ok(()),
            _ if self.pinned.contains(r) => Err(CompilationError::UnassignableFixedRegister {
                pos: self.cur,
                reason: format!(
                    "{} is needed for two different operands",
                    self.regfile.name(r)
                ),
            }),
            RegState::Var(_) => self.evict(r),
            RegState::Temp => Err(self.internal("unpinned scratch register")),
        }
    }

    /// Make sure `v` is in a register, putting it in `selected` if that is `Some`. The register
    /// is pinned for the current op.
    pub(crate) fn make_sure_var_in_reg(
        &mut self,
        v: VarIdx,
        selected: Option<RegIdx>,
    ) -> Result<RegIdx, CompilationError> {
        let class = self.class_of(v);
        let Some(sel) = selected else {
            if let Some(r) = self.vars[v].reg {
                self.pinned.insert(r);
                return Ok(r);
            }
            let r = self.alloc_reg(class, Some(v))?;
            self.reload(v, r)?;
            self.pinned.insert(r);
            return Ok(r);
        };

        if self.regfile.class(sel) != class {
            return Err(self.internal(&format!(
                "{} can't hold {}",
                self.regfile.name(sel),
                self.trace.var(v).name()
            )));
        }
        if self.vars[v].reg == Some(sel) {
            self.pinned.insert(sel);
            return Ok(sel);
        }
        self.free_specific(sel)?;
        match self.vars[v].reg {
            Some(r) if self.pinned.contains(r) => {
                // `v` is already pinned in another register for this op, so `sel` gets a copy
                // that doesn't outlive the op.
                self.push(PseudoOp::Load(
                    Operand::Var(v),
                    Location::Reg(r),
                    Location::Reg(sel),
                ));
                self.regs[sel] = RegState::Temp;
            }
            Some(_) => self.move_reg(v, sel)?,
            None => self.reload(v, sel)?,
        }
        self.pinned.insert(sel);
        Ok(sel)
    }

    /// Load `v` from its stack slot into the empty register `r`.
    fn reload(&mut self, v: VarIdx, r: RegIdx) -> Result<(), CompilationError> {
        let slot = self.vars[v].slot.ok_or_else(|| {
            self.internal(&format!(
                "{} is in neither a register nor a stack slot",
                self.trace.var(v).name()
            ))
        })?;
        self.push(PseudoOp::Load(
            Operand::Var(v),
            Location::Stack(slot),
            Location::Reg(r),
        ));
        self.bind(v, r);
        Ok(())
    }

    /// Load the constant `c` into a scratch register, which is `selected` if that is `Some`. The
    /// register does not become the constant's home: a later use loads it again.
    fn materialise(
        &mut self,
        c: Const,
        selected: Option<RegIdx>,
    ) -> Result<RegIdx, CompilationError> {
        let class = kind_class(c.kind());
        let r = match selected {
            Some(r) => {
                self.free_specific(r)?;
                r
            }
            None => self.alloc_reg(class, None)?,
        };
        self.push(PseudoOp::Load(
            Operand::Const(c),
            Location::Imm(c),
            Location::Reg(r),
        ));
        self.regs[r] = RegState::Temp;
        self.pinned.insert(r);
        Ok(r)
    }

    /// Put operand `o` in a register, which is `selected` if that is `Some`.
    pub(crate) fn reg_for(
        &mut self,
        o: &Operand,
        selected: Option<RegIdx>,
    ) -> Result<RegIdx, CompilationError> {
        match o {
            Operand::Var(v) => self.make_sure_var_in_reg(*v, selected),
            Operand::Const(c) => self.materialise(*c, selected),
        }
    }

    /// A location for operand `o` that is either a register or, for small constants, an
    /// immediate.
    fn imm_or_reg(&mut self, o: &Operand) -> Result<Location, CompilationError> {
        match o {
            Operand::Const(c) if c.fits_imm32() => Ok(Location::Imm(*c)),
            _ => Ok(Location::Reg(self.reg_for(o, None)?)),
        }
    }

    /// A location for the value stored by a 1-byte store: an immediate for small constants,
    /// otherwise a byte addressable register.
    fn byte_imm_or_reg(&mut self, o: &Operand) -> Result<Location, CompilationError> {
        let v = match o {
            Operand::Const(c) if c.fits_imm32() => return Ok(Location::Imm(*c)),
            Operand::Const(c) => {
                let r = self.alloc_byte_reg(None)?;
                return Ok(Location::Reg(self.materialise(*c, Some(r))?));
            }
            Operand::Var(v) => *v,
        };
        if let Some(r) = self.vars[v].reg.filter(|r| self.regfile.is_byte_addressable(*r)) {
            self.pinned.insert(r);
            return Ok(Location::Reg(r));
        }
        let r = self.alloc_byte_reg(Some(v))?;
        Ok(Location::Reg(self.make_sure_var_in_reg(v, Some(r))?))
    }

    /// A location for operand `o` that may be a register, a stack slot, or, for small constants,
    /// an immediate. Values are left where they are.
    fn imm_or_loc(&mut self, o: &Operand) -> Result<Location, CompilationError> {
        match o {
            Operand::Const(c) if c.fits_imm32() => Ok(Location::Imm(*c)),
            Operand::Const(c) => Ok(Location::Reg(self.materialise(*c, None)?)),
            Operand::Var(v) => self.loc(*v),
        }
    }

    /// Make the register `r` available to be overwritten by the current op. If `r` holds a value
    /// that is needed after the current op, it is spilled first. The register becomes pinned
    /// scratch.
    fn clobber(&mut self, r: RegIdx) -> Result<(), CompilationError> {
        if let RegState::Var(v) = self.regs[r] {
            if self.lr.is_used_after(self.cur, v) {
                self.spill_var(v)?;
            } else {
                self.unbind(v);
            }
        }
        self.regs[r] = RegState::Temp;
        self.pinned.insert(r);
        Ok(())
    }

    /// Allocate a register for the result `v` of the current op, which is `selected` if that is
    /// `Some`. Operands of the current op can be overwritten by a selected result register, since
    /// the op reads its operands before writing its result.
    fn alloc_result(
        &mut self,
        v: VarIdx,
        selected: Option<RegIdx>,
    ) -> Result<RegIdx, CompilationError> {
        let r = match selected {
            Some(r) => {
                self.clobber(r)?;
                self.regs[r] = RegState::Empty;
                r
            }
            None => self.alloc_reg(self.class_of(v), Some(v))?,
        };
        self.bind(v, r);
        self.set_dirty(v, true);
        self.pinned.insert(r);
        Ok(r)
    }

    /// Put the result `res` of the current op in the same register as operand `o`, as two-address
    /// instructions require. If `o` is still needed after the current op, it is first moved to
    /// another register or, if there is none, to its stack slot.
    pub(crate) fn force_result_in_reg(
        &mut self,
        res: VarIdx,
        o: &Operand,
    ) -> Result<RegIdx, CompilationError> {
        let res_class = self.class_of(res);
        let v = match o {
            Operand::Const(c) => {
                let r = self.alloc_reg(res_class, Some(res))?;
                self.push(PseudoOp::Load(*o, Location::Imm(*c), Location::Reg(r)));
                self.bind(res, r);
                self.set_dirty(res, true);
                self.pinned.insert(r);
                return Ok(r);
            }
            Operand::Var(v) => *v,
        };

        let r = match self.vars[v].reg {
            Some(r) if self.pinned.contains(r) => {
                // `v` is pinned in `r` for another purpose, so the result needs a copy.
                let r2 = self.alloc_reg(res_class, Some(res))?;
                self.push(PseudoOp::Load(*o, Location::Reg(r), Location::Reg(r2)));
                self.bind(res, r2);
                self.set_dirty(res, true);
                self.pinned.insert(r2);
                return Ok(r2);
            }
            Some(r) => r,
            None => {
                let r = self.alloc_reg(self.class_of(v), Some(v))?;
                self.reload(v, r)?;
                r
            }
        };

        if self.lr.is_used_after(self.cur, v) && (self.is_dirty(v) || self.vars[v].slot.is_none())
        {
            match self.free_reg(self.class_of(v), Some(v)) {
                Some(r2) => self.move_reg(v, r2)?,
                None => self.spill_var(v)?,
            }
        } else {
            self.unbind(v);
        }
        self.bind(res, r);
        self.set_dirty(res, true);
        self.pinned.insert(r);
        Ok(r)
    }

    /// If `v` is in a register and dies at the current op, hand that register over to `res`
    /// without emitting anything.
    fn rebind_dying(&mut self, v: VarIdx, res: VarIdx) -> Option<RegIdx> {
        let r = self.vars[v].reg?;
        if self.lr.is_used_after(self.cur, v) || self.class_of(v) != self.class_of(res) {
            return None;
        }
        self.unbind(v);
        self.bind(res, r);
        self.set_dirty(res, true);
        self.pinned.insert(r);
        Some(r)
    }

    /// Release the registers of operands that die at the current op, so that the op's result
    /// can reuse one of them.
    fn free_dying_operands(&mut self, op: &Op) {
        for v in op.arg_vars() {
            if !self.lr.is_used_after(self.cur, v) {
                self.unbind(v);
            }
        }
    }

    /// Unbind every register, storing values that are still needed after the current op.
    fn release_all(&mut self, store_live: bool) -> Result<(), CompilationError> {
        for r in self.regfile.iter_pref().collect::<SmallVec<[_; 16]>>() {
            match self.regs[r] {
                RegState::Var(v) => {
                    if store_live && self.lr.is_used_after(self.cur, v) {
                        self.spill_var(v)?;
                    } else {
                        self.unbind(v);
                    }
                }
                RegState::Temp => self.regs[r] = RegState::Empty,
                RegState::Empty => (),
            }
        }
        self.pinned.clear();
        Ok(())
    }

    /// The result of op `op`, which must have one.
    fn result_of(&self, op: &Op) -> Result<VarIdx, CompilationError> {
        op.result()
            .ok_or_else(|| self.internal(&format!("{} has no result", op.kind())))
    }
}

fn kind_class(kind: Kind) -> RegClass {
    match kind {
        Kind::Float => RegClass::Fp,
        Kind::Int | Kind::Ref => RegClass::Gp,
    }
}


#[cfg(test)]
mod tests {
    use super::{test_utils::*, *};
    use std::str::FromStr;

    #[test]
    fn loop_invariant_rebinding() {
        // `i1` is computed in `i0`'s register, so the back-edge needs no reconciling moves.
        let rf = RegFile::x86_32_minimal();
        let (t, a) = loop_and_test(
            "
          [i0]
          i1 = int_add(i0, 1)
          i2 = int_lt(i1, 20)
          guard_true(i2)
            fail(i1)
          jump(i1)
        ",
            &rf,
            "
          merge_point: [i0: {{r}}]
          Perform int_add({{r}}, $1) -> {{r}}
          Perform int_lt({{r}}, $20) -> {{c}}
          PerformDiscard guard_true({{c}})
          PerformDiscard jump({{r}})
          guard @3: [i1: {{r}}]
          frame depth: 1
        ",
        );
        assert!(!a
            .pseudo_ops
            .iter()
            .any(|x| matches!(x, PseudoOp::Load(..) | PseudoOp::Store(..))));
        assert_eq!(a.merge_point_locs, [Location::Reg(reg(&rf, "edx"))]);
        assert_eq!(
            a.guard(OpIdx::new(3)).unwrap().locs,
            [(VarIdx::new(1), Location::Reg(reg(&rf, "edx")))]
        );
        assert_eq!(t.ops_len(), 5);
    }

    #[test]
    fn forced_spill() {
        // Four values are needed at once, but there are only three registers: `i0` has to be
        // stored before its register is reused for `i4`.
        let rf = RegFile::x86_32_minimal();
        let (_, a) = loop_and_test(
            "
          [i0, i1, i2, i3]
          i4 = int_add(i0, i1)
          i5 = int_add(i4, i2)
          i6 = int_add(i5, i3)
          finish(i6, i0, i1, i2, i3)
        ",
            &rf,
            "
          merge_point: [i0: edx, i1: ecx, i2: eax, i3: [3]]
          Store i0, edx -> [0]
          Perform int_add(edx, ecx) -> edx
          Perform int_add(edx, eax) -> edx
          Perform int_add(edx, [3]) -> edx
          PerformDiscard finish(edx, [0], ecx, eax, [3])
          frame depth: 4
        ",
        );
        assert_eq!(
            a.pseudo_ops
                .iter()
                .filter(|x| matches!(x, PseudoOp::Store(..)))
                .count(),
            1
        );
    }

    #[test]
    fn dying_operand_reused_in_place() {
        // When the left operand dies, its register is reused and nothing is stored.
        let rf = RegFile::x86_32_minimal();
        let (_, a) = loop_and_test(
            "
          [i0, i1, i2, i3]
          i4 = int_add(i0, i1)
          i5 = int_add(i4, i2)
          i6 = int_add(i5, i3)
          finish(i6)
        ",
            &rf,
            "
          merge_point: [i0: edx, i1: ecx, i2: eax, i3: [3]]
          Perform int_add(edx, ecx) -> edx
          Perform int_add(edx, eax) -> edx
          Perform int_add(edx, [3]) -> edx
          PerformDiscard finish(edx)
          frame depth: 4
        ",
        );
        assert!(!a
            .pseudo_ops
            .iter()
            .any(|x| matches!(x, PseudoOp::Store(..))));
    }

    #[test]
    fn live_operand_moved_away() {
        // `i0` is needed later and a register is free, so it moves there rather than being
        // stored.
        let rf = RegFile::x86_32_minimal();
        loop_and_test(
            "
          [i0]
          i1 = int_add(i0, 1)
          finish(i1, i0)
        ",
            &rf,
            "
          merge_point: [i0: edx]
          Load i0, edx -> ecx
          Perform int_add(edx, $1) -> edx
          PerformDiscard finish(edx, ecx)
          frame depth: 1
        ",
        );
    }

    #[test]
    fn constants_not_cached() {
        // A constant that can't be an immediate is loaded afresh for every use, possibly into
        // different registers, and its value is unchanged.
        let rf = RegFile::x86_32_minimal();
        let (_, a) = loop_and_test(
            "
          [i0, i1]
          i2 = int_add(i0, 8589934592)
          i3 = int_sub(i1, 8589934592)
          finish(i2, i3)
        ",
            &rf,
            "
          merge_point: [i0: edx, i1: ecx]
          Load $8589934592 -> eax
          Perform int_add(edx, eax) -> edx
          Load $8589934592 -> eax
          Perform int_sub(ecx, eax) -> ecx
          PerformDiscard finish(edx, ecx)
          frame depth: 2
        ",
        );
        let loads = a
            .pseudo_ops
            .iter()
            .filter_map(|x| match x {
                PseudoOp::Load(Operand::Const(c), Location::Imm(d), _) => {
                    assert_eq!(c, d);
                    Some(*c)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(loads, [Const::Int(8589934592), Const::Int(8589934592)]);
    }

    #[test]
    fn constant_rematerialised_in_different_registers() {
        let rf = RegFile::x86_32_minimal();
        loop_and_test(
            "
          [i0, i1]
          i2 = int_mod(i0, 7)
          i3 = int_lshift(i1, 7)
          i4 = int_sub(7, i2)
          finish(i3, i4)
        ",
            &rf,
            "
          merge_point: [i0: edx, i1: ecx]
          Load i0, edx -> eax
          Store i1, ecx -> [1]
          Load $7 -> ecx
          Perform int_mod(eax, ecx) -> edx
          Load i1, [1] -> ecx
          Perform int_lshift(ecx, $7) -> ecx
          Load $7 -> eax
          Perform int_sub(eax, edx) -> eax
          PerformDiscard finish(ecx, eax)
          frame depth: 2
        ",
        );
    }

    #[test]
    fn no_registers_bound_after_finish() {
        let rf = RegFile::x86_32();
        let t = Trace::from_str(
            "
          [i0, p1, f2]
          i3 = getfield_gc(p1, descr=field(4, 4))
          f4 = float_mul(f2, f2)
          i5 = int_mul(i3, i0)
          finish(i5, f4)
        ",
        )
        .unwrap();
        // `compile_loop` asserts that every register is empty once the trace has been processed.
        let a = compile_loop(&t, &rf, &Config::default()).unwrap();
        check_flow(&t, &rf, &a, None);
    }

    #[test]
    fn var_state_invariants() {
        // Drive the engine op by op and check that register bindings stay injective.
        let rf = RegFile::x86_32_minimal();
        let t = Trace::from_str(
            "
          [i0, i1, i2, i3, i4]
          i5 = int_mul(i0, i1)
          i6 = int_floordiv(i5, i2)
          i7 = int_mod(i3, i3)
          i8 = int_rshift(i4, i7)
          i9 = int_add(i8, i6)
          guard_true(i9) [i0, i1, i2, i3, i4]
          jump(i1, i0, i9, i4, i3)
        ",
        )
        .unwrap();
        let optable = OpTable::new(&rf);
        let config = Config::default();
        let mut ra = RegAlloc::for_loop(&t, &rf, &config).unwrap();
        for (idx, op) in t.ops().skip(1) {
            ra.cur = idx;
            optable.handler(op.kind()).unwrap()(&mut ra, idx, op).unwrap();
            ra.end_op(op);
            for (r, s) in ra.regs.iter_enumerated() {
                match s {
                    RegState::Var(v) => assert_eq!(ra.vars[*v].reg, Some(r)),
                    RegState::Temp => panic!("scratch register survived op {idx}"),
                    RegState::Empty => (),
                }
            }
            for (v, vs) in ra.vars.iter_enumerated() {
                if let Some(r) = vs.reg {
                    assert_eq!(ra.regs[r], RegState::Var(v));
                    assert!(ra.lr.is_used_after(idx, v));
                }
            }
        }
        let a = ra.into_allocation();
        check_flow(&t, &rf, &a, None);
    }
}
