//! Choosing registers to evict and giving evicted values stack slots.

use super::{RegAlloc, RegState};
use crate::{
    compile::CompilationError,
    location::{Location, PseudoOp, StackSlot},
    regfile::{RegClass, RegIdx},
    trace::{Operand, VarIdx},
};

impl RegAlloc<'_> {
    /// Choose a register of class `class` whose value can be evicted to make room for `for_var`.
    ///
    /// Registers pinned by, or holding an operand of, the current op are never chosen. If
    /// `for_var`'s jump candidate is a valid choice it wins. Otherwise we prefer registers whose
    /// values are already stored (evicting them costs nothing), then values whose next use is
    /// furthest away, then the highest numbered register.
    pub(super) fn choose_victim(
        &self,
        class: RegClass,
        for_var: Option<VarIdx>,
    ) -> Result<RegIdx, CompilationError> {
        self.choose_victim_where(class, for_var, |_| true)
    }

    /// As [Self::choose_victim], but only registers for which `allowed` holds are candidates.
    pub(super) fn choose_victim_where(
        &self,
        class: RegClass,
        for_var: Option<VarIdx>,
        allowed: impl Fn(RegIdx) -> bool,
    ) -> Result<RegIdx, CompilationError> {
        let cands = self
            .regfile
            .iter_pref()
            .filter(|r| self.regfile.class(*r) == class && !self.pinned.contains(*r))
            .filter(|r| allowed(*r))
            .filter_map(|r| match self.regs[r] {
                RegState::Var(u) if !self.is_operand(u) => Some((r, u)),
                _ => None,
            })
            .collect::<Vec<_>>();

        if let Some(jc) = for_var.and_then(|v| self.jump_cands[v]) {
            if cands.iter().any(|(r, _)| *r == jc) {
                return Ok(jc);
            }
        }

        cands
            .into_iter()
            .max_by_key(|(r, u)| {
                let clean = !self.is_dirty(*u) && self.vars[*u].slot.is_some();
                let next_use = self
                    .lr
                    .next_use(self.cur, *u)
                    .map(|x| x.index())
                    .unwrap_or(usize::MAX);
                (clean, next_use, *r)
            })
            .map(|(r, _)| r)
            .ok_or_else(|| CompilationError::UnassignableFixedRegister {
                pos: self.cur,
                reason: format!(
                    "every {} register is in use by this op",
                    match class {
                        RegClass::Gp => "general purpose",
                        RegClass::Fp => "floating point",
                    }
                ),
            })
    }

    /// Evict the value in register `r`, storing it first if its stack slot is stale.
    pub(super) fn evict(&mut self, r: RegIdx) -> Result<(), CompilationError> {
        match self.regs[r] {
            RegState::Var(v) => self.spill_var(v),
            _ => Err(self.internal(&format!(
                "evicting {}, which holds no value",
                self.regfile.name(r)
            ))),
        }
    }

    /// Remove `v` from its register, storing it to its stack slot unless the slot is already up
    /// to date.
    pub(super) fn spill_var(&mut self, v: VarIdx) -> Result<(), CompilationError> {
        let Some(r) = self.vars[v].reg else {
            return Ok(());
        };
        if self.is_dirty(v) || self.vars[v].slot.is_none() {
            let slot = self.slot_for(v)?;
            self.push(PseudoOp::Store(
                Operand::Var(v),
                Location::Reg(r),
                Location::Stack(slot),
            ));
            self.set_dirty(v, false);
        }
        self.unbind(v);
        Ok(())
    }

    /// `v`'s stack slot, allocating one if it doesn't yet have one. A value keeps its slot for
    /// the rest of the trace.
    pub(super) fn slot_for(&mut self, v: VarIdx) -> Result<StackSlot, CompilationError> {
        if let Some(s) = self.vars[v].slot {
            return Ok(s);
        }
        let s = self.alloc_slot()?;
        self.vars[v].slot = Some(s);
        Ok(s)
    }

    /// Allocate a fresh stack slot.
    pub(super) fn alloc_slot(&mut self) -> Result<StackSlot, CompilationError> {
        if self.stack_depth >= self.config.max_frame_slots {
            return Err(CompilationError::FrameOverflow {
                slot: self.stack_depth,
                max: self.config.max_frame_slots,
            });
        }
        let s = StackSlot(self.stack_depth);
        self.stack_depth += 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;
    use crate::{config::Config, regfile::RegFile, trace::{OpIdx, Trace}};
    use std::str::FromStr;

    #[test]
    fn victim_order() {
        let rf = RegFile::x86_32_minimal();
        let config = Config::default();
        let t = Trace::from_str(
            "
          [i0, i1, i2]
          i3 = same_as(7)
          finish(i3, i0, i1, i2)
        ",
        )
        .unwrap();
        let mut ra = RegAlloc::for_loop(&t, &rf, &config).unwrap();
        ra.cur = OpIdx::new(1);
        let (i0, i1, i2, i3) = (VarIdx::new(0), VarIdx::new(1), VarIdx::new(2), VarIdx::new(3));
        assert_eq!(ra.vars[i0].reg, Some(reg(&rf, "edx")));
        assert_eq!(ra.vars[i2].reg, Some(reg(&rf, "eax")));

        // All values are dirty and next used by the same op: the highest register loses.
        assert_eq!(ra.choose_victim(RegClass::Gp, None).unwrap(), reg(&rf, "edx"));
        // A value whose slot is up to date is cheaper to evict.
        ra.set_dirty(i1, false);
        assert_eq!(ra.choose_victim(RegClass::Gp, None).unwrap(), reg(&rf, "ecx"));
        // A jump candidate trumps everything else.
        ra.jump_cands[i3] = Some(reg(&rf, "eax"));
        assert_eq!(
            ra.choose_victim(RegClass::Gp, Some(i3)).unwrap(),
            reg(&rf, "eax")
        );
        // Pinned registers are never chosen.
        ra.pinned.insert(reg(&rf, "ecx"));
        assert_eq!(ra.choose_victim(RegClass::Gp, None).unwrap(), reg(&rf, "edx"));
        ra.pinned.insert(reg(&rf, "edx"));
        ra.pinned.insert(reg(&rf, "eax"));
        assert!(matches!(
            ra.choose_victim(RegClass::Gp, None),
            Err(CompilationError::UnassignableFixedRegister { .. })
        ));
        // There are no floating point registers at all.
        assert!(matches!(
            ra.choose_victim(RegClass::Fp, None),
            Err(CompilationError::UnassignableFixedRegister { .. })
        ));
    }

    #[test]
    fn operands_not_evicted() {
        let rf = RegFile::x86_32_minimal();
        let config = Config::default();
        let t = Trace::from_str(
            "
          [i0, i1, i2]
          i3 = int_add(i0, i1)
          finish(i3, i0, i1, i2)
        ",
        )
        .unwrap();
        let mut ra = RegAlloc::for_loop(&t, &rf, &config).unwrap();
        ra.cur = OpIdx::new(1);
        assert_eq!(ra.choose_victim(RegClass::Gp, None).unwrap(), reg(&rf, "eax"));
    }

    #[test]
    fn furthest_next_use() {
        // `i2` isn't needed until the `finish`, so it is the one evicted to load `i3`.
        let rf = RegFile::x86_32_minimal();
        loop_and_test(
            "
          [i0, i1, i2, i3]
          i4 = int_add(i3, 1)
          i5 = int_add(i0, i1)
          finish(i5, i4, i2)
        ",
            &rf,
            "
          merge_point: [i0: edx, i1: ecx, i2: eax, i3: [3]]
          Store i2, eax -> [2]
          Load i3, [3] -> eax
          Perform int_add(eax, $1) -> eax
          Perform int_add(edx, ecx) -> edx
          PerformDiscard finish(edx, eax, [2])
          frame depth: 4
        ",
        );
    }

    #[test]
    fn slots() {
        let rf = RegFile::x86_32_minimal();
        let config = Config { max_frame_slots: 4 };
        let t = Trace::from_str("[i0, i1, i2]\ni3 = int_add(i0, i1)\nfinish(i3, i2)").unwrap();
        let mut ra = RegAlloc::for_loop(&t, &rf, &config).unwrap();
        // Formals occupy the first slots.
        assert_eq!(ra.stack_depth, 3);
        assert_eq!(ra.slot_for(VarIdx::new(1)).unwrap(), StackSlot(1));
        assert_eq!(ra.slot_for(VarIdx::new(3)).unwrap(), StackSlot(3));
        // Slots are memoised.
        assert_eq!(ra.slot_for(VarIdx::new(3)).unwrap(), StackSlot(3));
        assert!(matches!(
            ra.alloc_slot(),
            Err(CompilationError::FrameOverflow { slot: 4, max: 4 })
        ));
        assert_eq!(ra.stack_depth, 4);
    }
}
