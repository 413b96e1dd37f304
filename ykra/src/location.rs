//! Locations and the pseudo-operations that move values between them.

use crate::{
    regfile::{RegFile, RegIdx},
    trace::{Const, OpIdx, Operand, Trace},
};
use smallvec::SmallVec;
use std::fmt;

/// A slot in a trace's stack frame. Slots are numbered from 0 and each holds one value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackSlot(pub u32);

/// Where a value lives at a given point in a trace.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Location {
    Reg(RegIdx),
    Stack(StackSlot),
    Imm(Const),
}

impl Location {
    pub fn is_reg(&self) -> bool {
        matches!(self, Location::Reg(_))
    }

    pub fn display<'a>(&'a self, regfile: &'a RegFile) -> DisplayableLocation<'a> {
        DisplayableLocation { loc: self, regfile }
    }
}

pub struct DisplayableLocation<'a> {
    loc: &'a Location,
    regfile: &'a RegFile,
}

impl fmt::Display for DisplayableLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Location::Reg(r) => write!(f, "{}", self.regfile.name(*r)),
            Location::Stack(StackSlot(s)) => write!(f, "[{s}]"),
            Location::Imm(c) => write!(f, "${c}"),
        }
    }
}

/// The instructions the location assigner hands to the code emitter.
#[derive(Clone, Debug, PartialEq)]
pub enum PseudoOp {
    /// Copy a value (or materialise a constant) into a register.
    Load(Operand, Location, Location),
    /// Copy a value into a stack slot. The source may itself be a stack slot: the emitter must
    /// not need a scratch register to perform such a copy.
    Store(Operand, Location, Location),
    /// Execute op `OpIdx` with operands in the given locations, putting its result in the final
    /// location.
    Perform(OpIdx, SmallVec<[Location; 4]>, Location),
    /// Execute op `OpIdx`, which defines no value, with operands in the given locations.
    PerformDiscard(OpIdx, SmallVec<[Location; 4]>),
}

impl PseudoOp {
    pub fn display<'a>(
        &'a self,
        trace: &'a Trace,
        regfile: &'a RegFile,
    ) -> DisplayablePseudoOp<'a> {
        DisplayablePseudoOp {
            pop: self,
            trace,
            regfile,
        }
    }
}

pub struct DisplayablePseudoOp<'a> {
    pop: &'a PseudoOp,
    trace: &'a Trace,
    regfile: &'a RegFile,
}

impl DisplayablePseudoOp<'_> {
    fn fmt_val(&self, f: &mut fmt::Formatter<'_>, val: &Operand) -> fmt::Result {
        match val {
            Operand::Var(v) => write!(f, "{}", self.trace.var(*v).name()),
            Operand::Const(c) => write!(f, "${c}"),
        }
    }

    fn fmt_op(&self, f: &mut fmt::Formatter<'_>, idx: OpIdx, args: &[Location]) -> fmt::Result {
        write!(f, "{}(", self.trace.op(idx).kind())?;
        for (i, x) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x.display(self.regfile))?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for DisplayablePseudoOp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pop {
            PseudoOp::Load(val, from, to) | PseudoOp::Store(val, from, to) => {
                let name = match self.pop {
                    PseudoOp::Load(..) => "Load",
                    _ => "Store",
                };
                write!(f, "{name} ")?;
                self.fmt_val(f, val)?;
                // A constant is its own source.
                if !matches!(from, Location::Imm(_)) {
                    write!(f, ", {}", from.display(self.regfile))?;
                }
                write!(f, " -> {}", to.display(self.regfile))
            }
            PseudoOp::Perform(idx, args, res) => {
                write!(f, "Perform ")?;
                self.fmt_op(f, *idx, args)?;
                write!(f, " -> {}", res.display(self.regfile))
            }
            PseudoOp::PerformDiscard(idx, args) => {
                write!(f, "PerformDiscard ")?;
                self.fmt_op(f, *idx, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::str::FromStr;

    #[test]
    fn display() {
        let rf = RegFile::x86_32_minimal();
        let t = Trace::from_str("[i0]\ni1 = int_add(i0, 1)\nfinish(i1)").unwrap();
        let i0 = Operand::Var(t.formals().next().unwrap());
        let eax = Location::Reg(RegIdx::new(0));
        let ecx = Location::Reg(RegIdx::new(1));
        let one = Const::Int(1);
        let pops = [
            PseudoOp::Load(i0, Location::Stack(StackSlot(2)), ecx),
            PseudoOp::Load(Operand::Const(one), Location::Imm(one), eax),
            PseudoOp::Store(i0, ecx, Location::Stack(StackSlot(0))),
            PseudoOp::Store(Operand::Const(one), Location::Imm(one), Location::Stack(StackSlot(1))),
            PseudoOp::Perform(OpIdx::new(1), smallvec![ecx, Location::Imm(one)], ecx),
            PseudoOp::PerformDiscard(OpIdx::new(2), smallvec![ecx]),
        ];
        let s = pops
            .iter()
            .map(|x| x.display(&t, &rf).to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            s,
            [
                "Load i0, [2] -> ecx",
                "Load $1 -> eax",
                "Store i0, ecx -> [0]",
                "Store $1 -> [1]",
                "Perform int_add(ecx, $1) -> ecx",
                "PerformDiscard finish(ecx)"
            ]
        );
        assert_eq!(
            Location::Imm(Const::Float(0.5)).display(&rf).to_string(),
            "$0.5"
        );
    }
}
