//! Per-opcode location assignment.
//!
//! Each handler establishes the locations its op's encoding accepts, records a `Perform` or
//! `PerformDiscard` pseudo-op, and leaves releasing dead values to [RegAlloc::end_op].

use super::RegAlloc;
use crate::{
    compile::{CompilationError, GuardState},
    location::Location,
    regfile::RegFile,
    trace::{Const, Descr, Kind, Op, OpIdx, OpKind, Operand},
};
use smallvec::{smallvec, SmallVec};
use strum::{EnumCount, IntoEnumIterator};

type Handler = fn(&mut RegAlloc<'_>, OpIdx, &Op) -> Result<(), CompilationError>;

/// The handlers available for a given register file. Float opcodes have no handler on a register
/// file without floating point registers.
pub(crate) struct OpTable {
    handlers: [Option<Handler>; OpKind::COUNT],
}

impl OpTable {
    pub(crate) fn new(regfile: &RegFile) -> Self {
        let mut handlers = [None; OpKind::COUNT];
        for k in OpKind::iter() {
            if k.is_float() && !regfile.has_fp() {
                continue;
            }
            handlers[k as usize] = handler_for(k);
        }
        Self { handlers }
    }

    pub(crate) fn handler(&self, kind: OpKind) -> Option<Handler> {
        self.handlers[kind as usize]
    }
}

fn handler_for(kind: OpKind) -> Option<Handler> {
    match kind {
        // The merge point is dealt with before any handler runs.
        OpKind::MergePoint => None,
        OpKind::Jump => Some(jump),
        OpKind::Finish => Some(finish),
        OpKind::DebugMergePoint | OpKind::DebugAssert => Some(no_code),
        OpKind::IntAdd
        | OpKind::IntSub
        | OpKind::IntMul
        | OpKind::IntAnd
        | OpKind::IntOr
        | OpKind::IntXor
        | OpKind::FloatAdd
        | OpKind::FloatSub
        | OpKind::FloatMul
        | OpKind::FloatTruediv => Some(binop),
        OpKind::IntLshift | OpKind::IntRshift | OpKind::UintRshift => Some(shift),
        OpKind::IntMod | OpKind::IntFloordiv => Some(division),
        OpKind::IntNeg
        | OpKind::IntInvert
        | OpKind::BoolNot
        | OpKind::FloatNeg
        | OpKind::FloatAbs => Some(unary_in_place),
        OpKind::IntLt
        | OpKind::IntLe
        | OpKind::IntEq
        | OpKind::IntNe
        | OpKind::IntGt
        | OpKind::IntGe
        | OpKind::UintLt
        | OpKind::UintLe
        | OpKind::UintGt
        | OpKind::UintGe
        | OpKind::PtrEq
        | OpKind::PtrNe => Some(cmp),
        OpKind::FloatLt
        | OpKind::FloatLe
        | OpKind::FloatEq
        | OpKind::FloatNe
        | OpKind::FloatGt
        | OpKind::FloatGe => Some(float_cmp),
        OpKind::IntIsTrue | OpKind::Ooisnull | OpKind::Oononnull | OpKind::Strlen => {
            Some(read_reg)
        }
        OpKind::SameAs | OpKind::CastIntToPtr | OpKind::CastPtrToInt => Some(copy),
        OpKind::CastIntToFloat | OpKind::CastFloatToInt => Some(float_cast),
        OpKind::GetfieldGc => Some(getfield),
        OpKind::SetfieldGc => Some(setfield),
        OpKind::GetarrayitemGc => Some(getarrayitem),
        OpKind::SetarrayitemGc => Some(setarrayitem),
        OpKind::ArraylenGc => Some(arraylen),
        OpKind::Strgetitem => Some(strgetitem),
        OpKind::Strsetitem => Some(strsetitem),
        OpKind::Call | OpKind::New | OpKind::NewArray | OpKind::NewWithVtable => Some(call),
        OpKind::Newstr => Some(newstr),
        OpKind::GuardTrue
        | OpKind::GuardFalse
        | OpKind::GuardValue
        | OpKind::GuardClass
        | OpKind::GuardNoException
        | OpKind::GuardException => Some(guard),
    }
}

impl RegAlloc<'_> {
    fn args2<'b>(&self, op: &'b Op) -> Result<(&'b Operand, &'b Operand), CompilationError> {
        match op.args() {
            [x, y] => Ok((x, y)),
            _ => Err(self.internal(&format!("{} expects two operands", op.kind()))),
        }
    }

    fn arg1<'b>(&self, op: &'b Op) -> Result<&'b Operand, CompilationError> {
        match op.args() {
            [x] => Ok(x),
            _ => Err(self.internal(&format!("{} expects one operand", op.kind()))),
        }
    }

    fn field_descr(&self, op: &Op) -> Result<(i32, u8), CompilationError> {
        match op.descr() {
            Some(Descr::Field { offset, size }) => Ok((offset, size)),
            _ => Err(self.internal(&format!("{} needs a field descriptor", op.kind()))),
        }
    }

    fn array_descr(&self, op: &Op) -> Result<(i32, u8), CompilationError> {
        match op.descr() {
            Some(Descr::Array { base, item_size }) => Ok((base, item_size)),
            _ => Err(self.internal(&format!("{} needs an array descriptor", op.kind()))),
        }
    }
}

fn imm(x: impl Into<i64>) -> Location {
    Location::Imm(Const::Int(x.into()))
}

fn jump(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    ra.reconcile_jump(idx, op)
}

fn finish(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let locs = op
        .args()
        .iter()
        .map(|x| ra.opnd_loc(x))
        .collect::<Result<SmallVec<_>, _>>()?;
    ra.perform(idx, locs, None);
    ra.release_all(false)
}

/// Ops that generate no code. Their operands are released like any other op's.
fn no_code(_: &mut RegAlloc<'_>, _: OpIdx, _: &Op) -> Result<(), CompilationError> {
    Ok(())
}

/// Two-address arithmetic: the result overwrites the left operand.
fn binop(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (lhs, rhs) = ra.args2(op)?;
    let rhs = ra.imm_or_loc(rhs)?;
    let r = ra.force_result_in_reg(res, lhs)?;
    ra.perform(idx, smallvec![Location::Reg(r), rhs], Some(r));
    Ok(())
}

/// A shift by a variable amount needs the amount in the shift count register.
fn shift(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (lhs, rhs) = ra.args2(op)?;
    let count = match rhs {
        Operand::Const(c) => Location::Imm(*c),
        Operand::Var(v) => {
            let sc = ra.regfile.conv().shift_count;
            Location::Reg(ra.make_sure_var_in_reg(*v, Some(sc))?)
        }
    };
    let r = ra.force_result_in_reg(res, lhs)?;
    ra.perform(idx, smallvec![Location::Reg(r), count], Some(r));
    Ok(())
}

/// Division takes its operands in fixed registers, puts the quotient and remainder in fixed
/// registers, and clobbers the dividend.
fn division(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (lhs, rhs) = ra.args2(op)?;
    let conv = ra.regfile.conv().clone();
    let (res_reg, other) = match op.kind() {
        OpKind::IntMod => (conv.remainder, conv.quotient),
        _ => (conv.quotient, conv.remainder),
    };
    let dividend = ra.reg_for(lhs, Some(conv.dividend))?;
    let divisor = ra.reg_for(rhs, Some(conv.divisor))?;
    for r in [dividend, other] {
        if r != res_reg {
            ra.clobber(r)?;
        }
    }
    let r = ra.alloc_result(res, Some(res_reg))?;
    ra.perform(
        idx,
        smallvec![Location::Reg(dividend), Location::Reg(divisor)],
        Some(r),
    );
    Ok(())
}

fn unary_in_place(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let arg = ra.arg1(op)?;
    let r = ra.force_result_in_reg(res, arg)?;
    ra.perform(idx, smallvec![Location::Reg(r)], Some(r));
    Ok(())
}

/// Integer comparisons: at least one side must be a register.
fn cmp(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (lhs, rhs) = ra.args2(op)?;
    let mut a = ra.imm_or_loc(lhs)?;
    let b = ra.imm_or_loc(rhs)?;
    if !a.is_reg() && !b.is_reg() {
        a = Location::Reg(ra.reg_for(lhs, None)?);
    }
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![a, b], Some(r));
    Ok(())
}

/// Float comparisons: the left side must be in a register, the right side in a register or a
/// stack slot. The result is an integer.
fn float_cmp(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (lhs, rhs) = ra.args2(op)?;
    let a = ra.reg_for(lhs, None)?;
    let b = ra.loc_or_reg(rhs)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![Location::Reg(a), b], Some(r));
    Ok(())
}

/// Ops that read their only operand from a register, e.g. `int_is_true` and `strlen`.
fn read_reg(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let a = ra.reg_for(ra.arg1(op)?, None)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![Location::Reg(a)], Some(r));
    Ok(())
}

/// Ops that copy their operand, possibly reinterpreting it. An operand that dies here in a
/// register simply becomes the result, with no code.
fn copy(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let arg = ra.arg1(op)?;
    if let Some(v) = arg.as_var() {
        if ra.rebind_dying(v, res).is_some() {
            return Ok(());
        }
    }
    let a = ra.imm_or_loc(arg)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![a], Some(r));
    Ok(())
}

/// Conversions between integers and floats: the result is in the other register class, so it
/// can't reuse the operand's register.
fn float_cast(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let a = ra.loc_or_reg(ra.arg1(op)?)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![a], Some(r));
    Ok(())
}

fn getfield(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (ofs, size) = ra.field_descr(op)?;
    let base = ra.reg_for(ra.arg1(op)?, None)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(
        idx,
        smallvec![Location::Reg(base), imm(ofs), imm(size)],
        Some(r),
    );
    Ok(())
}

fn setfield(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let (ofs, size) = ra.field_descr(op)?;
    let (base, val) = ra.args2(op)?;
    let base = ra.reg_for(base, None)?;
    let val = match size {
        1 => ra.byte_imm_or_reg(val)?,
        _ => ra.imm_or_reg(val)?,
    };
    ra.perform(
        idx,
        smallvec![Location::Reg(base), imm(ofs), imm(size), val],
        None,
    );
    Ok(())
}

fn getarrayitem(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (abase, item_size) = ra.array_descr(op)?;
    let (base, index) = ra.args2(op)?;
    let base = ra.reg_for(base, None)?;
    let index = ra.imm_or_reg(index)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(
        idx,
        smallvec![Location::Reg(base), index, imm(abase), imm(item_size)],
        Some(r),
    );
    Ok(())
}

fn setarrayitem(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let (abase, item_size) = ra.array_descr(op)?;
    let [base, index, val] = op.args() else {
        return Err(ra.internal("setarrayitem_gc expects three operands"));
    };
    let base = ra.reg_for(base, None)?;
    let index = ra.imm_or_reg(index)?;
    let val = match item_size {
        1 => ra.byte_imm_or_reg(val)?,
        _ => ra.imm_or_reg(val)?,
    };
    let mut locs: SmallVec<[Location; 4]> = smallvec![Location::Reg(base), index, val];
    locs.push(imm(abase));
    locs.push(imm(item_size));
    ra.perform(idx, locs, None);
    Ok(())
}

fn arraylen(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (abase, _) = ra.array_descr(op)?;
    let base = ra.reg_for(ra.arg1(op)?, None)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![Location::Reg(base), imm(abase)], Some(r));
    Ok(())
}

fn strgetitem(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let (base, index) = ra.args2(op)?;
    let base = ra.reg_for(base, None)?;
    let index = ra.imm_or_reg(index)?;
    ra.free_dying_operands(op);
    let r = ra.alloc_result(res, None)?;
    ra.perform(idx, smallvec![Location::Reg(base), index], Some(r));
    Ok(())
}

/// Characters are single bytes, so the stored value must be in a byte addressable register.
fn strsetitem(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let [base, index, val] = op.args() else {
        return Err(ra.internal("strsetitem expects three operands"));
    };
    let base = ra.reg_for(base, None)?;
    let index = ra.imm_or_reg(index)?;
    let val = ra.byte_imm_or_reg(val)?;
    ra.perform(idx, smallvec![Location::Reg(base), index, val], None);
    Ok(())
}

/// Calls clobber every register: values still needed afterwards are stored first.
fn call(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let locs = match op.kind() {
        OpKind::NewArray => {
            let (abase, item_size) = ra.array_descr(op)?;
            let len = ra.opnd_loc(ra.arg1(op)?)?;
            smallvec![imm(abase), imm(item_size), len]
        }
        _ => op
            .args()
            .iter()
            .map(|x| ra.opnd_loc(x))
            .collect::<Result<SmallVec<_>, _>>()?,
    };
    ra.release_all(true)?;
    match op.result() {
        Some(v) => {
            let rr = match ra.trace.var(v).kind() {
                Kind::Float => ra
                    .regfile
                    .conv()
                    .float_result
                    .ok_or_else(|| ra.internal("no register for float results"))?,
                Kind::Int | Kind::Ref => ra.regfile.conv().call_result,
            };
            let r = ra.alloc_result(v, Some(rr))?;
            ra.perform(idx, locs, Some(r));
        }
        None => ra.perform(idx, locs, None),
    }
    Ok(())
}

/// `newstr` is a call followed by storing the length into the new string. It is recorded as two
/// pseudo-ops: the call, which reads the length from where it was before the call, then a
/// `PerformDiscard` whose operands are the string and the length reloaded after the call.
fn newstr(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let res = ra.result_of(op)?;
    let len = ra.arg1(op)?;
    if let Some(v) = len.as_var() {
        // Registers don't survive the call, but the length is needed after it.
        ra.spill_var(v)?;
    }
    let before = ra.opnd_loc(len)?;
    ra.release_all(true)?;
    let rr = ra.regfile.conv().call_result;
    let s = ra.alloc_result(res, Some(rr))?;
    ra.perform(idx, smallvec![before], Some(s));
    let after = ra.imm_or_reg(len)?;
    ra.perform(idx, smallvec![Location::Reg(s), after], None);
    Ok(())
}

fn guard(ra: &mut RegAlloc<'_>, idx: OpIdx, op: &Op) -> Result<(), CompilationError> {
    let mut res = None;
    let locs: SmallVec<[Location; 4]> = match op.kind() {
        OpKind::GuardTrue | OpKind::GuardFalse => {
            smallvec![Location::Reg(ra.reg_for(ra.arg1(op)?, None)?)]
        }
        OpKind::GuardValue => {
            // A value compared against a constant can stay where it is. Compared against
            // another value, it must be in a register.
            let (x, y) = ra.args2(op)?;
            let x = match (x, y) {
                (Operand::Var(v), Operand::Const(_)) => ra.loc(*v)?,
                _ => Location::Reg(ra.reg_for(x, None)?),
            };
            let y = match y {
                Operand::Const(c) if c.fits_imm32() => Location::Imm(*c),
                Operand::Const(_) => Location::Reg(ra.reg_for(y, None)?),
                Operand::Var(v) => ra.loc(*v)?,
            };
            smallvec![x, y]
        }
        OpKind::GuardClass => {
            let (x, y) = ra.args2(op)?;
            let x = ra.reg_for(x, None)?;
            let y = ra.imm_or_reg(y)?;
            smallvec![Location::Reg(x), y]
        }
        OpKind::GuardNoException => SmallVec::new(),
        OpKind::GuardException => {
            let cls = ra.imm_or_reg(ra.arg1(op)?)?;
            if let Some(v) = op.result() {
                res = Some(ra.alloc_result(v, None)?);
            }
            smallvec![cls]
        }
        k => return Err(ra.internal(&format!("{k} is not a guard"))),
    };
    ra.perform(idx, locs, res);
    let locs = op
        .liveboxes()
        .iter()
        .map(|v| ra.loc(*v).map(|l| (*v, l)))
        .collect::<Result<Vec<_>, _>>()?;
    ra.guards.push((
        idx,
        GuardState {
            locs,
            frame_depth: ra.stack_depth,
        },
    ));
    Ok(())
}

impl RegAlloc<'_> {
    /// A register or stack slot for `o`. Constants are materialised in a register.
    fn loc_or_reg(&mut self, o: &Operand) -> Result<Location, CompilationError> {
        match o {
            Operand::Var(v) => self.loc(*v),
            Operand::Const(c) => Ok(Location::Reg(self.materialise(*c, None)?)),
        }
    }
}
