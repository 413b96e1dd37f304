//! The trace IR consumed by the location assigner.
//!
//! A [Trace] is a linear sequence of [Op]s. Op 0 is always an [OpKind::MergePoint] whose operands
//! are the trace's formal arguments. The final op is either an [OpKind::Jump], which passes its
//! operands to a merge point, or an [OpKind::Finish], which hands its operands back to the caller.
//! Every value ([VarIdx]) is defined exactly once: either as a formal argument or as the result of
//! an op.
//!
//! Traces are usually built from their textual form with [std::str::FromStr]: see the [parser]
//! module for the syntax.

use index_vec::IndexVec;
use smallvec::SmallVec;
use std::fmt;
use strum::{Display, EnumCount, EnumIter, EnumString};

pub mod parser;
mod well_formed;

index_vec::define_index_type! {
    /// The index of a value in a [Trace].
    pub struct VarIdx = u32;
}

impl fmt::Display for VarIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

index_vec::define_index_type! {
    /// The index of an op in a [Trace].
    pub struct OpIdx = u32;
}

impl fmt::Display for OpIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// What sort of value a [Var] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Int,
    Ref,
    Float,
}

impl Kind {
    /// The prefix used for values of this kind in the textual format.
    pub fn prefix(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Ref => 'p',
            Kind::Float => 'f',
        }
    }

    pub(crate) fn from_prefix(c: char) -> Option<Self> {
        match c {
            'i' => Some(Kind::Int),
            'p' => Some(Kind::Ref),
            'f' => Some(Kind::Float),
            _ => None,
        }
    }
}

/// A trace-local value.
#[derive(Clone, Debug)]
pub struct Var {
    kind: Kind,
    name: String,
}

impl Var {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An immediate value known at allocation time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Const {
    Int(i64),
    Ptr(usize),
    Float(f64),
}

impl Const {
    /// Can this constant be encoded as a 32-bit immediate operand?
    pub fn fits_imm32(&self) -> bool {
        match self {
            Const::Int(x) => i32::try_from(*x).is_ok(),
            Const::Ptr(x) => u32::try_from(*x).is_ok(),
            Const::Float(_) => false,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Const::Int(_) => Kind::Int,
            Const::Ptr(_) => Kind::Ref,
            Const::Float(_) => Kind::Float,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(x) => write!(f, "{x}"),
            Const::Ptr(x) => write!(f, "{x:#x}"),
            // `Debug` always prints a decimal point, which is how the parser tells floats apart.
            Const::Float(x) => write!(f, "{x:?}"),
        }
    }
}

/// An operand to an [Op].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    Var(VarIdx),
    Const(Const),
}

impl Operand {
    pub fn as_var(&self) -> Option<VarIdx> {
        match self {
            Operand::Var(v) => Some(*v),
            Operand::Const(_) => None,
        }
    }
}

/// Auxiliary information about the memory an op touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descr {
    /// A field at byte offset `offset` of `size` bytes.
    Field { offset: i32, size: u8 },
    /// An array whose items start at byte offset `base` and are `item_size` bytes wide.
    Array { base: i32, item_size: u8 },
}

impl fmt::Display for Descr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descr::Field { offset, size } => write!(f, "field({offset}, {size})"),
            Descr::Array { base, item_size } => write!(f, "array({base}, {item_size})"),
        }
    }
}

/// The opcodes the location assigner understands.
#[derive(Clone, Copy, Debug, Display, EnumCount, EnumIter, EnumString, PartialEq, Eq, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    MergePoint,
    Jump,
    Finish,
    DebugMergePoint,
    DebugAssert,

    IntAdd,
    IntSub,
    IntMul,
    IntAnd,
    IntOr,
    IntXor,
    IntLshift,
    IntRshift,
    UintRshift,
    IntMod,
    IntFloordiv,
    IntNeg,
    IntInvert,
    BoolNot,

    IntLt,
    IntLe,
    IntEq,
    IntNe,
    IntGt,
    IntGe,
    UintLt,
    UintLe,
    UintGt,
    UintGe,
    PtrEq,
    PtrNe,
    IntIsTrue,
    Ooisnull,
    Oononnull,

    SameAs,
    CastIntToPtr,
    CastPtrToInt,

    GetfieldGc,
    SetfieldGc,
    GetarrayitemGc,
    SetarrayitemGc,
    ArraylenGc,
    Strlen,
    Strgetitem,
    Strsetitem,

    Call,
    New,
    NewArray,
    NewWithVtable,
    Newstr,

    GuardTrue,
    GuardFalse,
    GuardValue,
    GuardClass,
    GuardNoException,
    GuardException,

    FloatAdd,
    FloatSub,
    FloatMul,
    FloatTruediv,
    FloatNeg,
    FloatAbs,
    FloatLt,
    FloatLe,
    FloatEq,
    FloatNe,
    FloatGt,
    FloatGe,
    CastIntToFloat,
    CastFloatToInt,
}

/// Whether an op of a given [OpKind] defines a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Defines {
    Always,
    Never,
    Maybe,
}

impl OpKind {
    pub fn is_guard(self) -> bool {
        matches!(
            self,
            OpKind::GuardTrue
                | OpKind::GuardFalse
                | OpKind::GuardValue
                | OpKind::GuardClass
                | OpKind::GuardNoException
                | OpKind::GuardException
        )
    }

    /// Does this op need floating point registers?
    pub fn is_float(self) -> bool {
        matches!(
            self,
            OpKind::FloatAdd
                | OpKind::FloatSub
                | OpKind::FloatMul
                | OpKind::FloatTruediv
                | OpKind::FloatNeg
                | OpKind::FloatAbs
                | OpKind::FloatLt
                | OpKind::FloatLe
                | OpKind::FloatEq
                | OpKind::FloatNe
                | OpKind::FloatGt
                | OpKind::FloatGe
                | OpKind::CastIntToFloat
                | OpKind::CastFloatToInt
        )
    }

    /// The number of operands this op takes, or `None` if it is variadic.
    pub(crate) fn arity(self) -> Option<usize> {
        match self {
            OpKind::MergePoint
            | OpKind::Jump
            | OpKind::Finish
            | OpKind::Call
            | OpKind::DebugMergePoint => None,
            OpKind::GuardNoException => Some(0),
            OpKind::IntNeg
            | OpKind::IntInvert
            | OpKind::BoolNot
            | OpKind::IntIsTrue
            | OpKind::Ooisnull
            | OpKind::Oononnull
            | OpKind::SameAs
            | OpKind::CastIntToPtr
            | OpKind::CastPtrToInt
            | OpKind::GetfieldGc
            | OpKind::ArraylenGc
            | OpKind::Strlen
            | OpKind::New
            | OpKind::NewArray
            | OpKind::NewWithVtable
            | OpKind::Newstr
            | OpKind::DebugAssert
            | OpKind::GuardTrue
            | OpKind::GuardFalse
            | OpKind::GuardException
            | OpKind::FloatNeg
            | OpKind::FloatAbs
            | OpKind::CastIntToFloat
            | OpKind::CastFloatToInt => Some(1),
            OpKind::SetarrayitemGc | OpKind::Strsetitem => Some(3),
            _ => Some(2),
        }
    }

    pub(crate) fn defines(self) -> Defines {
        if self.is_guard() {
            if self == OpKind::GuardException {
                return Defines::Maybe;
            }
            return Defines::Never;
        }
        match self {
            OpKind::MergePoint
            | OpKind::Jump
            | OpKind::Finish
            | OpKind::DebugMergePoint
            | OpKind::DebugAssert
            | OpKind::SetfieldGc
            | OpKind::SetarrayitemGc
            | OpKind::Strsetitem => Defines::Never,
            OpKind::Call => Defines::Maybe,
            _ => Defines::Always,
        }
    }

    /// Does this op need a [Descr::Field] (`Some(true)`), a [Descr::Array] (`Some(false)`), or
    /// no descriptor at all (`None`)?
    pub(crate) fn wants_field_descr(self) -> Option<bool> {
        match self {
            OpKind::GetfieldGc | OpKind::SetfieldGc => Some(true),
            OpKind::GetarrayitemGc
            | OpKind::SetarrayitemGc
            | OpKind::ArraylenGc
            | OpKind::NewArray => Some(false),
            _ => None,
        }
    }
}

/// A single operation in a [Trace].
#[derive(Clone, Debug)]
pub struct Op {
    kind: OpKind,
    args: SmallVec<[Operand; 3]>,
    result: Option<VarIdx>,
    descr: Option<Descr>,
    liveboxes: Vec<VarIdx>,
}

impl Op {
    pub fn new(kind: OpKind, args: SmallVec<[Operand; 3]>, result: Option<VarIdx>) -> Self {
        Self {
            kind,
            args,
            result,
            descr: None,
            liveboxes: Vec::new(),
        }
    }

    pub fn with_descr(mut self, descr: Descr) -> Self {
        self.descr = Some(descr);
        self
    }

    /// Set the values that must be recoverable if this guard fails.
    pub fn with_liveboxes(mut self, liveboxes: Vec<VarIdx>) -> Self {
        self.liveboxes = liveboxes;
        self
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    pub fn result(&self) -> Option<VarIdx> {
        self.result
    }

    pub fn descr(&self) -> Option<Descr> {
        self.descr
    }

    pub fn liveboxes(&self) -> &[VarIdx] {
        &self.liveboxes
    }

    /// Iterate over the values (i.e. non-constant operands) this op reads.
    pub fn arg_vars(&self) -> impl Iterator<Item = VarIdx> + '_ {
        self.args.iter().filter_map(|x| x.as_var())
    }
}

/// A linear sequence of operations with a single entry.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    vars: IndexVec<VarIdx, Var>,
    ops: IndexVec<OpIdx, Op>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value of kind `kind` to the trace. If `name` is `None`, a name is derived from the
    /// value's kind and index.
    pub fn push_var(&mut self, kind: Kind, name: Option<&str>) -> VarIdx {
        let name = match name {
            Some(x) => x.to_owned(),
            None => format!("{}{}", kind.prefix(), self.vars.len()),
        };
        self.vars.push(Var { kind, name })
    }

    pub fn push_op(&mut self, op: Op) -> OpIdx {
        self.ops.push(op)
    }

    pub fn var(&self, idx: VarIdx) -> &Var {
        &self.vars[idx]
    }

    pub fn vars_len(&self) -> usize {
        self.vars.len()
    }

    pub fn op(&self, idx: OpIdx) -> &Op {
        &self.ops[idx]
    }

    pub fn ops(&self) -> impl Iterator<Item = (OpIdx, &Op)> {
        self.ops.iter_enumerated()
    }

    pub fn ops_len(&self) -> usize {
        self.ops.len()
    }

    /// The trace's formal arguments, i.e. the operands of op 0.
    pub fn formals(&self) -> impl Iterator<Item = VarIdx> + '_ {
        self.ops
            .raw
            .first()
            .into_iter()
            .flat_map(|x| x.arg_vars())
    }

    /// The trace's final op.
    pub fn terminator(&self) -> Option<&Op> {
        self.ops.raw.last()
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, x: &Operand) -> fmt::Result {
        match x {
            Operand::Var(v) => write!(f, "{}", self.vars[*v].name),
            Operand::Const(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, op) in self.ops.iter_enumerated() {
            if idx == OpIdx::new(0) {
                write!(f, "[")?;
                for (i, x) in op.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    self.fmt_operand(f, x)?;
                }
                writeln!(f, "]")?;
                continue;
            }
            if let Some(v) = op.result {
                write!(f, "{} = ", self.vars[v].name)?;
            }
            write!(f, "{}(", op.kind)?;
            for (i, x) in op.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                self.fmt_operand(f, x)?;
            }
            if let Some(d) = op.descr {
                if !op.args.is_empty() {
                    write!(f, ", ")?;
                }
                write!(f, "descr={d}")?;
            }
            write!(f, ")")?;
            if op.kind.is_guard() {
                write!(f, " [")?;
                for (i, v) in op.liveboxes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.vars[*v].name)?;
                }
                write!(f, "]")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn opkind_names() {
        assert_eq!(OpKind::IntAdd.to_string(), "int_add");
        assert_eq!(OpKind::UintRshift.to_string(), "uint_rshift");
        assert_eq!(OpKind::GetarrayitemGc.to_string(), "getarrayitem_gc");
        assert_eq!(OpKind::from_str("guard_no_exception"), Ok(OpKind::GuardNoException));
        assert_eq!(OpKind::from_str("cast_int_to_float"), Ok(OpKind::CastIntToFloat));
        assert!(OpKind::from_str("int_frobnicate").is_err());
        // Every name must survive a trip through the parser's opcode lookup.
        for k in OpKind::iter() {
            assert_eq!(OpKind::from_str(&k.to_string()), Ok(k));
        }
    }

    #[test]
    fn consts() {
        assert!(Const::Int(i64::from(i32::MIN)).fits_imm32());
        assert!(!Const::Int(i64::from(i32::MAX) + 1).fits_imm32());
        assert!(!Const::Float(0.0).fits_imm32());
        assert_eq!(Const::Float(2.0).to_string(), "2.0");
        assert_eq!(Const::Ptr(255).to_string(), "0xff");
    }

    #[test]
    fn display() {
        let src = "[i0, p1]
i2 = getfield_gc(p1, descr=field(8, 4))
i3 = int_add(i0, i2)
i4 = int_lt(i3, 20)
guard_true(i4) [i0, i3]
jump(i3, p1)
";
        let t = Trace::from_str(src).unwrap();
        assert_eq!(t.to_string(), src);
        assert_eq!(t.formals().count(), 2);
        assert_eq!(t.terminator().map(|x| x.kind()), Some(OpKind::Jump));
    }
}
