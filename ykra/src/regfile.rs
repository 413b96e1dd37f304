//! Register file descriptions.
//!
//! A [RegFile] is the read-only description of the registers the location assigner may hand out,
//! along with the [Conventions] that pin certain opcodes' operands and results to specific
//! registers. Registers not in the file (e.g. stack and frame pointers) are never touched.

use index_vec::{index_vec, IndexVec};
use std::{error::Error, fmt};

index_vec::define_index_type! {
    /// The index of a register in a [RegFile].
    pub struct RegIdx = u8;
}

impl fmt::Display for RegIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Which values a register can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegClass {
    /// General purpose registers hold integers and references.
    Gp,
    /// Floating point registers.
    Fp,
}

#[derive(Clone, Debug)]
struct Reg {
    name: &'static str,
    class: RegClass,
    /// Can the low byte of this register be read and written on its own?
    byte: bool,
}

/// The registers that specific opcodes require.
#[derive(Clone, Debug)]
pub struct Conventions {
    /// Where `int_mod` and `int_floordiv` expect their dividend. Clobbered by both.
    pub dividend: RegIdx,
    /// Where `int_mod` and `int_floordiv` expect their divisor.
    pub divisor: RegIdx,
    /// Where `int_floordiv` puts its result. Clobbered by `int_mod`.
    pub quotient: RegIdx,
    /// Where `int_mod` puts its result. Clobbered by `int_floordiv`.
    pub remainder: RegIdx,
    /// Where variable-count shifts expect their count.
    pub shift_count: RegIdx,
    /// Where calls return integers and references.
    pub call_result: RegIdx,
    /// Where calls return floats, if the register file has floating point registers.
    pub float_result: Option<RegIdx>,
}

/// An ordered pool of registers plus the conventions for using them.
#[derive(Clone, Debug)]
pub struct RegFile {
    regs: IndexVec<RegIdx, Reg>,
    conv: Conventions,
}

/// The maximum number of registers a [RegFile] can contain.
pub const MAX_REGS: usize = 64;

impl RegFile {
    /// Create a register file from `(name, class)` pairs and `conv`, checking that the
    /// conventions name registers of the right class. Every general purpose register is taken to
    /// be byte addressable: use [Self::without_byte_form] to say otherwise.
    pub fn new(
        regs: &[(&'static str, RegClass)],
        conv: Conventions,
    ) -> Result<Self, Box<dyn Error>> {
        if regs.len() > MAX_REGS {
            return Err(format!("at most {MAX_REGS} registers are supported").into());
        }
        let regs = regs
            .iter()
            .map(|&(name, class)| Reg {
                name,
                class,
                byte: class == RegClass::Gp,
            })
            .collect::<IndexVec<RegIdx, _>>();
        for (i, r) in regs.iter_enumerated() {
            if regs.iter().take(i.index()).any(|x| x.name == r.name) {
                return Err(format!("register {} appears more than once", r.name).into());
            }
        }
        let check = |what: &str, reg: RegIdx, class: RegClass| match regs.get(reg) {
            Some(r) if r.class == class => Ok(()),
            Some(r) => Err(format!("{what} register {} has the wrong class", r.name)),
            None => Err(format!("{what} register {reg} is not in the register file")),
        };
        check("dividend", conv.dividend, RegClass::Gp)?;
        check("divisor", conv.divisor, RegClass::Gp)?;
        check("quotient", conv.quotient, RegClass::Gp)?;
        check("remainder", conv.remainder, RegClass::Gp)?;
        check("shift count", conv.shift_count, RegClass::Gp)?;
        check("call result", conv.call_result, RegClass::Gp)?;
        if let Some(r) = conv.float_result {
            check("float result", r, RegClass::Fp)?;
        }
        Ok(Self { regs, conv })
    }

    /// The 32-bit x86 general purpose registers that aren't the stack or frame pointer, plus four
    /// SSE registers.
    pub fn x86_32() -> Self {
        Self {
            regs: index_vec![
                Reg::gp("eax"),
                Reg::gp("ecx"),
                Reg::gp("edx"),
                Reg::gp("ebx"),
                Reg::gp_wide("esi"),
                Reg::gp_wide("edi"),
                Reg::fp("xmm0"),
                Reg::fp("xmm1"),
                Reg::fp("xmm2"),
                Reg::fp("xmm3"),
            ],
            conv: Self::x86_conventions(Some(RegIdx::new(6))),
        }
    }

    /// Only the caller-saved x86 registers `eax`, `ecx`, and `edx`: the smallest pool that can
    /// satisfy every opcode's conventions. It has no floating point registers.
    pub fn x86_32_minimal() -> Self {
        Self {
            regs: index_vec![Reg::gp("eax"), Reg::gp("ecx"), Reg::gp("edx")],
            conv: Self::x86_conventions(None),
        }
    }

    fn x86_conventions(float_result: Option<RegIdx>) -> Conventions {
        let eax = RegIdx::new(0);
        let ecx = RegIdx::new(1);
        let edx = RegIdx::new(2);
        Conventions {
            dividend: eax,
            divisor: ecx,
            quotient: eax,
            remainder: edx,
            shift_count: ecx,
            call_result: eax,
            float_result,
        }
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    pub fn name(&self, reg: RegIdx) -> &'static str {
        self.regs[reg].name
    }

    pub fn class(&self, reg: RegIdx) -> RegClass {
        self.regs[reg].class
    }

    pub fn by_name(&self, name: &str) -> Option<RegIdx> {
        self.regs.iter_enumerated().find_map(|(i, r)| (r.name == name).then_some(i))
    }

    pub fn conv(&self) -> &Conventions {
        &self.conv
    }

    pub fn has_fp(&self) -> bool {
        self.regs.iter().any(|r| r.class == RegClass::Fp)
    }

    /// Mark the registers `names` as having no single byte form, so that 1-byte stores never read
    /// their value operand from them.
    pub fn without_byte_form(mut self, names: &[&str]) -> Result<Self, Box<dyn Error>> {
        for n in names {
            let r = self
                .by_name(n)
                .ok_or_else(|| format!("register {n} is not in the register file"))?;
            self.regs[r].byte = false;
        }
        Ok(self)
    }

    pub fn is_byte_addressable(&self, reg: RegIdx) -> bool {
        self.regs[reg].byte
    }

    /// Iterate over all registers in allocation preference order, i.e. highest index first.
    pub fn iter_pref(&self) -> impl Iterator<Item = RegIdx> + '_ {
        self.regs.indices().rev()
    }
}

impl Reg {
    fn gp(name: &'static str) -> Self {
        Reg {
            name,
            class: RegClass::Gp,
            byte: true,
        }
    }

    /// A general purpose register with no 8-bit form.
    fn gp_wide(name: &'static str) -> Self {
        Reg {
            name,
            class: RegClass::Gp,
            byte: false,
        }
    }

    fn fp(name: &'static str) -> Self {
        Reg {
            name,
            class: RegClass::Fp,
            byte: false,
        }
    }
}

/// A set of registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RegSet(u64);

impl RegSet {
    pub(crate) fn insert(&mut self, reg: RegIdx) {
        self.0 |= 1 << reg.index();
    }

    pub(crate) fn remove(&mut self, reg: RegIdx) {
        self.0 &= !(1 << reg.index());
    }

    pub(crate) fn contains(&self, reg: RegIdx) -> bool {
        self.0 & (1 << reg.index()) != 0
    }

    pub(crate) fn clear(&mut self) {
        self.0 = 0;
    }
}
