//! A parser for the textual trace format.
//!
//! ```text
//! ; A comment.
//! [i0, p1]                        ; The merge point: the trace's formal arguments.
//! i2 = getfield_gc(p1, descr=field(8, 4))
//! i3 = int_add(i0, i2)
//! i4 = int_lt(i3, 100)
//! guard_true(i4) [i0, i3]         ; A guard's liveboxes can be listed in brackets...
//! guard_false(i4)
//!     fail(i0, i3)                ; ...or on a following `fail` line.
//! jump(i3, p1)                    ; Or `finish(...)`.
//! ```
//!
//! Values are named by a kind prefix (`i` for integers, `p` for references, `f` for floats)
//! followed by digits. Constants are decimal integers (`-3`), hex pointers (`0x10`), or floats
//! with a decimal point (`1.5`).

use super::{Const, Descr, Kind, Op, OpKind, Operand, Trace, VarIdx};
use regex::Regex;
use smallvec::SmallVec;
use std::{collections::HashMap, error::Error, str::FromStr, sync::LazyLock};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[(.*)\]$").unwrap());
static OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([A-Za-z]\w*)\s*=\s*)?([a-z_]+)\((.*)\)\s*(?:\[(.*)\])?$").unwrap()
});
static FAIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^fail\((.*)\)$").unwrap());
static VAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ipf]\d+$").unwrap());
static DESCR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^descr=(field|array)\((-?\d+),\s*(\d+)\)$").unwrap());
static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());
static PTR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0x([0-9a-fA-F]+)$").unwrap());
static FLOAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());

const COMMENT: char = ';';

impl FromStr for Trace {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trace = Parser::default().parse(s)?;
        trace.check_well_formed()?;
        Ok(trace)
    }
}

#[derive(Default)]
struct Parser {
    trace: Trace,
    names: HashMap<String, VarIdx>,
}

impl Parser {
    fn parse(mut self, s: &str) -> Result<Trace, Box<dyn Error>> {
        for (i, line) in s.lines().enumerate() {
            let line = match line.find(COMMENT) {
                Some(j) => &line[..j],
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            self.line(line)
                .map_err(|e| format!("line {}: {e}", i + 1))?;
        }
        if self.trace.ops.is_empty() {
            return Err("trace is empty".into());
        }
        Ok(self.trace)
    }

    fn line(&mut self, line: &str) -> Result<(), Box<dyn Error>> {
        if self.trace.ops.is_empty() {
            let caps = HEADER_RE
                .captures(line)
                .ok_or("expected a merge point of the form `[<value>, ...]`")?;
            let mut args = SmallVec::new();
            for x in split_args(&caps[1]) {
                args.push(Operand::Var(self.define(x)?));
            }
            self.trace.push_op(Op::new(OpKind::MergePoint, args, None));
        } else if let Some(caps) = FAIL_RE.captures(line) {
            let liveboxes = self.liveboxes(&caps[1])?;
            let op = self
                .trace
                .ops
                .raw
                .last_mut()
                .ok_or("`fail` must follow a guard")?;
            if !op.kind.is_guard() {
                return Err(format!("`fail` must follow a guard, not {}", op.kind).into());
            }
            if !op.liveboxes.is_empty() {
                return Err("guard already has liveboxes".into());
            }
            op.liveboxes = liveboxes;
        } else if let Some(caps) = OP_RE.captures(line) {
            let kind = OpKind::from_str(&caps[2])
                .map_err(|_| format!("unknown opcode `{}`", &caps[2]))?;
            if kind == OpKind::MergePoint {
                return Err("a merge point can only start a trace".into());
            }
            let mut args = SmallVec::new();
            let mut descr = None;
            for x in split_args(&caps[3]) {
                if x.starts_with("descr=") {
                    if descr.is_some() {
                        return Err("duplicate `descr`".into());
                    }
                    descr = Some(parse_descr(x)?);
                } else {
                    args.push(self.operand(x)?);
                }
            }
            let liveboxes = match caps.get(4) {
                Some(x) => {
                    if !kind.is_guard() {
                        return Err(
                            format!("{kind} is not a guard and can't have liveboxes").into()
                        );
                    }
                    self.liveboxes(x.as_str())?
                }
                None => Vec::new(),
            };
            // The result must be defined after the operands are resolved so that `i1 = f(i1)`
            // is rejected.
            let result = match caps.get(1) {
                Some(x) => Some(self.define(x.as_str())?),
                None => None,
            };
            let mut op = Op::new(kind, args, result).with_liveboxes(liveboxes);
            if let Some(d) = descr {
                op = op.with_descr(d);
            }
            self.trace.push_op(op);
        } else {
            return Err(format!("can't parse `{line}`").into());
        }
        Ok(())
    }

    fn define(&mut self, name: &str) -> Result<VarIdx, Box<dyn Error>> {
        if !VAR_RE.is_match(name) {
            return Err(format!("`{name}` is not a valid value name").into());
        }
        if self.names.contains_key(name) {
            return Err(format!("`{name}` is defined more than once").into());
        }
        // `VAR_RE` guarantees that the first character is a valid prefix.
        let kind = name
            .chars()
            .next()
            .and_then(Kind::from_prefix)
            .ok_or_else(|| format!("`{name}` has no kind prefix"))?;
        let v = self.trace.push_var(kind, Some(name));
        self.names.insert(name.to_owned(), v);
        Ok(v)
    }

    fn lookup(&self, name: &str) -> Result<VarIdx, Box<dyn Error>> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| format!("use of undefined value `{name}`").into())
    }

    fn operand(&self, s: &str) -> Result<Operand, Box<dyn Error>> {
        if VAR_RE.is_match(s) {
            Ok(Operand::Var(self.lookup(s)?))
        } else if INT_RE.is_match(s) {
            Ok(Operand::Const(Const::Int(s.parse::<i64>()?)))
        } else if let Some(caps) = PTR_RE.captures(s) {
            Ok(Operand::Const(Const::Ptr(usize::from_str_radix(&caps[1], 16)?)))
        } else if FLOAT_RE.is_match(s) {
            Ok(Operand::Const(Const::Float(s.parse::<f64>()?)))
        } else {
            Err(format!("can't parse operand `{s}`").into())
        }
    }

    fn liveboxes(&self, s: &str) -> Result<Vec<VarIdx>, Box<dyn Error>> {
        split_args(s).into_iter().map(|x| self.lookup(x)).collect()
    }
}

fn parse_descr(s: &str) -> Result<Descr, Box<dyn Error>> {
    let caps = DESCR_RE
        .captures(s)
        .ok_or_else(|| format!("can't parse descriptor `{s}`"))?;
    let x = caps[2].parse::<i32>()?;
    let y = caps[3].parse::<u8>()?;
    Ok(match &caps[1] {
        "field" => Descr::Field { offset: x, size: y },
        _ => Descr::Array {
            base: x,
            item_size: y,
        },
    })
}

/// Split a comma separated list, ignoring commas nested inside parentheses.
fn split_args(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
    }
    out.push(s[start..].trim());
    if out.len() == 1 && out[0].is_empty() {
        out.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::OpIdx;

    #[test]
    fn split() {
        assert!(split_args("").is_empty());
        assert!(split_args("  ").is_empty());
        assert_eq!(split_args("i0"), ["i0"]);
        assert_eq!(
            split_args("p0, descr=field(8, 4), i1"),
            ["p0", "descr=field(8, 4)", "i1"]
        );
    }

    #[test]
    fn simple() {
        let t = Trace::from_str(
            "
          ; leading comment
          [i0, p1, f2]
          i3 = int_add(i0, -1)   ; trailing comment
          p4 = same_as(0x10)
          f5 = float_add(f2, 1.5)
          finish(i3, p4, f5)
        ",
        )
        .unwrap();
        assert_eq!(t.ops_len(), 5);
        assert_eq!(t.vars_len(), 6);
        assert_eq!(t.var(VarIdx::new(1)).kind(), Kind::Ref);
        assert_eq!(t.var(VarIdx::new(5)).name(), "f5");
        let op = t.op(OpIdx::new(1));
        assert_eq!(op.kind(), OpKind::IntAdd);
        assert_eq!(
            op.args(),
            [Operand::Var(VarIdx::new(0)), Operand::Const(Const::Int(-1))]
        );
        assert_eq!(op.result(), Some(VarIdx::new(3)));
        assert_eq!(
            t.op(OpIdx::new(2)).args(),
            [Operand::Const(Const::Ptr(16))]
        );
        assert_eq!(
            t.op(OpIdx::new(3)).args()[1],
            Operand::Const(Const::Float(1.5))
        );
    }

    #[test]
    fn liveboxes() {
        let t = Trace::from_str(
            "
          [i0, i1]
          i2 = int_lt(i0, i1)
          guard_true(i2) [i0, i1]
          guard_false(i2)
              fail(i1)
          guard_no_exception()
          finish()
        ",
        )
        .unwrap();
        assert_eq!(
            t.op(OpIdx::new(2)).liveboxes(),
            [VarIdx::new(0), VarIdx::new(1)]
        );
        assert_eq!(t.op(OpIdx::new(3)).liveboxes(), [VarIdx::new(1)]);
        assert!(t.op(OpIdx::new(4)).liveboxes().is_empty());
    }

    #[test]
    fn descrs() {
        let t = Trace::from_str(
            "
          [p0, i1]
          i2 = getarrayitem_gc(p0, i1, descr=array(-8, 4))
          setfield_gc(p0, i2, descr=field(16, 8))
          finish()
        ",
        )
        .unwrap();
        assert_eq!(
            t.op(OpIdx::new(1)).descr(),
            Some(Descr::Array {
                base: -8,
                item_size: 4
            })
        );
        assert_eq!(
            t.op(OpIdx::new(2)).descr(),
            Some(Descr::Field {
                offset: 16,
                size: 8
            })
        );
        assert_eq!(t.op(OpIdx::new(2)).args().len(), 2);
    }

    #[test]
    fn errors() {
        fn err(s: &str) -> String {
            Trace::from_str(s).unwrap_err().to_string()
        }
        assert_eq!(err(""), "trace is empty");
        assert_eq!(
            err("i0 = int_add(1, 2)"),
            "line 1: expected a merge point of the form `[<value>, ...]`"
        );
        assert_eq!(
            err("[i0]\ni1 = int_add(i0, i9)\nfinish()"),
            "line 2: use of undefined value `i9`"
        );
        assert_eq!(
            err("[i0]\ni0 = int_add(i0, 1)\nfinish()"),
            "line 2: `i0` is defined more than once"
        );
        assert_eq!(
            err("[i0]\ni1 = int_frob(i0)\nfinish()"),
            "line 2: unknown opcode `int_frob`"
        );
        assert_eq!(
            err("[i0]\ni1 = int_neg(i0)\nfail(i0)\nfinish()"),
            "line 3: `fail` must follow a guard, not int_neg"
        );
        assert_eq!(
            err("[i0]\ni1 = int_neg(i0) [i0]\nfinish()"),
            "line 2: int_neg is not a guard and can't have liveboxes"
        );
        assert_eq!(
            err("[i0]\nx1 = int_neg(i0)\nfinish()"),
            "line 2: `x1` is not a valid value name"
        );
        assert_eq!(
            err("[i0]\ni1 = int_neg(i0, descr=struct(1, 2))\nfinish()"),
            "line 2: can't parse descriptor `descr=struct(1, 2)`"
        );
    }
}
