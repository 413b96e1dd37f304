//! Helpers shared by the location assignment test suite, its tools, and its benchmarks.

use std::{error::Error, fmt::Write, str::FromStr};
use ykra::{
    Backend,
    regfile::RegFile,
    trace::{OpIdx, Trace},
};

/// The marker that starts a bridge section in a test file: `--- bridge <guard op index>`.
const BRIDGE_MARKER: &str = "--- bridge ";

/// Look up one of the built-in register files by name.
pub fn regfile(name: &str) -> Result<RegFile, Box<dyn Error>> {
    match name {
        "x86_32" => Ok(RegFile::x86_32()),
        "x86_32_minimal" => Ok(RegFile::x86_32_minimal()),
        _ => Err(format!("unknown register file '{name}'").into()),
    }
}

/// Split `src` into the loop's source and the source of each bridge, along with the index of the
/// guard in the loop that each bridge is attached to.
pub fn sections(src: &str) -> Result<(String, Vec<(usize, String)>), Box<dyn Error>> {
    let mut lp = String::new();
    let mut bridges: Vec<(usize, String)> = Vec::new();
    for l in src.lines() {
        if let Some(x) = l.trim().strip_prefix(BRIDGE_MARKER) {
            let gidx = x
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("Invalid bridge marker '{l}': {e}"))?;
            bridges.push((gidx, String::new()));
            continue;
        }
        let buf = match bridges.last_mut() {
            Some((_, b)) => b,
            None => &mut lp,
        };
        buf.push_str(l);
        buf.push('\n');
    }
    Ok((lp, bridges))
}

/// Assign locations for the loop and bridges in `src` and return a textual dump of the results.
pub fn dump_regalloc(backend: &Backend, src: &str) -> Result<String, Box<dyn Error>> {
    let (lp, bridges) = sections(src)?;
    let lt = Trace::from_str(&lp)?;
    let la = backend.compile_loop(&lt)?;
    let mut out = String::new();
    write!(out, "--- loop\n{}", la.display(&lt, backend.regfile()))?;
    for (gidx, bsrc) in bridges {
        let bt = Trace::from_str(&bsrc)?;
        let gs = la
            .guard(OpIdx::new(gidx))
            .ok_or_else(|| format!("op {gidx} of the loop is not a guard"))?;
        let ba = backend.compile_bridge(&bt, gs, Some(&la.merge_point_locs))?;
        write!(out, "--- bridge {gidx}\n{}", ba.display(&bt, backend.regfile()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split() {
        let (lp, bridges) =
            sections("[i0]\nfinish(i0)\n--- bridge 3\n[i1]\n--- bridge 5\n").unwrap();
        assert_eq!(lp, "[i0]\nfinish(i0)\n");
        assert_eq!(bridges, [(3, "[i1]\n".to_owned()), (5, String::new())]);
        assert!(sections("--- bridge x").is_err());
    }
}
