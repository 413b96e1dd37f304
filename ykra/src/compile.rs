//! The public entry point to location assignment.

use crate::{
    config::Config,
    location::{Location, PseudoOp},
    log::{log_ra, should_log_ra, Log, RAPhase, Verbosity},
    regalloc::{OpTable, RegAlloc},
    regfile::RegFile,
    trace::{OpIdx, OpKind, Trace, VarIdx},
};
use std::{fmt, sync::Arc};
use thiserror::Error;

/// The ways location assignment can fail. In all cases the trace must be discarded: partial
/// results are not reusable.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// Stack slot `slot` would be at or beyond the `max` slots the frame may have.
    #[error("stack slot {slot} exceeds the maximum frame size of {max} slots")]
    FrameOverflow { slot: u32, max: u32 },
    /// The op at `pos` needs a register that can't be freed. This indicates a defect in the
    /// register file's conventions or a register pool too small for the op.
    #[error("op {pos}: {reason}")]
    UnassignableFixedRegister { pos: OpIdx, reason: String },
    /// The op at `pos` has no handler for this register file.
    #[error("op {pos}: no handler for {opkind}")]
    UnknownOpcode { pos: OpIdx, opkind: OpKind },
    /// Something went wrong that shouldn't have, e.g. the trace isn't well formed.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// The locations of a guard's liveboxes, recorded so that a bridge can later be attached to it.
#[derive(Clone, Debug, PartialEq)]
pub struct GuardState {
    /// Each livebox, in order, and where it lives when the guard fails.
    pub locs: Vec<(VarIdx, Location)>,
    /// The number of stack slots in use when the guard fails. A bridge allocates its own slots
    /// from here upwards.
    pub frame_depth: u32,
}

/// The result of assigning locations for a trace.
#[derive(Clone, Debug)]
pub struct Allocation {
    /// The pseudo-ops to emit, in order.
    pub pseudo_ops: Vec<PseudoOp>,
    /// Where the trace expects each formal argument on entry.
    pub merge_point_locs: Vec<Location>,
    /// The state recorded at each guard, in trace order.
    pub guards: Vec<(OpIdx, GuardState)>,
    /// The number of stack slots the trace's frame needs.
    pub frame_depth: u32,
}

impl Allocation {
    /// The state recorded for the guard at `idx`, if there is one.
    pub fn guard(&self, idx: OpIdx) -> Option<&GuardState> {
        self.guards
            .iter()
            .find_map(|(gidx, gs)| (*gidx == idx).then_some(gs))
    }

    pub fn display<'a>(
        &'a self,
        trace: &'a Trace,
        regfile: &'a RegFile,
    ) -> DisplayableAllocation<'a> {
        DisplayableAllocation {
            alloc: self,
            trace,
            regfile,
        }
    }
}

pub struct DisplayableAllocation<'a> {
    alloc: &'a Allocation,
    trace: &'a Trace,
    regfile: &'a RegFile,
}

impl DisplayableAllocation<'_> {
    fn fmt_locs<'b>(
        &self,
        f: &mut fmt::Formatter<'_>,
        locs: impl Iterator<Item = (VarIdx, &'b Location)>,
    ) -> fmt::Result {
        write!(f, "[")?;
        for (i, (v, l)) in locs.enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", self.trace.var(v).name(), l.display(self.regfile))?;
        }
        writeln!(f, "]")
    }
}

impl fmt::Display for DisplayableAllocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "merge_point: ")?;
        self.fmt_locs(
            f,
            self.trace.formals().zip(self.alloc.merge_point_locs.iter()),
        )?;
        for pop in &self.alloc.pseudo_ops {
            writeln!(f, "{}", pop.display(self.trace, self.regfile))?;
        }
        for (idx, gs) in &self.alloc.guards {
            write!(f, "guard @{idx}: ")?;
            self.fmt_locs(f, gs.locs.iter().map(|(v, l)| (*v, l)))?;
        }
        writeln!(f, "frame depth: {}", self.alloc.frame_depth)
    }
}

/// A location assigner for one target's register file.
///
/// A [Backend] can be shared between threads: every compilation creates its own private
/// allocator state.
pub struct Backend {
    regfile: Arc<RegFile>,
    optable: OpTable,
    config: Config,
    log: Log,
}

impl Backend {
    pub fn new(regfile: RegFile, config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let optable = OpTable::new(&regfile);
        Ok(Self {
            regfile: Arc::new(regfile),
            optable,
            config,
            log: Log::new()?,
        })
    }

    pub fn regfile(&self) -> &RegFile {
        &self.regfile
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Assign locations for a trace that starts a new loop. If the trace ends in a jump, the
    /// jump targets the trace's own merge point.
    pub fn compile_loop(&self, trace: &Trace) -> Result<Allocation, CompilationError> {
        self.log_trace(trace);
        let r = trace
            .check_well_formed()
            .and_then(|_| RegAlloc::for_loop(trace, &self.regfile, &self.config))
            .and_then(|ra| self.run(ra));
        self.log_result(trace, &r);
        r
    }

    /// Assign locations for a bridge attached to a guard whose recorded state is `guard`. The
    /// bridge's formal arguments correspond, in order, to the guard's liveboxes. If the bridge
    /// ends in a jump, `target` must be the locations of the merge point it jumps to.
    pub fn compile_bridge(
        &self,
        trace: &Trace,
        guard: &GuardState,
        target: Option<&[Location]>,
    ) -> Result<Allocation, CompilationError> {
        self.log_trace(trace);
        let r = trace
            .check_well_formed()
            .and_then(|_| RegAlloc::for_bridge(trace, &self.regfile, &self.config, guard, target))
            .and_then(|ra| self.run(ra));
        self.log_result(trace, &r);
        r
    }

    fn run(&self, mut ra: RegAlloc) -> Result<Allocation, CompilationError> {
        ra.run(&self.optable)?;
        Ok(ra.into_allocation())
    }

    fn log_trace(&self, trace: &Trace) {
        if should_log_ra(RAPhase::Trace) {
            log_ra(&format!("--- Begin trace ---\n{trace}--- End trace ---\n"));
        }
    }

    fn log_result(&self, trace: &Trace, r: &Result<Allocation, CompilationError>) {
        match r {
            Ok(a) => {
                self.log.log(
                    Verbosity::JITEvent,
                    &format!(
                        "assigned locations: {} pseudo-ops, frame depth {}",
                        a.pseudo_ops.len(),
                        a.frame_depth
                    ),
                );
                if should_log_ra(RAPhase::PseudoOps) {
                    log_ra(&format!(
                        "--- Begin pseudo-ops ---\n{}--- End pseudo-ops ---\n",
                        a.display(trace, &self.regfile)
                    ));
                }
            }
            Err(e) => self
                .log
                .log(Verbosity::Warning, &format!("trace compilation abandoned: {e}")),
        }
    }
}
