//! Location assignment for the machine code backend of a meta-tracing JIT.
//!
//! Given a linear [trace::Trace] and a [regfile::RegFile], a [Backend] decides where every value
//! lives at every point of the trace (a register, a stack slot, or an immediate), and produces the
//! [location::PseudoOp]s a code emitter needs to realise those decisions. Traces that start a loop
//! are compiled with [Backend::compile_loop]; bridges attached to a failing guard are compiled with
//! [Backend::compile_bridge], starting from the [GuardState] recorded for that guard.

pub mod compile;
pub mod config;
pub mod liveness;
pub mod location;
mod log;
mod regalloc;
pub mod regfile;
pub mod trace;

pub use compile::{Allocation, Backend, CompilationError, GuardState};
