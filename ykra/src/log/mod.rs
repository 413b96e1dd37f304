//! The implementation of the `YKD_LOG` and `YKD_LOG_RA` environment variables.
//!
//! `YKD_LOG_RA` is only meaningfully available when the `ykd` feature is enabled: otherwise we
//! expose no-op functions.

use std::{env, error::Error, fs::File, io::Write, path::PathBuf};
use strum::{EnumCount, FromRepr};

/// How verbose should the backend's normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings, including abandoned trace compilations.
    Warning,
    /// Log JIT events (e.g. a trace's locations being assigned).
    JITEvent,
}

#[derive(Debug)]
pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. A value of `None` means stderr.
    path: Option<PathBuf>,
}

impl Log {
    pub(crate) fn new() -> Result<Self, Box<dyn Error>> {
        match env::var("YKD_LOG") {
            Ok(s) => Self::from_spec(&s),
            Err(_) => Ok(Self {
                path: None,
                level: Verbosity::Error,
            }),
        }
    }

    fn from_spec(s: &str) -> Result<Self, Box<dyn Error>> {
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // Truncate any existing log file so that we don't append to a previous run's
                    // log.
                    File::create(&path).ok();
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => return Err("YKD_LOG must be of the format `[<path|->:]<level>`".into()),
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid YKD_LOG level '{s}': {e}"))?;
        let max_level = Verbosity::COUNT - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("YKD_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self { path, level })
    }

    /// Log `msg` with the [Verbosity] level `level`. Logging at [Verbosity::Disabled] does
    /// nothing.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if level == Verbosity::Disabled || level > self.level {
            return;
        }
        let prefix = match level {
            Verbosity::Disabled => return,
            Verbosity::Error => "yk-error",
            Verbosity::Warning => "yk-warning",
            Verbosity::JITEvent => "yk-jit-event",
        };
        match &self.path {
            Some(p) => {
                let s = format!("{prefix}: {msg}\n");
                File::options()
                    .append(true)
                    .open(p)
                    .map(|mut x| x.write(s.as_bytes()))
                    .ok();
            }
            None => eprintln!("{prefix}: {msg}"),
        }
    }
}

/// The stages of location assignment whose output `YKD_LOG_RA` can show.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum RAPhase {
    /// The input trace.
    Trace,
    /// The pseudo-ops, merge point locations, and guard states produced for the trace.
    PseudoOps,
}

#[cfg(not(feature = "ykd"))]
mod internals {
    use super::RAPhase;

    pub(crate) fn should_log_ra(_: RAPhase) -> bool {
        false
    }

    pub(crate) fn log_ra(_: &str) {}
}

#[cfg(feature = "ykd")]
mod internals {
    use super::RAPhase;
    use std::{collections::HashSet, env, error::Error, fs::File, io::Write, sync::LazyLock};

    static LOG_RA: LazyLock<Option<(String, HashSet<RAPhase>)>> = LazyLock::new(|| {
        let x = env::var("YKD_LOG_RA").ok()?;
        let (path, phases) = match x.split(':').collect::<Vec<_>>().as_slice() {
            [path, phases] => (*path, *phases),
            [phases] => ("-", *phases),
            _ => panic!("YKD_LOG_RA must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'"),
        };
        let mut log_phases = HashSet::new();
        for x in phases.split(',') {
            match RAPhase::from_str(x) {
                Ok(p) => {
                    log_phases.insert(p);
                }
                Err(e) => panic!("{e}"),
            }
        }
        if path != "-" {
            // Truncate any existing log file so that we don't append to a previous run's log.
            File::create(path).ok();
        }
        Some((path.to_string(), log_phases))
    });

    impl RAPhase {
        fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
            match s {
                "trace" => Ok(Self::Trace),
                "pseudo-ops" => Ok(Self::PseudoOps),
                _ => Err(format!("Invalid YKD_LOG_RA value: {s}").into()),
            }
        }
    }

    pub(crate) fn should_log_ra(phase: RAPhase) -> bool {
        LOG_RA
            .as_ref()
            .map(|(_, phases)| phases.contains(&phase))
            .unwrap_or(false)
    }

    pub(crate) fn log_ra(s: &str) {
        match LOG_RA.as_ref().map(|(p, _)| p.as_str()) {
            Some("-") => eprint!("{s}"),
            Some(x) => {
                File::options()
                    .append(true)
                    .open(x)
                    .map(|mut x| x.write(s.as_bytes()))
                    .ok();
            }
            None => (),
        }
    }
}

pub(crate) use internals::{log_ra, should_log_ra};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec() {
        let l = Log::from_spec("2").unwrap();
        assert_eq!(l.level, Verbosity::Warning);
        assert_eq!(l.path, None);
        let l = Log::from_spec("-:3").unwrap();
        assert_eq!(l.level, Verbosity::JITEvent);
        assert_eq!(l.path, None);
        assert_eq!(
            Log::from_spec("4").unwrap_err().to_string(),
            "YKD_LOG level 4 exceeds maximum 3"
        );
        assert_eq!(
            Log::from_spec("a:b:c").unwrap_err().to_string(),
            "YKD_LOG must be of the format `[<path|->:]<level>`"
        );
        assert!(Log::from_spec("x")
            .unwrap_err()
            .to_string()
            .starts_with("Invalid YKD_LOG level 'x'"));
    }
}
