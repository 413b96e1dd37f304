//! Backend configuration.

use std::{env, error::Error};

/// The environment variable that overrides [Config::max_frame_slots].
const MAX_FRAME_SLOTS_ENV: &str = "YK_MAX_FRAME_SLOTS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The number of stack slots a trace's frame may use. Allocating a slot with an index equal
    /// to or greater than this fails with [crate::CompilationError::FrameOverflow].
    pub max_frame_slots: u32,
}

impl Default for Config {
    /// A 1024 byte frame of 4 byte slots.
    fn default() -> Self {
        Self {
            max_frame_slots: 256,
        }
    }
}

impl Config {
    /// Create a [Config] from the defaults, overridden by `YK_MAX_FRAME_SLOTS` if it is set.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let mut config = Self::default();
        if let Ok(x) = env::var(MAX_FRAME_SLOTS_ENV) {
            config.max_frame_slots = parse_frame_slots(&x)?;
        }
        Ok(config)
    }
}

fn parse_frame_slots(s: &str) -> Result<u32, Box<dyn Error>> {
    match s.trim().parse::<u32>() {
        Ok(0) => Err(format!("{MAX_FRAME_SLOTS_ENV} must be greater than zero").into()),
        Ok(x) => Ok(x),
        Err(e) => Err(format!("Invalid {MAX_FRAME_SLOTS_ENV} value '{s}': {e}").into()),
    }
}
