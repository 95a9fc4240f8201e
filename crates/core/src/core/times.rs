//! Time-scale and mode enumerations for the loop hierarchy.

use core::fmt;
use serde::{Deserialize, Serialize};

/// One level of the time hierarchy, coarsest first.
///
/// The ordering is a correctness invariant: a finer scale completes its
/// full range once per tick of the next coarser scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TimeScale {
    Run,
    Epoch,
    Trial,
    Cycle,
}

impl TimeScale {
    /// Number of scales in the hierarchy.
    pub const N: usize = 4;

    /// All scales, coarsest to finest.
    pub const ALL: [TimeScale; Self::N] = [
        TimeScale::Run,
        TimeScale::Epoch,
        TimeScale::Trial,
        TimeScale::Cycle,
    ];

    /// Position in the hierarchy; 0 is coarsest.
    pub fn index(self) -> usize {
        match self {
            TimeScale::Run => 0,
            TimeScale::Epoch => 1,
            TimeScale::Trial => 2,
            TimeScale::Cycle => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeScale::Run => "Run",
            TimeScale::Epoch => "Epoch",
            TimeScale::Trial => "Trial",
            TimeScale::Cycle => "Cycle",
        }
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An execution context with its own stack of loops and counters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Mode {
    Train,
    Test,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Train => "Train",
            Mode::Test => "Test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
