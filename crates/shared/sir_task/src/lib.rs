//! Store-Ignore-Recall working-memory task.
//!
//! The environment presents a stimulus with an action cue each trial.
//! `Store` actions encode the stimulus into one of two memory slots,
//! `Ignore` presents a distractor that must not perturb memory, and
//! `Recall` actions retrieve a slot and trigger reward computation
//! against the agent's response.
//!
//! Termination is not owned here: the enclosing epoch loop decides when
//! to stop via its own predicates.

pub mod schedule;
pub mod sir;

pub use schedule::{ActionSource, FixedCycle, ScheduleView, SeededRandom};
pub use sir::{SirAction, SirEnv, N_ACTIONS};
