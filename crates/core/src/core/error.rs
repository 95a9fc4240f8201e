//! Error types.
//!
//! Configuration errors are fatal to setup: a partially configured loop
//! hierarchy has undefined ordering, so `run()` must never start on one.
//! Cooperative cancellation is not an error; it is reported as
//! [`crate::stack::Outcome::Stopped`].

use crate::times::{Mode, TimeScale};
use thiserror::Error;

/// Errors detected while configuring stacks, loops, and hook registries.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate hook name {name:?} in {registry}")]
    DuplicateName { registry: String, name: String },

    #[error("no hook named {anchor:?} in {registry} to anchor {name:?}")]
    MissingAnchor {
        registry: String,
        anchor: String,
        name: String,
    },

    #[error("duplicate event name {name:?} on the {scale} loop")]
    DuplicateEvent { scale: TimeScale, name: String },

    #[error("no event named {name:?} on the {scale} loop")]
    MissingEvent { scale: TimeScale, name: String },

    #[error("duplicate predicate name {name:?} on the {scale} loop")]
    DuplicatePredicate { scale: TimeScale, name: String },

    #[error("stack for {mode} already defined")]
    DuplicateStack { mode: Mode },

    #[error("no stack defined for {mode}")]
    MissingStack { mode: Mode },

    #[error("scales must be added coarsest to finest; {scale} is out of order")]
    ScaleOrder { scale: TimeScale },

    #[error("no {scale} loop in the {mode} stack")]
    MissingLoop { mode: Mode, scale: TimeScale },

    #[error("loop registries are sealed once a run has started")]
    Sealed,

    #[error("{field} must be >= 1, got {value}")]
    BadField { field: &'static str, value: i64 },

    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Runtime lookup failures against the network collaborator.
///
/// These are programming/configuration errors: fatal to the current run,
/// never retried.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("no layer named {0:?} in network")]
    UnknownLayer(String),

    #[error("network not built before use")]
    NotBuilt,

    #[error("connection references unknown layer {0:?}")]
    BadConnection(String),
}

/// Statistics lookup failures.
///
/// All keys read by predicates must be initialized at run start; a missing
/// key is a logic defect and is fatal, not defaulted.
#[derive(Debug, Error)]
pub enum StatError {
    #[error("stat {0:?} was never set")]
    Missing(String),

    #[error("stat {key:?} holds a {actual}, wanted a {wanted}")]
    Kind {
        key: String,
        actual: &'static str,
        wanted: &'static str,
    },
}

/// Errors surfaced while a stack is running.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no stack available for {mode} (missing, or already running)")]
    StackUnavailable { mode: Mode },

    #[error("nested mode switch to {mode} at depth {depth}; only one level of nesting is supported")]
    NestingTooDeep { mode: Mode, depth: usize },

    #[error("counter overflow at {scale}: advance past max {max}")]
    CounterOverflow { scale: TimeScale, max: usize },

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Stat(#[from] StatError),
}
