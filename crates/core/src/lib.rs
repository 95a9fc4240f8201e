//! # simloop
//!
//! A cooperative, callback-driven control-loop engine for iterative
//! simulation training, plus the reward/entropy learning-rate modulator
//! that plugs into it.
//!
//! The engine advances a nested counter hierarchy (Run, Epoch, Trial,
//! Cycle) in strict coarse-to-fine order. Independent subsystems register
//! named hooks at loop boundaries and at named mid-loop events; the
//! scheduler fires them in a total, deterministic order.
//!
//! ## Quick Start
//!
//! ```
//! use simloop::prelude::*;
//!
//! struct Ctx {
//!     cycles: usize,
//! }
//!
//! let mut loops: Stacks<Ctx> = Stacks::new();
//! loops
//!     .add_stack(Mode::Train)
//!     .unwrap()
//!     .add_scale(TimeScale::Epoch, 2)
//!     .unwrap()
//!     .add_scale(TimeScale::Trial, 3)
//!     .unwrap()
//!     .add_scale(TimeScale::Cycle, 10)
//!     .unwrap();
//! loops
//!     .loop_mut(Mode::Train, TimeScale::Cycle)
//!     .unwrap()
//!     .main
//!     .add("Cycle", |ctx: &mut Ctx, _ctl: &mut Ctl| {
//!         ctx.cycles += 1;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let mut ctx = Ctx { cycles: 0 };
//! let outcome = loops.run(Mode::Train, &mut ctx).unwrap();
//! assert_eq!(outcome, Outcome::Completed);
//! assert_eq!(ctx.cycles, 2 * 3 * 10);
//! ```
//!
//! ## Modules
//!
//! - [`times`]: time-scale and mode enumerations
//! - [`looper`]: counters, hook registries, events, per-scale loops
//! - [`stack`]: the stack manager and the recursive-descent scheduler
//! - [`reward`]: reward/entropy-modulated learning-rate control
//! - [`stats`]: key/value statistics and append-only log tables
//! - [`net`]: external collaborator traits (network, viewer)
//! - [`config`]: the run configuration surface

#[path = "core/times.rs"]
pub mod times;

#[path = "core/looper.rs"]
pub mod looper;

#[path = "core/stack.rs"]
pub mod stack;

#[path = "core/reward.rs"]
pub mod reward;

#[path = "core/stats.rs"]
pub mod stats;

#[path = "core/net.rs"]
pub mod net;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/error.rs"]
pub mod error;

pub mod prng;

/// Prelude module for convenient imports.
///
/// ```
/// use simloop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::RunConfig;
    pub use crate::error::{ConfigError, NetError, RunError, StatError};
    pub use crate::looper::{Counter, Event, Hooks, Loop};
    pub use crate::net::{ConnectPattern, LayerRole, Network, NullView, PathKind, Viewer};
    pub use crate::prng::Rng;
    pub use crate::reward::{
        EntropySource, RewardModConfig, RewardModulator, LRATE_MULT_MAX, LRATE_MULT_MIN,
    };
    pub use crate::stack::{CounterView, Ctl, Outcome, Stack, Stacks};
    pub use crate::stats::{LogBook, StatValue, Stats};
    pub use crate::times::{Mode, TimeScale};
}
