//! Pluggable action-schedule strategies.
//!
//! Drawing the next action is a strategy behind one small trait rather
//! than a boolean branching inline: the fixed cyclic schedule and the
//! seeded random draw are separate types.

use simloop::prng::Rng;

use crate::sir::SirAction;

/// What a schedule may observe when drawing the next action.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleView {
    /// Trial index within the current epoch.
    pub trial: usize,
    /// Which memory slots currently hold a stimulus.
    pub stored: [bool; 2],
}

pub trait ActionSource {
    /// Draw the next action for the given trial.
    fn next(&mut self, view: &ScheduleView) -> SirAction;

    /// Reset for a new run.
    fn reset(&mut self, run: usize);
}

/// Cycles through a fixed sequence of actions.
#[derive(Debug, Clone)]
pub struct FixedCycle {
    seq: Vec<SirAction>,
    idx: usize,
}

impl FixedCycle {
    pub fn new(seq: Vec<SirAction>) -> Self {
        assert!(!seq.is_empty(), "fixed schedule needs at least one action");
        Self { seq, idx: 0 }
    }
}

impl ActionSource for FixedCycle {
    fn next(&mut self, _view: &ScheduleView) -> SirAction {
        let act = self.seq[self.idx % self.seq.len()];
        self.idx += 1;
        act
    }

    fn reset(&mut self, _run: usize) {
        self.idx = 0;
    }
}

/// Uniform draw over the currently valid actions.
///
/// A `Recall` of a slot is only valid once that slot has been stored in
/// the same run; the very first action of a run is forced to a `Store`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    seed: u64,
    rng: Rng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Rng::new(seed),
        }
    }
}

impl ActionSource for SeededRandom {
    fn next(&mut self, view: &ScheduleView) -> SirAction {
        if view.trial == 0 && !view.stored[0] && !view.stored[1] {
            return *self.rng.pick(&[SirAction::Store1, SirAction::Store2]);
        }
        let mut valid = vec![SirAction::Store1, SirAction::Store2, SirAction::Ignore];
        if view.stored[0] {
            valid.push(SirAction::Recall1);
        }
        if view.stored[1] {
            valid.push(SirAction::Recall2);
        }
        *self.rng.pick(&valid)
    }

    fn reset(&mut self, run: usize) {
        self.rng = Rng::for_run(self.seed, run);
    }
}
