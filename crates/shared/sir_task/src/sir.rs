//! The Store-Ignore-Recall environment state machine.

use core::fmt;

use serde::{Deserialize, Serialize};
use simloop::prng::Rng;

use crate::schedule::{ActionSource, ScheduleView};

/// Number of distinct actions (width of the control pattern).
pub const N_ACTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SirAction {
    Store1,
    Store2,
    Ignore,
    Recall1,
    Recall2,
}

impl SirAction {
    pub const ALL: [SirAction; N_ACTIONS] = [
        SirAction::Store1,
        SirAction::Store2,
        SirAction::Ignore,
        SirAction::Recall1,
        SirAction::Recall2,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SirAction::Store1 => "Store1",
            SirAction::Store2 => "Store2",
            SirAction::Ignore => "Ignore",
            SirAction::Recall1 => "Recall1",
            SirAction::Recall2 => "Recall2",
        }
    }

    /// Position in the control pattern.
    pub fn index(self) -> usize {
        match self {
            SirAction::Store1 => 0,
            SirAction::Store2 => 1,
            SirAction::Ignore => 2,
            SirAction::Recall1 => 3,
            SirAction::Recall2 => 4,
        }
    }

    /// The memory slot this action writes, if any.
    pub fn store_slot(self) -> Option<usize> {
        match self {
            SirAction::Store1 => Some(0),
            SirAction::Store2 => Some(1),
            _ => None,
        }
    }

    /// The memory slot this action reads, if any. Only recall actions
    /// trigger reward computation.
    pub fn recall_slot(self) -> Option<usize> {
        match self {
            SirAction::Recall1 => Some(0),
            SirAction::Recall2 => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for SirAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One mode's task state: a bounded stimulus alphabet, two memory slots,
/// and the action/stimulus of the current trial.
pub struct SirEnv {
    pub name: String,
    /// Size of the stimulus alphabet (width of input/output patterns).
    pub n_stim: usize,
    /// Trial index within the current epoch, wrapping at `max_trials`.
    pub trial: usize,
    pub max_trials: usize,
    /// Action of the current trial.
    pub act: SirAction,
    /// Stimulus presented this trial (meaningful for Store/Ignore).
    pub stim: usize,
    /// Reward value written on a correct recall.
    pub rew_val: f32,
    /// Reward value written on an incorrect recall.
    pub no_rew_val: f32,
    /// Reward of the most recent recall trial.
    pub last_reward: f32,
    maint: [Option<usize>; 2],
    seed: u64,
    rng: Rng,
    schedule: Box<dyn ActionSource>,
}

impl fmt::Debug for SirEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SirEnv")
            .field("name", &self.name)
            .field("trial", &self.trial)
            .field("act", &self.act)
            .field("stim", &self.stim)
            .field("maint", &self.maint)
            .field("last_reward", &self.last_reward)
            .finish()
    }
}

impl SirEnv {
    pub fn new(
        name: impl Into<String>,
        n_stim: usize,
        max_trials: usize,
        schedule: Box<dyn ActionSource>,
        seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            n_stim: n_stim.max(1),
            trial: 0,
            max_trials,
            act: SirAction::Store1,
            stim: 0,
            rew_val: 1.0,
            no_rew_val: 0.0,
            last_reward: 0.0,
            maint: [None; 2],
            seed,
            rng: Rng::new(seed),
            schedule,
        }
    }

    /// Reset for a new run: slot memory cleared, trial index zeroed,
    /// streams reseeded per run.
    pub fn init(&mut self, run: usize) {
        self.trial = 0;
        self.stim = 0;
        self.act = SirAction::Store1;
        self.last_reward = 0.0;
        self.maint = [None; 2];
        self.rng = Rng::for_run(self.seed, run);
        self.schedule.reset(run);
    }

    /// Which slots currently hold a stimulus.
    pub fn stored(&self) -> [bool; 2] {
        [self.maint[0].is_some(), self.maint[1].is_some()]
    }

    /// Contents of a memory slot.
    pub fn maint(&self, slot: usize) -> Option<usize> {
        self.maint[slot]
    }

    /// Advance one trial: draw the next action, present a stimulus, and
    /// update slot memory for Store actions.
    pub fn step(&mut self) {
        let view = ScheduleView {
            trial: self.trial,
            stored: self.stored(),
        };
        self.act = self.schedule.next(&view);
        match self.act {
            SirAction::Store1 | SirAction::Store2 | SirAction::Ignore => {
                self.stim = self.rng.index(self.n_stim);
                if let Some(slot) = self.act.store_slot() {
                    self.maint[slot] = Some(self.stim);
                }
            }
            SirAction::Recall1 | SirAction::Recall2 => {}
        }
        self.trial = (self.trial + 1) % self.max_trials.max(1);
    }

    /// Stimulus pattern for the input layer: one-hot for Store/Ignore,
    /// silent on Recall (the response must come from memory).
    pub fn input_pattern(&self) -> Vec<f32> {
        let mut pat = vec![0.0; self.n_stim];
        if self.act.recall_slot().is_none() {
            pat[self.stim] = 1.0;
        }
        pat
    }

    /// One-hot action cue for the control-input layer.
    pub fn ctrl_pattern(&self) -> Vec<f32> {
        let mut pat = vec![0.0; N_ACTIONS];
        pat[self.act.index()] = 1.0;
        pat
    }

    /// Index of the correct response this trial. `None` when recalling a
    /// slot that was never stored.
    pub fn target_index(&self) -> Option<usize> {
        match self.act.recall_slot() {
            Some(slot) => self.maint[slot],
            None => Some(self.stim),
        }
    }

    /// One-hot target pattern for the output layer; all-zero when there
    /// is no correct response.
    pub fn output_target(&self) -> Vec<f32> {
        let mut pat = vec![0.0; self.n_stim];
        if let Some(t) = self.target_index() {
            pat[t] = 1.0;
        }
        pat
    }

    /// Score the agent's arg-max response. Defined only for Recall
    /// actions; returns `None` (and writes nothing) otherwise. A recall
    /// of a never-stored slot always scores incorrect.
    pub fn set_reward(&mut self, arg_max: usize) -> Option<f32> {
        let slot = self.act.recall_slot()?;
        let r = if self.maint[slot] == Some(arg_max) {
            self.rew_val
        } else {
            self.no_rew_val
        };
        self.last_reward = r;
        Some(r)
    }

    /// Two-unit reward representation consumed by the network as an
    /// input pattern.
    pub fn reward_pattern(&self) -> Vec<f32> {
        vec![self.last_reward, 1.0 - self.last_reward]
    }

    /// "Action:stimulus" label for per-trial statistics.
    pub fn trial_label(&self) -> String {
        match self.target_index() {
            Some(t) => format!("{}:{}", self.act, t),
            None => format!("{}:-", self.act),
        }
    }
}
