//! Reward/entropy-modulated learning-rate control.
//!
//! At the minus/plus phase boundary of a cycle, an uncertainty measure is
//! derived from a population's average activations and converted into a
//! learning-rate multiplier applied to a fixed set of learning layers.
//! Two measures are supported and deliberately kept separate: they read
//! different source layers and normalize differently (see DESIGN.md).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RunError;
use crate::net::Network;

/// Lower clamp of the learning-rate multiplier.
pub const LRATE_MULT_MIN: f32 = 0.25;
/// Upper clamp of the learning-rate multiplier.
pub const LRATE_MULT_MAX: f32 = 4.0;

/// Population-sum scaling divisor.
const POP_SUM_SCALE: f32 = 10.0;
/// Below this peak activation the population carries no reliable
/// information and the multiplier is forced to the upper clamp.
const POP_SUM_FLOOR: f32 = 0.02;

/// Which uncertainty measure to derive the multiplier from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntropySource {
    /// Sum of a hidden layer's per-unit activations, scaled and clamped.
    PopulationSum { layer: String },
    /// Shannon entropy of a gating layer's activation distribution,
    /// normalized by the maximum possible entropy for the unit count.
    Shannon { layer: String },
}

impl EntropySource {
    pub fn layer(&self) -> &str {
        match self {
            EntropySource::PopulationSum { layer } => layer,
            EntropySource::Shannon { layer } => layer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardModConfig {
    /// When false, the multiplier is forced to exactly 1.0 (no effect).
    /// This is a design switch, not something inferred from magnitudes.
    pub modulate: bool,
    pub source: EntropySource,
    /// Learning layers the multiplier is applied to.
    pub targets: Vec<String>,
    /// Strength of positive reward-signal bursts (1 = default).
    pub burst_gain: f32,
    /// Strength of negative reward-signal dips (1 = default).
    pub dip_gain: f32,
}

impl Default for RewardModConfig {
    fn default() -> Self {
        Self {
            modulate: false,
            source: EntropySource::Shannon {
                layer: "Gate".to_string(),
            },
            targets: Vec::new(),
            burst_gain: 1.0,
            dip_gain: 1.0,
        }
    }
}

/// Computes the entropy-derived multiplier and pushes it to the target
/// layers. The multiplier persists unchanged between reward events.
#[derive(Debug, Clone)]
pub struct RewardModulator {
    pub cfg: RewardModConfig,
    /// Last multiplier applied, in `[LRATE_MULT_MIN, LRATE_MULT_MAX]`
    /// (or exactly 1.0 when modulation is disabled).
    pub lrate_mult: f32,
}

fn population_sum_mult(acts: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    let mut peak = 0.0f32;
    for &a in acts {
        sum += a;
        peak = peak.max(a);
    }
    if peak < POP_SUM_FLOOR {
        return LRATE_MULT_MAX;
    }
    (sum / POP_SUM_SCALE).clamp(LRATE_MULT_MIN, LRATE_MULT_MAX)
}

fn shannon_mult(acts: &[f32]) -> f32 {
    let total: f32 = acts.iter().sum();
    let mut ent = 0.0f32;
    if total > 0.0 {
        for &a in acts {
            let p = a / total;
            // Zero-probability units are skipped to avoid the log singularity.
            if p > 0.0 {
                ent -= p * p.ln();
            }
        }
    }
    if acts.len() > 1 {
        ent /= (acts.len() as f32).ln();
    }
    ent.clamp(LRATE_MULT_MIN, LRATE_MULT_MAX)
}

impl RewardModulator {
    pub fn new(cfg: RewardModConfig) -> Self {
        Self {
            cfg,
            lrate_mult: 1.0,
        }
    }

    /// Compute the multiplier from the configured source layer without
    /// applying it.
    pub fn multiplier<N: Network + ?Sized>(&self, net: &N) -> Result<f32, RunError> {
        if !self.cfg.modulate {
            return Ok(1.0);
        }
        let acts = net.read_activation(self.cfg.source.layer())?;
        let mult = match &self.cfg.source {
            EntropySource::PopulationSum { .. } => population_sum_mult(&acts),
            EntropySource::Shannon { .. } => shannon_mult(&acts),
        };
        Ok(mult)
    }

    /// Recompute the multiplier and apply it to every target layer.
    pub fn apply<N: Network + ?Sized>(&mut self, net: &mut N) -> Result<f32, RunError> {
        let mult = self.multiplier(net)?;
        self.lrate_mult = mult;
        for layer in &self.cfg.targets {
            net.adjust_learning_rate(layer, mult)?;
        }
        debug!(mult, source = ?self.cfg.source, "learning-rate multiplier");
        Ok(mult)
    }
}
