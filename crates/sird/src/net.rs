//! A deterministic scripted network.
//!
//! Stands in for a full simulation engine behind the [`Network`] trait:
//! it gates stimuli into two memory slots exactly when the control cue
//! says to, and settles its output toward the rule-correct response over
//! cycles. `gate_noise` makes store actions fail at a fixed rate, which
//! keeps error statistics nonzero for as long as training runs.

use hashbrown::HashMap;

use simloop::error::NetError;
use simloop::net::{ConnectPattern, LayerRole, Network, PathKind};
use simloop::prng::Rng;

/// Per-cycle movement of a settling unit toward its target.
const SETTLE_RATE: f32 = 0.15;
/// A clamped input unit is considered active above this.
const ACT_THRESH: f32 = 0.5;

#[derive(Debug, Clone)]
struct Layer {
    shape: (usize, usize),
    role: LayerRole,
    acts: Vec<f32>,
    lrate_mult: f32,
}

impl Layer {
    fn units(&self) -> usize {
        self.shape.0 * self.shape.1
    }
}

#[derive(Debug, Clone)]
struct Conn {
    src: String,
    dst: String,
    #[allow(dead_code)]
    pattern: ConnectPattern,
    #[allow(dead_code)]
    kind: PathKind,
}

#[derive(Debug)]
pub struct ScriptedNet {
    layers: HashMap<String, Layer>,
    conns: Vec<Conn>,
    built: bool,
    slots: [Option<usize>; 2],
    gated_this_trial: bool,
    /// Probability that a store action fails to gate. 0 is an oracle.
    pub gate_noise: f32,
    rng: Rng,
}

impl ScriptedNet {
    pub fn new(gate_noise: f32, seed: u64) -> Self {
        Self {
            layers: HashMap::new(),
            conns: Vec::new(),
            built: false,
            slots: [None; 2],
            gated_this_trial: false,
            gate_noise,
            rng: Rng::new(seed),
        }
    }

    /// The standard working-memory topology used by the daemon.
    pub fn sir_default(gate_noise: f32, seed: u64) -> Result<Self, NetError> {
        let mut net = Self::new(gate_noise, seed);
        net.add_layer("Input", (1, 4), LayerRole::Input);
        net.add_layer("CtrlInput", (1, 5), LayerRole::Input);
        net.add_layer("Rew", (1, 2), LayerRole::Input);
        net.add_layer("Output", (1, 4), LayerRole::Output);
        net.add_layer("Hidden", (7, 7), LayerRole::Hidden);
        net.add_layer("Gate", (4, 4), LayerRole::Hidden);
        net.add_layer("GateGo", (1, 4), LayerRole::Hidden);
        net.add_layer("GateNoGo", (1, 4), LayerRole::Hidden);
        net.add_layer("RewPred", (1, 2), LayerRole::Hidden);

        net.connect("Input", "Hidden", ConnectPattern::Full, PathKind::Forward);
        net.connect("CtrlInput", "Hidden", ConnectPattern::Full, PathKind::Forward);
        net.connect("Hidden", "Output", ConnectPattern::Full, PathKind::Forward);
        net.connect("Output", "Hidden", ConnectPattern::Full, PathKind::Back);
        net.connect("Hidden", "Gate", ConnectPattern::Full, PathKind::Forward);
        net.connect("Gate", "GateGo", ConnectPattern::Full, PathKind::Forward);
        net.connect("Gate", "GateNoGo", ConnectPattern::Full, PathKind::Forward);
        net.connect("Rew", "RewPred", ConnectPattern::Full, PathKind::Forward);
        net.build()?;
        Ok(net)
    }

    /// Clear transient per-trial state; call when new trial inputs are
    /// applied. Slot memory persists across trials.
    pub fn begin_trial(&mut self) {
        self.gated_this_trial = false;
        for l in self.layers.values_mut() {
            if l.role == LayerRole::Hidden {
                let n = l.units() as f32;
                l.acts.fill(1.0 / n);
            }
        }
    }

    fn active_index(&self, layer: &str) -> Option<usize> {
        let l = self.layers.get(layer)?;
        let (i, &v) = l
            .acts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(core::cmp::Ordering::Equal))?;
        (v > ACT_THRESH).then_some(i)
    }

    fn settle(&mut self, layer: &str, target: &[f32]) {
        if let Some(l) = self.layers.get_mut(layer) {
            for (a, &t) in l.acts.iter_mut().zip(target) {
                *a += SETTLE_RATE * (t - *a);
            }
        }
    }
}

impl Network for ScriptedNet {
    fn add_layer(&mut self, name: &str, shape: (usize, usize), role: LayerRole) {
        self.layers.insert(
            name.to_string(),
            Layer {
                shape,
                role,
                acts: vec![0.0; shape.0 * shape.1],
                lrate_mult: 1.0,
            },
        );
    }

    fn connect(&mut self, src: &str, dst: &str, pattern: ConnectPattern, kind: PathKind) {
        self.conns.push(Conn {
            src: src.to_string(),
            dst: dst.to_string(),
            pattern,
            kind,
        });
    }

    fn build(&mut self) -> Result<(), NetError> {
        for c in &self.conns {
            for end in [&c.src, &c.dst] {
                if !self.layers.contains_key(end.as_str()) {
                    return Err(NetError::BadConnection(end.clone()));
                }
            }
        }
        self.built = true;
        Ok(())
    }

    fn init_weights(&mut self) {
        self.slots = [None; 2];
        self.gated_this_trial = false;
        for l in self.layers.values_mut() {
            l.acts.fill(0.0);
            l.lrate_mult = 1.0;
        }
    }

    fn apply_external_input(&mut self, layer: &str, pattern: &[f32]) -> Result<(), NetError> {
        if !self.built {
            return Err(NetError::NotBuilt);
        }
        let l = self
            .layers
            .get_mut(layer)
            .ok_or_else(|| NetError::UnknownLayer(layer.to_string()))?;
        let n = l.acts.len().min(pattern.len());
        l.acts[..n].copy_from_slice(&pattern[..n]);
        for a in &mut l.acts[n..] {
            *a = 0.0;
        }
        Ok(())
    }

    fn step_cycle(&mut self) {
        if !self.built {
            return;
        }
        let Some(action) = self.active_index("CtrlInput") else {
            return;
        };
        let stim = self.active_index("Input");

        // Gating happens once per trial: Store1/Store2 cues write the
        // current stimulus into the matching slot, unless the noisy gate
        // fails this trial.
        if !self.gated_this_trial {
            self.gated_this_trial = true;
            if action < 2 {
                if let Some(s) = stim {
                    if !self.rng.chance(self.gate_noise) {
                        self.slots[action] = Some(s);
                    }
                }
            }
        }

        // Recall cues answer from slot memory, everything else echoes the
        // stimulus. An empty slot settles toward silence.
        let response = match action {
            3 => self.slots[0],
            4 => self.slots[1],
            _ => stim,
        };
        let n_out = self.layers.get("Output").map(|l| l.units()).unwrap_or(0);
        let mut out_target = vec![0.0; n_out];
        if let Some(r) = response {
            if r < n_out {
                out_target[r] = 1.0;
            }
        }
        self.settle("Output", &out_target);

        if let Some(n) = self.layers.get("Gate").map(Layer::units) {
            // Settles from uniform toward a peaked distribution on the
            // acting unit; its entropy drops over the trial.
            let mut t = vec![0.05; n];
            if action < t.len() {
                t[action] = 0.8;
            }
            self.settle("Gate", &t);
        }
        if let Some(n) = self.layers.get("Hidden").map(Layer::units) {
            let mut t = vec![0.0; n];
            let base = (action * 7 + stim.unwrap_or(0) * 3) % n;
            for i in 0..8 {
                t[(base + i) % n] = 0.6;
            }
            self.settle("Hidden", &t);
        }
    }

    fn read_activation(&self, layer: &str) -> Result<Vec<f32>, NetError> {
        if !self.built {
            return Err(NetError::NotBuilt);
        }
        self.layers
            .get(layer)
            .map(|l| l.acts.clone())
            .ok_or_else(|| NetError::UnknownLayer(layer.to_string()))
    }

    fn adjust_learning_rate(&mut self, layer: &str, mult: f32) -> Result<(), NetError> {
        let l = self
            .layers
            .get_mut(layer)
            .ok_or_else(|| NetError::UnknownLayer(layer.to_string()))?;
        l.lrate_mult = mult;
        Ok(())
    }
}
