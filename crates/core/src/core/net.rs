//! External collaborator traits.
//!
//! The simulation engine proper (layer representation, settling dynamics,
//! weight updates) lives outside this crate; the control loops talk to it
//! only through [`Network`]. Likewise any GUI only observes through
//! [`Viewer`] and never mutates simulation state.

use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::stack::CounterView;

/// What a layer is for, from the control loops' point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerRole {
    /// Receives externally applied input patterns.
    Input,
    /// Internal; read for activation statistics only.
    Hidden,
    /// Read for arg-max responses and compared against targets.
    Output,
}

/// Connectivity pattern between two layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectPattern {
    Full,
    OneToOne,
}

/// Direction/kind of a pathway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathKind {
    Forward,
    Back,
    Lateral,
}

/// The network collaborator consumed by the control loops.
///
/// Unknown layer names are configuration errors: fatal to the current
/// run, never retried, because no recovery semantics exist for a
/// malformed topology.
pub trait Network {
    fn add_layer(&mut self, name: &str, shape: (usize, usize), role: LayerRole);

    fn connect(
        &mut self,
        src: &str,
        dst: &str,
        pattern: ConnectPattern,
        kind: PathKind,
    );

    /// Finalize topology; connections naming unknown layers fail here.
    fn build(&mut self) -> Result<(), NetError>;

    fn init_weights(&mut self);

    /// Clamp an external pattern onto a layer.
    fn apply_external_input(&mut self, layer: &str, pattern: &[f32]) -> Result<(), NetError>;

    /// Advance one cycle's worth of settling.
    fn step_cycle(&mut self);

    /// Current per-unit activation of a layer.
    fn read_activation(&self, layer: &str) -> Result<Vec<f32>, NetError>;

    /// Scale a layer's learning rate by `mult`.
    fn adjust_learning_rate(&mut self, layer: &str, mult: f32) -> Result<(), NetError>;

    /// Index of the most active unit of an output layer.
    fn arg_max_output(&self, layer: &str) -> Result<usize, NetError> {
        let acts = self.read_activation(layer)?;
        let mut best = 0;
        let mut best_v = f32::MIN;
        for (i, &v) in acts.iter().enumerate() {
            if v > best_v {
                best_v = v;
                best = i;
            }
        }
        Ok(best)
    }
}

/// Read-only observation boundary for GUIs and status displays.
pub trait Viewer {
    /// Refresh work is skipped entirely when not visible.
    fn is_visible(&self) -> bool;

    fn refresh(&mut self, counters: &CounterView);
}

/// A viewer that is never visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullView;

impl Viewer for NullView {
    fn is_visible(&self) -> bool {
        false
    }

    fn refresh(&mut self, _counters: &CounterView) {}
}
