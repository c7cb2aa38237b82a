//! Force solvers and per-step diagnostics.
//!
//! Backend selection is a configuration-time choice: the step pipeline
//! constructs exactly one [`Solver`] and drives it through the single
//! `step(particles)` capability. There is no per-particle polymorphism.

pub mod particle;
pub mod physics;
pub mod tree;

#[cfg(feature = "gpgpu")]
pub mod gpgpu;

use crate::simulation::particle::{NVec2, Particle};
use crate::simulation::tree::{SegmentDebug, TreeStats};

/// Diagnostics for one step. Informational only; nothing in the pipeline
/// makes control decisions from these values.
#[derive(Debug, Clone, Default)]
pub struct StepStats {
    /// Total step duration in milliseconds, tree build included.
    pub physics_time: f64,
    /// Tree build duration in milliseconds.
    pub tree_time: f64,
    pub tree: TreeStats,
    /// Per-segment compute-pass durations; populated by the GPU solver only.
    pub segment_times: Vec<f64>,
}

/// Everything one solver invocation produces besides the mutated particles.
pub struct StepOutcome {
    pub stats: StepStats,
    pub tree_debug: Vec<SegmentDebug>,
    pub force_debug: Vec<NVec2>,
}

/// One force solver backend. `step` advances every particle by one tick:
/// forces, damping, position update and toroidal wrap.
pub trait Solver: Send {
    fn step(&mut self, particles: &mut [Particle]) -> StepOutcome;
}
