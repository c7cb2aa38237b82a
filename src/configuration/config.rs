//! Configuration types for loading simulation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! simulation scenario:
//!
//! - [`SimulationConfig`] – particle population, buffering and segment tree options
//! - [`PhysicsConfig`]    – physical constants and collision options
//! - [`WorldConfig`]      – world bounds (positions wrap at the edges)
//! - [`RenderConfig`]     – consumer-side cadence options (fps, DFRI)
//! - [`DebugConfig`]      – diagnostic capture flags
//! - [`ScenarioConfig`]   – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//! An example scenario YAML matching these types:
//!
//! ```yaml
//! simulation:
//!   particle_count: 20000
//!   particle_init: "circle"
//!   backend: "tree"         # or "gpgpu"
//!   buffer_count: 3
//!   segment_divider: 2
//!   segment_max_count: 32
//!   segment_randomness: 0.25
//!
//! physics:
//!   gravity: 1.0
//!   resistance: 0.999
//!   min_interaction_distance: 20.0
//!   collision: false
//!   collision_restitution: 1.0
//!   seed: 42
//!
//! world:
//!   width: 1920
//!   height: 1080
//!
//! render:
//!   fps: 60
//!   enable_dfri: true
//!   dfri_max_frames: 120
//! ```
//!
//! The engine maps this configuration into the runtime [`Settings`] value,
//! which clamps and derives what the raw config leaves open.
//!
//! [`Settings`]: crate::configuration::settings::Settings

use serde::Deserialize;

/// Which force solver backend the step pipeline constructs.
/// `backend: "tree"` or `backend: "gpgpu"`
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendConfig {
    #[serde(rename = "tree")] // Segment tree solver running on the worker thread
    Tree,

    #[serde(rename = "gpgpu")] // Compute-pass solver, one dispatch per segment (feature "gpgpu")
    Gpgpu,
}

/// Initial particle layout.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleInitConfig {
    #[serde(rename = "circle")] // Annulus around the world center
    Circle,

    #[serde(rename = "uniform")] // Uniform over the whole world
    Uniform,

    #[serde(rename = "bang")] // Center burst with radial velocities
    Bang,
}

/// Particle population, buffer pool and segment tree options.
#[derive(Deserialize, Debug, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    #[serde(default = "default_particle_init")]
    pub particle_init: ParticleInitConfig,
    #[serde(default = "default_backend")]
    pub backend: BackendConfig,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "default_segment_divider")]
    pub segment_divider: u32,
    // None picks a backend-specific default (see Settings::from_config)
    #[serde(default)]
    pub segment_max_count: Option<usize>,
    #[serde(default = "default_segment_randomness")]
    pub segment_randomness: f32,
}

/// Physical constants and collision options for a scenario.
#[derive(Deserialize, Debug, Clone)]
pub struct PhysicsConfig {
    #[serde(default = "default_gravity")]
    pub gravity: f32, // gravitational constant
    #[serde(default = "default_resistance")]
    pub resistance: f32, // velocity damping per step, slightly below 1
    #[serde(default = "default_min_interaction_distance")]
    pub min_interaction_distance: f32, // force floor distance, avoids singular forces
    #[serde(default)]
    pub collision: bool,
    #[serde(default = "default_restitution")]
    pub collision_restitution: f32,
    #[serde(default)]
    pub seed: Option<u64>, // deterministic seed for init and split jitter
}

/// World bounds; positions wrap toroidally at the edges.
#[derive(Deserialize, Debug, Clone)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
}

/// Consumer-side cadence options, read by the DFRI helper.
#[derive(Deserialize, Debug, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_enable_dfri")]
    pub enable_dfri: bool,
    #[serde(default = "default_dfri_max_frames")]
    pub dfri_max_frames: u32,
}

/// Diagnostic capture flags.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DebugConfig {
    #[serde(default)]
    pub debug_tree: bool, // capture segment boundaries in step results
    #[serde(default)]
    pub debug_force: bool, // capture per-particle accelerations in step results
    #[serde(default = "default_stats")]
    pub stats: bool,
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub simulation: SimulationConfig,
    pub physics: PhysicsConfig,
    pub world: WorldConfig,
    #[serde(default = "default_render_config")]
    pub render: RenderConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

fn default_particle_count() -> usize {
    20000
}

fn default_particle_init() -> ParticleInitConfig {
    ParticleInitConfig::Circle
}

fn default_backend() -> BackendConfig {
    BackendConfig::Tree
}

fn default_buffer_count() -> usize {
    3
}

fn default_segment_divider() -> u32 {
    2
}

fn default_segment_randomness() -> f32 {
    0.25
}

fn default_gravity() -> f32 {
    1.0
}

fn default_resistance() -> f32 {
    0.999
}

fn default_min_interaction_distance() -> f32 {
    20.0
}

fn default_restitution() -> f32 {
    1.0
}

fn default_fps() -> u32 {
    60
}

fn default_enable_dfri() -> bool {
    true
}

fn default_dfri_max_frames() -> u32 {
    120
}

fn default_stats() -> bool {
    true
}

fn default_render_config() -> RenderConfig {
    RenderConfig {
        fps: default_fps(),
        enable_dfri: default_enable_dfri(),
        dfri_max_frames: default_dfri_max_frames(),
    }
}
