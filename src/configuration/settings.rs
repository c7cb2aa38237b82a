//! Runtime settings derived from a scenario configuration.
//!
//! Every component receives an immutable [`Settings`] value at construction;
//! nothing reads ambient/global state. `from_config` clamps and derives what
//! the raw YAML leaves open, `validate` rejects degenerate scenarios before
//! any state is allocated.

use anyhow::{bail, Result};

use crate::configuration::config::{BackendConfig, ParticleInitConfig, ScenarioConfig};

/// Force solver backend, selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Tree,
    Gpgpu,
}

/// Initial particle layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleInit {
    Circle,
    Uniform,
    Bang,
}

/// Fully-resolved runtime settings for one simulation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub particle_count: usize,
    pub particle_init: ParticleInit,
    pub backend: BackendKind,
    pub buffer_count: usize,

    pub segment_divider: u32,
    pub segment_max_count: usize,
    pub segment_randomness: f32, // clamped to [0, 1]

    pub gravity: f32,
    pub particle_gravity: f32, // gravity normalized by population size
    pub resistance: f32,
    pub min_distance_sq: f32,
    pub collision: bool,
    pub collision_restitution: f32,
    pub seed: Option<u64>,

    pub world_width: f32,
    pub world_height: f32,

    pub fps: u32,
    pub enable_dfri: bool,
    pub dfri_max_frames: u32,

    pub debug_tree: bool,
    pub debug_force: bool,
    pub stats: bool,
}

impl Settings {
    /// Map a YAML-facing [`ScenarioConfig`] into runtime settings.
    pub fn from_config(cfg: &ScenarioConfig) -> Self {
        let backend = match cfg.simulation.backend {
            BackendConfig::Tree => BackendKind::Tree,
            BackendConfig::Gpgpu => BackendKind::Gpgpu,
        };

        // GPU segments amortize the upload/readback round trip over more
        // particles, so the default cap is larger there.
        let segment_max_count = cfg.simulation.segment_max_count.unwrap_or(match backend {
            BackendKind::Gpgpu => 128,
            BackendKind::Tree => 32,
        });

        let particle_count = cfg.simulation.particle_count;
        let gravity = cfg.physics.gravity;

        Self {
            particle_count,
            particle_init: match cfg.simulation.particle_init {
                ParticleInitConfig::Circle => ParticleInit::Circle,
                ParticleInitConfig::Uniform => ParticleInit::Uniform,
                ParticleInitConfig::Bang => ParticleInit::Bang,
            },
            backend,
            buffer_count: cfg.simulation.buffer_count,

            segment_divider: cfg.simulation.segment_divider,
            segment_max_count,
            segment_randomness: cfg.simulation.segment_randomness.clamp(0.0, 1.0),

            gravity,
            particle_gravity: gravity / particle_count.max(1) as f32 * 10.0,
            resistance: cfg.physics.resistance,
            min_distance_sq: cfg.physics.min_interaction_distance * cfg.physics.min_interaction_distance,
            collision: cfg.physics.collision,
            collision_restitution: cfg.physics.collision_restitution,
            seed: cfg.physics.seed,

            world_width: cfg.world.width,
            world_height: cfg.world.height,

            fps: cfg.render.fps,
            enable_dfri: cfg.render.enable_dfri,
            dfri_max_frames: cfg.render.dfri_max_frames,

            debug_tree: cfg.debug.debug_tree,
            debug_force: cfg.debug.debug_force,
            stats: cfg.debug.stats,
        }
    }

    /// Reject degenerate scenarios. Called once at startup; per-step code
    /// assumes these invariants and never re-checks them.
    pub fn validate(&self) -> Result<()> {
        if self.world_width <= 0.0 || self.world_height <= 0.0 {
            bail!(
                "world size must be positive, got {}x{}",
                self.world_width,
                self.world_height
            );
        }
        if self.particle_count == 0 {
            bail!("particle_count must be at least 1");
        }
        if self.buffer_count == 0 {
            bail!("buffer_count must be at least 1");
        }
        if self.segment_divider < 2 {
            bail!("segment_divider must be at least 2, got {}", self.segment_divider);
        }
        if self.segment_max_count == 0 {
            bail!("segment_max_count must be at least 1");
        }
        if self.resistance <= 0.0 || self.resistance > 1.0 {
            bail!("resistance must be in (0, 1], got {}", self.resistance);
        }
        if self.fps == 0 {
            bail!("fps must be at least 1");
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            particle_count: 10000,
            particle_init: ParticleInit::Circle,
            backend: BackendKind::Tree,
            buffer_count: 3,

            segment_divider: 2,
            segment_max_count: 32,
            segment_randomness: 0.25,

            gravity: 1.0,
            particle_gravity: 1.0 / 10000.0 * 10.0,
            resistance: 0.999,
            min_distance_sq: 20.0 * 20.0,
            collision: false,
            collision_restitution: 1.0,
            seed: None,

            world_width: 1920.0,
            world_height: 1080.0,

            fps: 60,
            enable_dfri: true,
            dfri_max_frames: 120,

            debug_tree: false,
            debug_force: false,
            stats: true,
        }
    }
}
