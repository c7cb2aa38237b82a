//! Step pipeline and buffer pool.
//!
//! The pipeline owns the particles, the solver, and a fixed pool of reusable
//! step buffers. A `step` request takes one buffer out of the pool, runs the
//! solver, serializes the particle state into the buffer, and hands it to the
//! caller inside a [`StepResult`]; the buffer returns to the pool only
//! through [`Backend::ack`]. Exactly one side owns any buffer at any time;
//! the move in and out of `StepResult` is the only way to cross the boundary.
//!
//! Protocol violations (stepping on an empty pool, acknowledging into a full
//! pool) are caller bugs: they are logged and ignored, never panics, and
//! never corrupt the pool.

pub mod worker;

use std::collections::VecDeque;

use anyhow::Result;
use log::error;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::configuration::settings::{BackendKind, Settings};
use crate::simulation::particle::{self, NVec2, Particle};
use crate::simulation::physics::PhysicsEngine;
use crate::simulation::tree::SegmentDebug;
use crate::simulation::{Solver, StepStats};

/// Entries per particle in a step buffer: x, y, vel_x, vel_y, mass.
pub const ITEM_SIZE: usize = 5;

/// One recorded particle state, as consumed when resuming a prior session.
pub type ParticleState = [f32; ITEM_SIZE];

/// One produced step. Ownership of `buffer` transfers to the consumer; the
/// pipeline does not touch it again until it comes back through `ack`.
pub struct StepResult {
    pub timestamp: f64,
    pub buffer: Vec<f32>,
    pub tree_debug: Vec<SegmentDebug>,
    pub force_debug: Vec<NVec2>,
    pub stats: StepStats,
}

pub struct Backend {
    settings: Settings,
    solver: Box<dyn Solver>,
    particles: Vec<Particle>,
    buffers: VecDeque<Vec<f32>>,
}

impl Backend {
    /// Allocate particles and buffers and construct the configured solver.
    ///
    /// `prior_state` overlays recorded `[x, y, vel_x, vel_y, mass]` tuples
    /// onto the freshly initialized particles; only as many entries as fit
    /// are taken. Configuration errors are fatal here, never per-step.
    pub fn new(settings: Settings, prior_state: Option<&[ParticleState]>) -> Result<Self> {
        settings.validate()?;

        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut particles = particle::initialize(&settings, &mut rng);

        if let Some(state) = prior_state {
            let size = state.len().min(settings.particle_count);
            for (p, entry) in particles.iter_mut().zip(&state[..size]) {
                let [x, y, vel_x, vel_y, mass] = *entry;
                p.pos = NVec2::new(x, y);
                p.vel = NVec2::new(vel_x, vel_y);
                p.mass = mass;
            }
        }

        let mut buffers = VecDeque::with_capacity(settings.buffer_count);
        for _ in 0..settings.buffer_count {
            buffers.push_back(vec![0.0; settings.particle_count * ITEM_SIZE]);
        }

        let solver = Self::build_solver(&settings)?;

        Ok(Self {
            settings,
            solver,
            particles,
            buffers,
        })
    }

    /// Return a consumed buffer to the pool. Logs and drops the buffer when
    /// the pool is already full, which means the consumer double-acknowledged.
    pub fn ack(&mut self, buffer: Vec<f32>) {
        if self.buffers.len() < self.settings.buffer_count {
            self.buffers.push_back(buffer);
        } else {
            error!("unexpected ack: buffer pool already full");
        }
    }

    /// Run the solver once and serialize the resulting state into a pool
    /// buffer. Returns `None` (and logs) when the pool is exhausted; the
    /// request is dropped, not queued.
    pub fn step(&mut self, timestamp: f64) -> Option<StepResult> {
        let Some(mut buffer) = self.buffers.pop_front() else {
            error!("unexpected step: no buffer is ready");
            return None;
        };

        let outcome = self.solver.step(&mut self.particles);

        for (i, p) in self.particles.iter().enumerate() {
            buffer[i * ITEM_SIZE] = p.pos.x;
            buffer[i * ITEM_SIZE + 1] = p.pos.y;
            buffer[i * ITEM_SIZE + 2] = p.vel.x;
            buffer[i * ITEM_SIZE + 3] = p.vel.y;
            buffer[i * ITEM_SIZE + 4] = p.mass;
        }

        Some(StepResult {
            timestamp,
            buffer,
            tree_debug: outcome.tree_debug,
            force_debug: outcome.force_debug,
            stats: outcome.stats,
        })
    }

    /// Buffers currently held by the pool.
    pub fn ready_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current particle state; read-only for consumers.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    #[cfg(feature = "gpgpu")]
    fn build_solver(settings: &Settings) -> Result<Box<dyn Solver>> {
        Ok(match settings.backend {
            BackendKind::Tree => Box::new(PhysicsEngine::new(settings.clone())),
            BackendKind::Gpgpu => Box::new(crate::simulation::gpgpu::GpuPhysicsEngine::new(
                settings.clone(),
            )?),
        })
    }

    #[cfg(not(feature = "gpgpu"))]
    fn build_solver(settings: &Settings) -> Result<Box<dyn Solver>> {
        match settings.backend {
            BackendKind::Tree => Ok(Box::new(PhysicsEngine::new(settings.clone()))),
            BackendKind::Gpgpu => {
                anyhow::bail!("gpgpu backend requested but built without the \"gpgpu\" feature")
            }
        }
    }
}
