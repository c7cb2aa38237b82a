//! Particle state and initial population layouts.
//!
//! A particle is a point mass with position and velocity. During a step it is
//! owned exclusively by the solver; the pipeline only reads it to serialize
//! snapshots, and the consumer never mutates it.

use nalgebra::Vector2;
use rand::Rng;

use crate::configuration::settings::{ParticleInit, Settings};

pub type NVec2 = Vector2<f32>;

#[derive(Debug, Clone)]
pub struct Particle {
    pub pos: NVec2,
    pub vel: NVec2,
    pub mass: f32,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            pos: NVec2::zeros(),
            vel: NVec2::zeros(),
            mass: 1.0,
        }
    }
}

/// Build the initial population for a scenario.
///
/// Layouts match the configured world bounds; all particles start with mass 1.
pub fn initialize(settings: &Settings, rng: &mut impl Rng) -> Vec<Particle> {
    let n = settings.particle_count;
    let center = NVec2::new(settings.world_width / 2.0, settings.world_height / 2.0);
    let extent = settings.world_width.min(settings.world_height);

    let mut particles = Vec::with_capacity(n);
    match settings.particle_init {
        ParticleInit::Circle => {
            // Annulus between 25% and 40% of the smaller world dimension
            let r_min = extent * 0.25;
            let r_max = extent * 0.40;
            for _ in 0..n {
                let angle = rng.random_range(0.0..std::f32::consts::TAU);
                let radius = rng.random_range(r_min..r_max);
                particles.push(Particle {
                    pos: center + NVec2::new(angle.cos(), angle.sin()) * radius,
                    vel: NVec2::zeros(),
                    mass: 1.0,
                });
            }
        }

        ParticleInit::Uniform => {
            for _ in 0..n {
                particles.push(Particle {
                    pos: NVec2::new(
                        rng.random_range(0.0..settings.world_width),
                        rng.random_range(0.0..settings.world_height),
                    ),
                    vel: NVec2::zeros(),
                    mass: 1.0,
                });
            }
        }

        ParticleInit::Bang => {
            // Tight cluster at the center, velocities pointing outward
            let spawn_radius = extent * 0.02;
            let impulse = extent * 0.005;
            for _ in 0..n {
                let angle = rng.random_range(0.0..std::f32::consts::TAU);
                let dir = NVec2::new(angle.cos(), angle.sin());
                particles.push(Particle {
                    pos: center + dir * rng.random_range(0.0..spawn_radius),
                    vel: dir * rng.random_range(0.0..impulse),
                    mass: 1.0,
                });
            }
        }
    }

    particles
}
