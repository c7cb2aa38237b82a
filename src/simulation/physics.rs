//! Segment-tree force solver and shared integration helpers.
//!
//! One [`PhysicsEngine::step`] call advances every particle by one tick:
//!
//! 1. Build a [`SpatialTree`] from the current positions.
//! 2. Accumulate gravity: direct pairwise summation inside each leaf
//!    (near field), and at every internal node each child feels its
//!    siblings as single pseudo-bodies at their centers of mass
//!    (far field). Every particle pair therefore interacts exactly once,
//!    at the tree level where the two particles first separate.
//! 3. Optionally resolve pairwise collisions inside each leaf.
//! 4. Integrate: damp velocity by `resistance`, add the accumulated
//!    acceleration, advance the position, and wrap it toroidally back into
//!    the world.
//!
//! The force law is `a = dir * G_p * m / d³` with `d²` floored at
//! `min_distance_sq`, so the magnitude never exceeds the force at the floor
//! distance. Near-zero separations are clamped, never an error.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::configuration::settings::Settings;
use crate::simulation::particle::{NVec2, Particle};
use crate::simulation::tree::{SpatialTree, TreeStats};
use crate::simulation::{Solver, StepOutcome, StepStats};

pub struct PhysicsEngine {
    settings: Settings,
    pub stats: StepStats,
    accels: Vec<NVec2>,
    rng: StdRng,
}

impl PhysicsEngine {
    pub fn new(settings: Settings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let accels = vec![NVec2::zeros(); settings.particle_count];

        Self {
            settings,
            stats: StepStats::default(),
            accels,
            rng,
        }
    }

    /// Advance all particles by one tick. Returns the tree built for this
    /// step so callers can extract debug data; `self.stats` holds the
    /// diagnostics.
    pub fn step(&mut self, particles: &mut [Particle]) -> SpatialTree {
        let step_start = Instant::now();
        let tree = SpatialTree::build(particles, &self.settings, &mut self.rng);
        let tree_time = elapsed_ms(step_start);

        for accel in self.accels.iter_mut() {
            *accel = NVec2::zeros();
        }

        let mut flops = 0u64;
        self.accumulate_node(&tree, tree.root, particles, &mut flops);

        damp_and_kick(particles, &self.accels, self.settings.resistance);

        if self.settings.collision {
            resolve_collisions(&tree, particles, &self.settings);
        }

        advance_and_wrap(particles, self.settings.world_width, self.settings.world_height);

        self.stats = StepStats {
            physics_time: elapsed_ms(step_start),
            tree_time,
            tree: TreeStats {
                flops,
                depth: tree.depth,
                segment_count: tree.segment_count,
            },
            segment_times: Vec::new(),
        };

        tree
    }

    /// Per-particle accelerations accumulated by the last step.
    pub fn accelerations(&self) -> &[NVec2] {
        &self.accels
    }

    fn accumulate_node(
        &mut self,
        tree: &SpatialTree,
        node_idx: usize,
        particles: &[Particle],
        flops: &mut u64,
    ) {
        let g = self.settings.particle_gravity;
        let min_dist_sq = self.settings.min_distance_sq;
        let node = &tree.nodes[node_idx];

        if node.is_leaf() {
            // Near field: direct summation over every pair in the segment
            let indices = tree.node_particles(node_idx);
            for (a, &ia) in indices.iter().enumerate() {
                for &ib in &indices[a + 1..] {
                    let pa = &particles[ia];
                    let pb = &particles[ib];
                    self.accels[ia] += point_force(pb.pos, g * pb.mass, pa.pos, min_dist_sq);
                    self.accels[ib] += point_force(pa.pos, g * pa.mass, pb.pos, min_dist_sq);
                    *flops += 2;
                }
            }
            return;
        }

        // Far field: every particle under a child feels each sibling as one
        // pseudo-body at the sibling's center of mass
        for &child_idx in &node.children {
            for &sibling_idx in &node.children {
                if sibling_idx == child_idx {
                    continue;
                }

                let sibling = &tree.nodes[sibling_idx];
                if sibling.mass == 0.0 {
                    continue;
                }

                let g_mass = g * sibling.mass;
                for &pi in tree.node_particles(child_idx) {
                    self.accels[pi] += point_force(sibling.com, g_mass, particles[pi].pos, min_dist_sq);
                    *flops += 1;
                }
            }

            self.accumulate_node(tree, child_idx, particles, flops);
        }
    }
}

impl Solver for PhysicsEngine {
    fn step(&mut self, particles: &mut [Particle]) -> StepOutcome {
        let tree = PhysicsEngine::step(self, particles);

        StepOutcome {
            stats: self.stats.clone(),
            tree_debug: if self.settings.debug_tree {
                tree.debug_segments()
            } else {
                Vec::new()
            },
            force_debug: if self.settings.debug_force {
                self.accels.clone()
            } else {
                Vec::new()
            },
        }
    }
}

/// Acceleration on a particle at `target` from an attractor of weighted mass
/// `g_mass` at `source`. The squared distance is floored at `min_dist_sq` so
/// the magnitude stays bounded for near-zero separations.
#[inline]
pub fn point_force(source: NVec2, g_mass: f32, target: NVec2, min_dist_sq: f32) -> NVec2 {
    let dir = source - target;
    let dist_sq = dir.norm_squared().max(min_dist_sq);
    let inv_r = dist_sq.sqrt().recip();
    dir * (g_mass * inv_r * inv_r * inv_r)
}

/// Damp velocities and apply accumulated accelerations.
pub(crate) fn damp_and_kick(particles: &mut [Particle], accels: &[NVec2], resistance: f32) {
    for (p, accel) in particles.iter_mut().zip(accels.iter()) {
        p.vel *= resistance;
        p.vel += *accel;
    }
}

/// Advance positions by one tick of velocity and wrap them back into
/// `[0, width) x [0, height)`.
pub(crate) fn advance_and_wrap(particles: &mut [Particle], width: f32, height: f32) {
    for p in particles.iter_mut() {
        p.pos += p.vel;
        p.pos.x = p.pos.x.rem_euclid(width);
        p.pos.y = p.pos.y.rem_euclid(height);
    }
}

/// Pairwise elastic collision response inside each leaf. Two particles
/// closer than the interaction floor and approaching each other exchange a
/// mass-weighted impulse scaled by the configured restitution.
pub(crate) fn resolve_collisions(tree: &SpatialTree, particles: &mut [Particle], settings: &Settings) {
    let min_dist_sq = settings.min_distance_sq;
    let restitution = settings.collision_restitution;

    for node_idx in 0..tree.nodes.len() {
        let node = &tree.nodes[node_idx];
        if !node.is_leaf() || node.is_empty() {
            continue;
        }

        let indices = tree.node_particles(node_idx);
        for (a, &ia) in indices.iter().enumerate() {
            for &ib in &indices[a + 1..] {
                let dir = particles[ib].pos - particles[ia].pos;
                let dist_sq = dir.norm_squared();
                if dist_sq >= min_dist_sq || dist_sq == 0.0 {
                    continue;
                }

                let normal = dir / dist_sq.sqrt();
                let approach = (particles[ia].vel - particles[ib].vel).dot(&normal);
                if approach <= 0.0 {
                    continue;
                }

                let (ma, mb) = (particles[ia].mass, particles[ib].mass);
                let impulse = (1.0 + restitution) * approach / (1.0 / ma + 1.0 / mb);
                particles[ia].vel -= normal * (impulse / ma);
                particles[ib].vel += normal * (impulse / mb);
            }
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
