//! GPU force solver (feature `gpgpu`).
//!
//! Honors the same step contract as [`PhysicsEngine`]: the segment tree is
//! built identically, but instead of summing leaf interactions on the CPU,
//! each leaf's particles are packed into storage buffers sized to the
//! worst-case segment and pushed through one gravity compute pass (plus one
//! collision pass when enabled), with velocity deltas read back
//! synchronously after each dispatch. The far field is collapsed on the
//! host into a single per-leaf force evaluated at the leaf's center of mass
//! and applied uniformly inside the shader.
//!
//! Every segment costs a full upload → dispatch → readback round trip, so
//! step latency scales with segment count; larger `segment_max_count`
//! values amortize the transfer overhead. Step diagnostics therefore report
//! per-segment timings instead of flop/depth counts, which are meaningful
//! only for the CPU tree walk.
//!
//! Device and pipeline setup is completed in the constructor, so a step can
//! never observe a partially initialized solver; a missing adapter or
//! device is fatal at construction.
//!
//! [`PhysicsEngine`]: crate::simulation::physics::PhysicsEngine

use std::sync::mpsc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use log::error;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::configuration::settings::Settings;
use crate::simulation::particle::{NVec2, Particle};
use crate::simulation::physics::{
    advance_and_wrap, damp_and_kick, elapsed_ms, point_force, resolve_collisions,
};
use crate::simulation::tree::SpatialTree;
use crate::simulation::tree::TreeStats;
use crate::simulation::{Solver, StepOutcome, StepStats};

const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GravityParams {
    p_force: [f32; 2],
    gravity: f32,
    min_dist_sq: f32,
    count: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CollisionParams {
    min_dist_sq: f32,
    restitution: f32,
    count: u32,
    _pad: u32,
}

struct ComputePass {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
}

pub struct GpuPhysicsEngine {
    settings: Settings,
    pub stats: StepStats,
    rng: StdRng,

    device: wgpu::Device,
    queue: wgpu::Queue,
    gravity: ComputePass,
    collision: ComputePass,

    particles_buf: wgpu::Buffer,
    velocities_buf: wgpu::Buffer,
    out_buf: wgpu::Buffer,
    staging_buf: wgpu::Buffer,

    // Host-side staging, sized to the worst-case segment
    packed: Vec<[f32; 4]>,
    readback: Vec<[f32; 2]>,
    accels: Vec<NVec2>,
}

impl GpuPhysicsEngine {
    /// Acquire a device and build both compute passes. Must complete before
    /// any step; failure here is a fatal configuration error.
    pub fn new(settings: Settings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("no suitable gpu adapter found")?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("nbodysim device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .context("failed to create gpu device")?;

        let max_count = settings.segment_max_count as u64;
        let particles_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segment particles"),
            size: max_count * 16,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let velocities_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segment velocities"),
            size: max_count * 8,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("out velocity"),
            size: max_count * 8,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: max_count * 8,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let gravity_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gravity params"),
            size: std::mem::size_of::<GravityParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let collision_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("collision params"),
            size: std::mem::size_of::<CollisionParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let gravity_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("gravity"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/gravity.wgsl").into()),
        });
        let gravity_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("gravity"),
            layout: None,
            module: &gravity_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let gravity_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gravity"),
            layout: &gravity_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gravity_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out_buf.as_entire_binding(),
                },
            ],
        });

        let collision_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("collision"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/collision.wgsl").into()),
        });
        let collision_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("collision"),
            layout: None,
            module: &collision_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        let collision_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("collision"),
            layout: &collision_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: collision_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: velocities_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: out_buf.as_entire_binding(),
                },
            ],
        });

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let segment_capacity = settings.segment_max_count;
        let particle_count = settings.particle_count;

        Ok(Self {
            settings,
            stats: StepStats::default(),
            rng,
            device,
            queue,
            gravity: ComputePass {
                pipeline: gravity_pipeline,
                bind_group: gravity_bind_group,
                params: gravity_params,
            },
            collision: ComputePass {
                pipeline: collision_pipeline,
                bind_group: collision_bind_group,
                params: collision_params,
            },
            particles_buf,
            velocities_buf,
            out_buf,
            staging_buf,
            packed: vec![[0.0; 4]; segment_capacity],
            readback: vec![[0.0; 2]; segment_capacity],
            accels: vec![NVec2::zeros(); particle_count],
        })
    }

    /// Gravity pass for one leaf: upload positions/masses, dispatch, read
    /// the velocity deltas back into `self.accels`.
    fn gravity_pass(
        &mut self,
        tree: &SpatialTree,
        leaf_idx: usize,
        p_force: NVec2,
        particles: &[Particle],
    ) -> Result<()> {
        let indices = tree.node_particles(leaf_idx);
        let count = indices.len();

        for (slot, &pi) in self.packed.iter_mut().zip(indices) {
            let p = &particles[pi];
            *slot = [p.pos.x, p.pos.y, p.mass, 0.0];
        }
        self.queue.write_buffer(
            &self.particles_buf,
            0,
            bytemuck::cast_slice(&self.packed[..count]),
        );
        self.queue.write_buffer(
            &self.gravity.params,
            0,
            bytemuck::bytes_of(&GravityParams {
                p_force: [p_force.x, p_force.y],
                gravity: self.settings.particle_gravity,
                min_dist_sq: self.settings.min_distance_sq,
                count: count as u32,
                _pad: [0; 3],
            }),
        );

        self.dispatch_and_read(PassKind::Gravity, count)?;

        let indices = tree.node_particles(leaf_idx);
        for (i, &pi) in indices.iter().enumerate() {
            self.accels[pi] = NVec2::new(self.readback[i][0], self.readback[i][1]);
        }
        Ok(())
    }

    /// Collision pass for one leaf: needs the post-kick velocities uploaded
    /// alongside positions; reads corrected velocities back.
    fn collision_pass(
        &mut self,
        tree: &SpatialTree,
        leaf_idx: usize,
        particles: &mut [Particle],
    ) -> Result<()> {
        let indices = tree.node_particles(leaf_idx);
        let count = indices.len();

        for (i, &pi) in indices.iter().enumerate() {
            let p = &particles[pi];
            self.packed[i] = [p.pos.x, p.pos.y, p.mass, 0.0];
            self.readback[i] = [p.vel.x, p.vel.y];
        }
        self.queue.write_buffer(
            &self.particles_buf,
            0,
            bytemuck::cast_slice(&self.packed[..count]),
        );
        self.queue.write_buffer(
            &self.velocities_buf,
            0,
            bytemuck::cast_slice(&self.readback[..count]),
        );
        self.queue.write_buffer(
            &self.collision.params,
            0,
            bytemuck::bytes_of(&CollisionParams {
                min_dist_sq: self.settings.min_distance_sq,
                restitution: self.settings.collision_restitution,
                count: count as u32,
                _pad: 0,
            }),
        );

        self.dispatch_and_read(PassKind::Collision, count)?;

        let indices = tree.node_particles(leaf_idx);
        for (i, &pi) in indices.iter().enumerate() {
            particles[pi].vel = NVec2::new(self.readback[i][0], self.readback[i][1]);
        }
        Ok(())
    }

    /// Submit one dispatch over `count` invocations and synchronously read
    /// `out_buf` back into `self.readback`.
    fn dispatch_and_read(&mut self, kind: PassKind, count: usize) -> Result<()> {
        let pass = match kind {
            PassKind::Gravity => &self.gravity,
            PassKind::Collision => &self.collision,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("segment pass"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pass.pipeline);
            cpass.set_bind_group(0, &pass.bind_group, &[]);
            cpass.dispatch_workgroups((count as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }

        let bytes = count as u64 * 8;
        encoder.copy_buffer_to_buffer(&self.out_buf, 0, &self.staging_buf, 0, bytes);
        self.queue.submit([encoder.finish()]);

        let slice = self.staging_buf.slice(..bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .context("device poll failed")?;
        rx.recv().context("readback callback dropped")??;

        {
            let data = slice.get_mapped_range();
            let floats: &[f32] = bytemuck::cast_slice(&data);
            for (slot, pair) in self.readback.iter_mut().zip(floats.chunks_exact(2)) {
                *slot = [pair[0], pair[1]];
            }
        }
        self.staging_buf.unmap();
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum PassKind {
    Gravity,
    Collision,
}

impl Solver for GpuPhysicsEngine {
    fn step(&mut self, particles: &mut [Particle]) -> StepOutcome {
        let step_start = Instant::now();
        let tree = SpatialTree::build(particles, &self.settings, &mut self.rng);
        let tree_time = elapsed_ms(step_start);

        for accel in self.accels.iter_mut() {
            *accel = NVec2::zeros();
        }

        // One round trip per populated leaf; the far field rides along as a
        // single uniform force per segment
        let mut segment_times = Vec::with_capacity(tree.segment_count as usize);
        for (leaf_idx, p_force) in leaf_far_fields(&tree, &self.settings) {
            let segment_start = Instant::now();
            if let Err(err) = self.gravity_pass(&tree, leaf_idx, p_force, particles) {
                error!("gravity pass failed, segment skipped: {err:#}");
            }
            segment_times.push(elapsed_ms(segment_start));
        }

        damp_and_kick(particles, &self.accels, self.settings.resistance);

        if self.settings.collision {
            let mut fallback = false;
            for (leaf_idx, _) in leaf_far_fields(&tree, &self.settings) {
                if let Err(err) = self.collision_pass(&tree, leaf_idx, particles) {
                    error!("collision pass failed, resolving on host: {err:#}");
                    fallback = true;
                    break;
                }
            }
            if fallback {
                resolve_collisions(&tree, particles, &self.settings);
            }
        }

        advance_and_wrap(particles, self.settings.world_width, self.settings.world_height);

        self.stats = StepStats {
            physics_time: elapsed_ms(step_start),
            tree_time,
            tree: TreeStats {
                // Flop/depth counts only describe the CPU tree walk
                flops: 0,
                depth: 0,
                segment_count: tree.segment_count,
            },
            segment_times,
        };

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

/// Populated leaves paired with their far-field acceleration: walking down
/// from the root, every child inherits its parent's force plus the pull of
/// each sibling's aggregate mass, evaluated at the child's center of mass.
fn leaf_far_fields(tree: &SpatialTree, settings: &Settings) -> Vec<(usize, NVec2)> {
    let mut leaves = Vec::new();
    walk_far_field(tree, tree.root, NVec2::zeros(), settings, &mut leaves);
    leaves
}

fn walk_far_field(
    tree: &SpatialTree,
    node_idx: usize,
    inherited: NVec2,
    settings: &Settings,
    leaves: &mut Vec<(usize, NVec2)>,
) {
    let node = &tree.nodes[node_idx];
    if node.is_leaf() {
        if !node.is_empty() {
            leaves.push((node_idx, inherited));
        }
        return;
    }

    for &child_idx in &node.children {
        let child_com = tree.nodes[child_idx].com;
        let mut external = inherited;
        for &sibling_idx in &node.children {
            if sibling_idx == child_idx {
                continue;
            }
            let sibling = &tree.nodes[sibling_idx];
            if sibling.mass == 0.0 {
                continue;
            }
            external += point_force(
                sibling.com,
                settings.particle_gravity * sibling.mass,
                child_com,
                settings.min_distance_sq,
            );
        }
        walk_far_field(tree, child_idx, external, settings, leaves);
    }
}
