//! Spatial segment tree for approximate gravity.
//!
//! The world is recursively subdivided into `segment_divider²` cells until a
//! cell holds at most `segment_max_count` particles. Split lines are jittered
//! by `segment_randomness` so the partition does not align the same way on
//! successive steps, which would otherwise produce visible grid artifacts.
//!
//! The tree is rebuilt from scratch every step and discarded after the force
//! pass; nothing persists across steps. Each node stores the total mass and
//! center of mass of its subtree, which the solver uses to treat whole
//! segments as single pseudo-bodies for far-field interactions.

use rand::Rng;

use crate::configuration::settings::Settings;
use crate::simulation::particle::{NVec2, Particle};

/// Hard recursion cap; protects against coincident particles that no amount
/// of subdividing can separate.
pub const MAX_DEPTH: u32 = 16;

/// Per-step tree diagnostics, consumed only by observability collaborators.
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    pub flops: u64,
    pub depth: u32,
    pub segment_count: u32,
}

/// Boundary dump of one populated leaf, captured when `debug_tree` is set.
#[derive(Debug, Clone)]
pub struct SegmentDebug {
    pub min: NVec2,
    pub max: NVec2,
    pub indices: Vec<usize>,
}

/// One node of the segment tree. Leaves have no children and reference a
/// contiguous range of `SpatialTree::order`; internal nodes cover the union
/// of their children's ranges.
pub struct SegmentNode {
    pub min: NVec2,
    pub max: NVec2,
    pub start: usize,
    pub end: usize,
    pub children: Vec<usize>,
    pub mass: f32,
    pub com: NVec2,
    pub depth: u32,
}

impl SegmentNode {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A fully built segment tree over one step's particle positions.
///
/// `order` holds particle indices grouped so that every node's subtree is the
/// contiguous range `order[node.start..node.end]`.
pub struct SpatialTree {
    pub nodes: Vec<SegmentNode>,
    pub order: Vec<usize>,
    pub root: usize,
    pub depth: u32,
    pub segment_count: u32,
}

impl SpatialTree {
    pub fn build(particles: &[Particle], settings: &Settings, rng: &mut impl Rng) -> Self {
        let n = particles.len();
        let (min, max) = bounding_box(particles, settings);

        let mut tree = Self {
            nodes: Vec::new(),
            order: (0..n).collect(),
            root: 0,
            depth: 0,
            segment_count: 0,
        };
        tree.root = tree.build_node(particles, settings, rng, 0, n, min, max, 0);
        tree
    }

    /// Indices of the particles contained in a node's subtree.
    pub fn node_particles(&self, node_idx: usize) -> &[usize] {
        let node = &self.nodes[node_idx];
        &self.order[node.start..node.end]
    }

    /// Enumerate populated leaves for visualization.
    pub fn debug_segments(&self) -> Vec<SegmentDebug> {
        self.nodes
            .iter()
            .filter(|node| node.is_leaf() && !node.is_empty())
            .map(|node| SegmentDebug {
                min: node.min,
                max: node.max,
                indices: self.order[node.start..node.end].to_vec(),
            })
            .collect()
    }

    fn build_node(
        &mut self,
        particles: &[Particle],
        settings: &Settings,
        rng: &mut impl Rng,
        start: usize,
        end: usize,
        min: NVec2,
        max: NVec2,
        depth: u32,
    ) -> usize {
        let mut mass = 0.0;
        let mut com = NVec2::zeros();
        for &pi in &self.order[start..end] {
            let p = &particles[pi];
            mass += p.mass;
            com += p.pos * p.mass;
        }
        if mass > 0.0 {
            com /= mass;
        }

        let node_idx = self.nodes.len();
        self.nodes.push(SegmentNode {
            min,
            max,
            start,
            end,
            children: Vec::new(),
            mass,
            com,
            depth,
        });

        let count = end - start;
        if count <= settings.segment_max_count || depth >= MAX_DEPTH {
            self.depth = self.depth.max(depth);
            if count > 0 {
                self.segment_count += 1;
            }
            return node_idx;
        }

        let divider = settings.segment_divider as usize;
        let xs = split_lines(min.x, max.x, divider, settings.segment_randomness, rng);
        let ys = split_lines(min.y, max.y, divider, settings.segment_randomness, rng);

        // Bucket the particles of this node into the divider x divider grid
        let span = self.order[start..end].to_vec();
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); divider * divider];
        for pi in span {
            let cx = cell_index(particles[pi].pos.x, &xs);
            let cy = cell_index(particles[pi].pos.y, &ys);
            buckets[cy * divider + cx].push(pi);
        }

        // Write buckets back as contiguous sub-ranges and recurse; empty
        // cells produce no node at all
        let mut children = Vec::new();
        let mut cursor = start;
        for cy in 0..divider {
            for cx in 0..divider {
                let bucket = &buckets[cy * divider + cx];
                if bucket.is_empty() {
                    continue;
                }

                let child_start = cursor;
                self.order[cursor..cursor + bucket.len()].copy_from_slice(bucket);
                cursor += bucket.len();

                let child_min = NVec2::new(xs[cx], ys[cy]);
                let child_max = NVec2::new(xs[cx + 1], ys[cy + 1]);
                let child = self.build_node(
                    particles,
                    settings,
                    rng,
                    child_start,
                    cursor,
                    child_min,
                    child_max,
                    depth + 1,
                );
                children.push(child);
            }
        }

        self.nodes[node_idx].children = children;
        node_idx
    }
}

/// Axis-aligned bounds of the current particle positions; falls back to the
/// world bounds when there are no particles.
fn bounding_box(particles: &[Particle], settings: &Settings) -> (NVec2, NVec2) {
    if particles.is_empty() {
        return (
            NVec2::zeros(),
            NVec2::new(settings.world_width, settings.world_height),
        );
    }

    let mut min = NVec2::new(f32::INFINITY, f32::INFINITY);
    let mut max = NVec2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in particles {
        min.x = min.x.min(p.pos.x);
        min.y = min.y.min(p.pos.y);
        max.x = max.x.max(p.pos.x);
        max.y = max.y.max(p.pos.y);
    }
    (min, max)
}

/// Cell boundaries along one axis: `divider + 1` lines from `min` to `max`,
/// with interior lines shifted by up to half a cell times `randomness`.
fn split_lines(min: f32, max: f32, divider: usize, randomness: f32, rng: &mut impl Rng) -> Vec<f32> {
    let cell = (max - min) / divider as f32;
    let mut lines = Vec::with_capacity(divider + 1);
    lines.push(min);
    for i in 1..divider {
        let jitter = (rng.random::<f32>() - 0.5) * cell * randomness;
        lines.push(min + cell * i as f32 + jitter);
    }
    lines.push(max);
    lines
}

/// Index of the cell containing `value`, given sorted cell boundaries.
fn cell_index(value: f32, lines: &[f32]) -> usize {
    let cells = lines.len() - 1;
    for i in (1..cells).rev() {
        if value >= lines[i] {
            return i;
        }
    }
    0
}
