use std::time::Duration;

use nbodysim::simulation::physics::point_force;
use nbodysim::simulation::tree::SpatialTree;
use nbodysim::{
    Backend, DataSmoother, DfriHelper, NVec2, Particle, PhysicsEngine, PhysicsWorker, Settings,
    Solver, ITEM_SIZE,
};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Deterministic settings over a 1000x1000 world, no split jitter
pub fn test_settings(count: usize) -> Settings {
    let mut settings = Settings {
        particle_count: count,
        world_width: 1000.0,
        world_height: 1000.0,
        segment_randomness: 0.0,
        seed: Some(42),
        ..Settings::default()
    };
    settings.particle_gravity = settings.gravity / count as f32 * 10.0;
    settings
}

/// Settings with all forces and damping disabled, for pure-motion tests
pub fn inert_settings(count: usize) -> Settings {
    let mut settings = test_settings(count);
    settings.gravity = 0.0;
    settings.particle_gravity = 0.0;
    settings.resistance = 1.0;
    settings
}

pub fn particle_at(x: f32, y: f32) -> Particle {
    Particle {
        pos: NVec2::new(x, y),
        vel: NVec2::zeros(),
        mass: 1.0,
    }
}

// ==================================================================================
// Force law tests
// ==================================================================================

#[test]
fn force_follows_inverse_square_above_floor() {
    let origin = NVec2::zeros();
    let near = point_force(origin, 1.0, NVec2::new(40.0, 0.0), 400.0);
    let far = point_force(origin, 1.0, NVec2::new(80.0, 0.0), 400.0);

    let ratio = near.norm() / far.norm();
    assert!((ratio - 4.0).abs() < 1e-3, "expected ~4x, got {}", ratio);
}

#[test]
fn force_stays_bounded_below_floor() {
    let origin = NVec2::zeros();
    let min_dist_sq = 400.0;

    let tiny = point_force(origin, 1.0, NVec2::new(1e-4, 0.0), min_dist_sq);
    assert!(tiny.norm().is_finite());

    // Below the floor the multiplier is constant, so the force shrinks
    // linearly with separation instead of diverging
    let at_one = point_force(origin, 1.0, NVec2::new(1.0, 0.0), min_dist_sq);
    let at_two = point_force(origin, 1.0, NVec2::new(2.0, 0.0), min_dist_sq);
    let ratio = at_two.norm() / at_one.norm();
    assert!((ratio - 2.0).abs() < 1e-3, "expected linear scaling, got {}", ratio);
}

#[test]
fn force_points_toward_attractor() {
    let source = NVec2::new(100.0, 50.0);
    let target = NVec2::new(10.0, 10.0);
    let force = point_force(source, 1.0, target, 400.0);

    assert!(force.dot(&(source - target)) > 0.0, "force is not attractive");
}

#[test]
fn symmetric_cluster_attracts_toward_center() {
    let settings = test_settings(4);
    let mut particles = vec![
        particle_at(400.0, 400.0),
        particle_at(600.0, 400.0),
        particle_at(400.0, 600.0),
        particle_at(600.0, 600.0),
    ];
    let center = NVec2::new(500.0, 500.0);

    let mut engine = PhysicsEngine::new(settings);
    engine.step(&mut particles);

    for p in &particles {
        let inward = center - p.pos;
        assert!(
            p.vel.dot(&inward) > 0.0,
            "particle at {:?} is not falling inward",
            p.pos
        );
    }
}

// ==================================================================================
// Integration and wrapping tests
// ==================================================================================

#[test]
fn positions_wrap_toroidally() {
    let settings = inert_settings(1);
    let mut particles = vec![Particle {
        pos: NVec2::new(999.0, 999.0),
        vel: NVec2::new(2.0, 3.0),
        mass: 1.0,
    }];

    let mut engine = PhysicsEngine::new(settings);
    engine.step(&mut particles);

    assert!((particles[0].pos.x - 1.0).abs() < 1e-3, "x = {}", particles[0].pos.x);
    assert!((particles[0].pos.y - 2.0).abs() < 1e-3, "y = {}", particles[0].pos.y);
}

#[test]
fn resistance_damps_velocity() {
    let mut settings = inert_settings(1);
    settings.resistance = 0.5;
    let mut particles = vec![Particle {
        pos: NVec2::new(500.0, 500.0),
        vel: NVec2::new(10.0, 0.0),
        mass: 1.0,
    }];

    let mut engine = PhysicsEngine::new(settings);
    engine.step(&mut particles);

    assert!((particles[0].vel.x - 5.0).abs() < 1e-4);
}

#[test]
fn equal_mass_head_on_collision_swaps_velocities() {
    let mut settings = inert_settings(2);
    settings.collision = true;
    settings.collision_restitution = 1.0;

    let mut particles = vec![
        Particle {
            pos: NVec2::new(500.0, 500.0),
            vel: NVec2::new(1.0, 0.0),
            mass: 1.0,
        },
        Particle {
            pos: NVec2::new(510.0, 500.0),
            vel: NVec2::new(-1.0, 0.0),
            mass: 1.0,
        },
    ];

    let mut engine = PhysicsEngine::new(settings);
    engine.step(&mut particles);

    assert!((particles[0].vel.x + 1.0).abs() < 1e-4, "v0 = {:?}", particles[0].vel);
    assert!((particles[1].vel.x - 1.0).abs() < 1e-4, "v1 = {:?}", particles[1].vel);
}

// ==================================================================================
// Segment tree tests
// ==================================================================================

#[test]
fn unit_segments_hold_one_particle_each() {
    let mut settings = test_settings(4);
    settings.segment_max_count = 1;
    let particles = vec![
        particle_at(100.0, 100.0),
        particle_at(900.0, 100.0),
        particle_at(100.0, 900.0),
        particle_at(900.0, 900.0),
    ];

    let mut rng = StdRng::seed_from_u64(42);
    let tree = SpatialTree::build(&particles, &settings, &mut rng);

    assert_eq!(tree.segment_count as usize, particles.len());
}

#[test]
fn tree_order_is_a_permutation() {
    let settings = test_settings(100);
    let mut rng = StdRng::seed_from_u64(7);
    let particles = nbodysim::simulation::particle::initialize(&settings, &mut rng);

    let tree = SpatialTree::build(&particles, &settings, &mut rng);

    let mut seen = vec![false; particles.len()];
    for &pi in &tree.order {
        assert!(!seen[pi], "index {} appears twice", pi);
        seen[pi] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn debug_segments_cover_every_particle() {
    let mut settings = test_settings(50);
    settings.segment_max_count = 8;
    settings.debug_tree = true;
    let mut rng = StdRng::seed_from_u64(3);
    let mut particles = nbodysim::simulation::particle::initialize(&settings, &mut rng);

    let mut engine = PhysicsEngine::new(settings);
    let outcome = Solver::step(&mut engine, &mut particles);

    assert!(!outcome.tree_debug.is_empty());
    let total: usize = outcome.tree_debug.iter().map(|s| s.indices.len()).sum();
    assert_eq!(total, particles.len());
}

// ==================================================================================
// Step pipeline and buffer pool tests
// ==================================================================================

#[test]
fn buffers_are_conserved_across_step_and_ack() {
    let mut settings = test_settings(10);
    settings.buffer_count = 2;
    let mut backend = Backend::new(settings, None).unwrap();

    let first = backend.step(0.0).expect("first step");
    assert_eq!(backend.ready_buffers(), 1);
    let second = backend.step(1.0).expect("second step");
    assert_eq!(backend.ready_buffers(), 0);

    // Pool exhausted: the request is dropped, not queued
    assert!(backend.step(2.0).is_none());
    assert_eq!(backend.ready_buffers(), 0);

    backend.ack(first.buffer);
    assert_eq!(backend.ready_buffers(), 1);
    assert!(backend.step(3.0).is_some());

    backend.ack(second.buffer);
    assert_eq!(backend.ready_buffers(), 1);
}

#[test]
fn double_ack_is_dropped() {
    let mut settings = test_settings(10);
    settings.buffer_count = 1;
    let mut backend = Backend::new(settings, None).unwrap();

    let result = backend.step(0.0).expect("step");
    backend.ack(result.buffer);
    assert_eq!(backend.ready_buffers(), 1);

    // A buffer the pipeline never handed out does not grow the pool
    backend.ack(vec![0.0; 10 * ITEM_SIZE]);
    assert_eq!(backend.ready_buffers(), 1);
}

#[test]
fn step_serializes_full_particle_state() {
    let settings = inert_settings(2);
    let prior = [
        [100.0, 100.0, 1.0, 0.0, 1.0],
        [200.0, 200.0, 0.0, 1.0, 2.0],
    ];
    let mut backend = Backend::new(settings, Some(&prior)).unwrap();

    let result = backend.step(7.0).expect("step");
    assert_eq!(result.timestamp, 7.0);
    assert_eq!(result.buffer.len(), 2 * ITEM_SIZE);

    // No forces, no damping: positions advance by exactly one velocity tick
    assert_eq!(&result.buffer[..ITEM_SIZE], &[101.0, 100.0, 1.0, 0.0, 1.0]);
    assert_eq!(&result.buffer[ITEM_SIZE..], &[200.0, 201.0, 0.0, 1.0, 2.0]);
}

#[test]
fn prior_state_overlays_initial_population() {
    let settings = test_settings(3);
    let prior = [[5.0, 6.0, 1.0, 2.0, 3.0]];
    let backend = Backend::new(settings, Some(&prior)).unwrap();

    let particles = backend.particles();
    assert_eq!(particles[0].pos, NVec2::new(5.0, 6.0));
    assert_eq!(particles[0].vel, NVec2::new(1.0, 2.0));
    assert_eq!(particles[0].mass, 3.0);

    // Entries beyond the recorded state keep their initialized values
    assert_eq!(particles[1].mass, 1.0);
}

#[test]
fn degenerate_scenarios_are_rejected() {
    let mut settings = test_settings(10);
    settings.world_width = 0.0;
    assert!(Backend::new(settings, None).is_err());

    let mut settings = test_settings(10);
    settings.resistance = 0.0;
    assert!(settings.validate().is_err());

    let mut settings = test_settings(10);
    settings.segment_divider = 1;
    assert!(settings.validate().is_err());
}

// ==================================================================================
// Worker tests
// ==================================================================================

#[test]
fn worker_produces_steps_in_request_order() {
    let mut settings = test_settings(10);
    settings.buffer_count = 2;
    let worker = PhysicsWorker::spawn(settings, None).unwrap();

    worker.request_step(1.0);
    worker.request_step(2.0);

    let first = worker.recv_timeout(Duration::from_secs(5)).expect("first step");
    let second = worker.recv_timeout(Duration::from_secs(5)).expect("second step");
    assert_eq!(first.timestamp, 1.0);
    assert_eq!(second.timestamp, 2.0);

    // Returning a buffer makes the pool usable again
    worker.ack(first.buffer);
    worker.request_step(3.0);
    let third = worker.recv_timeout(Duration::from_secs(5)).expect("third step");
    assert_eq!(third.timestamp, 3.0);
}

#[test]
fn worker_shuts_down_cleanly_on_drop() {
    let settings = test_settings(10);
    let worker = PhysicsWorker::spawn(settings, None).unwrap();
    worker.request_step(0.0);
    drop(worker);
}

// ==================================================================================
// DFRI tests
// ==================================================================================

#[test]
fn fixed_rate_budget_matches_cadence_ratio() {
    // A 10 fps source rendered at 50 fps leaves 4 synthetic frames per step
    let dfri = DfriHelper::fixed_rate(1, 10.0, 50.0);
    assert_eq!(dfri.interpolate_frames(), 4);
}

#[test]
fn factor_starts_at_zero_and_grows_monotonically() {
    let mut dfri = DfriHelper::fixed_rate(1, 10.0, 50.0);
    dfri.set_next_frame(|_| NVec2::new(5.0, 0.0));
    let particle = particle_at(0.0, 0.0);

    let mut previous = -1.0;
    for i in 0..7 {
        dfri.advance_frame();
        let x = dfri.transform(0, &particle).x;
        if i == 0 {
            assert_eq!(x, 0.0, "first frame must show the raw buffer");
        }
        assert!(x > previous || (i == 0 && x == 0.0), "factor regressed at frame {}", i);
        assert!(x < 5.0, "interpolation overshot the next buffer");
        previous = x;
    }
}

#[test]
fn need_next_frame_is_idempotent() {
    let mut dfri = DfriHelper::fixed_rate(1, 10.0, 50.0);
    assert!(dfri.need_next_frame());
    assert!(dfri.need_next_frame());

    dfri.set_next_frame(|_| NVec2::zeros());
    dfri.advance_frame();
    assert!(!dfri.need_next_frame());
    assert!(!dfri.need_next_frame());
}

#[test]
fn buffer_switch_interpolates_toward_ahead_buffer() {
    let mut dfri = DfriHelper::fixed_rate(1, 10.0, 50.0);
    let particles = vec![Particle {
        pos: NVec2::new(10.0, 10.0),
        vel: NVec2::new(1.0, 1.0),
        mass: 1.0,
    }];

    let mut ahead = vec![0.0; ITEM_SIZE];
    ahead[0] = 15.0;
    ahead[1] = 10.0;
    dfri.buffer_switched(&particles, Some(&ahead));

    dfri.advance_frame(); // factor 0
    dfri.advance_frame(); // factor 1/5
    let pos = dfri.transform(0, &particles[0]);
    assert!((pos.x - 11.0).abs() < 1e-4, "x = {}", pos.x);
    assert!((pos.y - 10.0).abs() < 1e-4, "y = {}", pos.y);
}

#[test]
fn missing_ahead_buffer_falls_back_to_velocity() {
    let mut dfri = DfriHelper::fixed_rate(1, 10.0, 50.0);
    let particles = vec![Particle {
        pos: NVec2::new(10.0, 10.0),
        vel: NVec2::new(5.0, 0.0),
        mass: 1.0,
    }];

    dfri.buffer_switched(&particles, None);
    dfri.advance_frame();
    dfri.advance_frame();

    let pos = dfri.transform(0, &particles[0]);
    assert!((pos.x - 11.0).abs() < 1e-4, "x = {}", pos.x);
}

// ==================================================================================
// Smoother tests
// ==================================================================================

#[test]
fn forced_sample_seeds_the_estimate() {
    let mut smoother = DataSmoother::new(60);
    smoother.post_value(16.0, false);
    smoother.post_value(100.0, true);
    assert_eq!(smoother.smoothed_value(), 100.0);
}

#[test]
fn estimate_converges_to_a_constant_signal() {
    let mut smoother = DataSmoother::new(30);
    smoother.post_value(0.0, true);
    for _ in 0..200 {
        smoother.post_value(10.0, false);
    }
    assert!((smoother.smoothed_value() - 10.0).abs() < 0.5);
}
