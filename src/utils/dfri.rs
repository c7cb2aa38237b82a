//! Dynamic frame rate interpolation (DFRI).
//!
//! Absorbs the mismatch between the solver's variable step cadence and the
//! render cadence by synthesizing intermediate frames: instead of blocking
//! rendering on the solver or showing stale frames, several render frames
//! elapse per solver output, with particle positions linearly interpolated
//! toward the next output.
//!
//! `frame` counts render calls since the last solver output was consumed;
//! `interpolate_frames` is how many synthetic frames to spread across before
//! the next output is due. The target is recomputed from two independently
//! smoothed signals (measured step time and measured render-to-render time)
//! so the cadence decision never hinges on a single noisy sample.

use log::warn;

use crate::backend::ITEM_SIZE;
use crate::configuration::settings::Settings;
use crate::simulation::particle::{NVec2, Particle};
use crate::utils::smoother::DataSmoother;

enum Cadence {
    /// Known rates, e.g. when replaying a recorded session. No safety margin.
    Fixed { actual: f64, desired: f64 },
    /// Rates estimated online from posted measurements; the frame target is
    /// inflated by 10% to reduce stutter from measurement noise.
    Adaptive {
        step_time: DataSmoother,
        render_time: DataSmoother,
    },
}

pub struct DfriHelper {
    particle_count: usize,
    frame: u32,
    interpolate_frames: u32,
    max_frames: u32,
    deltas: Vec<NVec2>,
    factor: f32,
    cadence: Cadence,
}

impl DfriHelper {
    /// Adaptive interpolator fed by posted step/render measurements.
    pub fn new(settings: &Settings) -> Self {
        let mut render_time = DataSmoother::new(settings.fps * 2);
        render_time.post_value(1000.0 / settings.fps as f64, true);

        let mut helper = Self {
            particle_count: settings.particle_count,
            frame: 0,
            interpolate_frames: 0,
            max_frames: settings.dfri_max_frames,
            deltas: vec![NVec2::zeros(); settings.particle_count],
            factor: 0.0,
            cadence: Cadence::Adaptive {
                step_time: DataSmoother::new(settings.fps * 4),
                render_time,
            },
        };
        helper.interpolate_frames = helper.target_frames();
        helper
    }

    /// Fixed-rate interpolator for sources with a known cadence, such as a
    /// recorded session played back at its recorded rate.
    pub fn fixed_rate(particle_count: usize, source_fps: f64, desired_fps: f64) -> Self {
        let mut helper = Self {
            particle_count,
            frame: 0,
            interpolate_frames: 0,
            max_frames: u32::MAX,
            deltas: vec![NVec2::zeros(); particle_count],
            factor: 0.0,
            cadence: Cadence::Fixed {
                actual: 1000.0 / source_fps,
                desired: 1000.0 / desired_fps,
            },
        };
        helper.interpolate_frames = helper.target_frames();
        helper
    }

    /// True when a new solver output should be consumed: nothing has been
    /// consumed yet, or the synthetic frame budget is exhausted. Does not
    /// change state; repeated calls agree until `advance_frame` moves on.
    pub fn need_next_frame(&self) -> bool {
        self.frame == 0 || self.frame > self.interpolate_frames
    }

    /// Consume one new solver output: capture per-particle displacements to
    /// traverse until the next output, reset the frame counter, and
    /// recompute the frame budget.
    pub fn set_next_frame(&mut self, mut delta_fn: impl FnMut(usize) -> NVec2) {
        for i in 0..self.particle_count {
            self.deltas[i] = delta_fn(i);
        }
        self.reset();
    }

    /// Derive displacements from the next ahead buffer. Without an ahead
    /// buffer the solver has fallen behind; motion is extrapolated along
    /// current velocities instead, which may be visibly inconsistent.
    pub fn buffer_switched(&mut self, particles: &[Particle], ahead: Option<&[f32]>) {
        if ahead.is_none() {
            warn!("no available ahead buffer, interpolation may be inconsistent");
        }

        self.set_next_frame(|i| match ahead {
            Some(buffer) => NVec2::new(
                buffer[i * ITEM_SIZE] - particles[i].pos.x,
                buffer[i * ITEM_SIZE + 1] - particles[i].pos.y,
            ),
            None => particles[i].vel,
        });
    }

    /// Interpolation fraction for the current frame: 0 right after a reset,
    /// `frame / (interpolate_frames + 1)` within budget. Beyond the budget
    /// the denominator stretches with the overrun so motion keeps creeping
    /// forward instead of freezing or overshooting.
    pub fn get_factor(&self) -> f32 {
        if self.frame == 0 {
            return 0.0;
        }

        if self.frame > self.interpolate_frames {
            let overrun = self.frame - self.interpolate_frames + 1;
            return self.frame as f32 / (self.interpolate_frames + overrun) as f32;
        }

        self.frame as f32 / (self.interpolate_frames + 1) as f32
    }

    /// Latch the factor for this render call and count the frame.
    pub fn advance_frame(&mut self) {
        self.factor = self.get_factor();
        self.frame += 1;
    }

    /// Synthesized render position for one particle. The canonical particle
    /// state is never mutated.
    pub fn transform(&self, index: usize, particle: &Particle) -> NVec2 {
        particle.pos + self.deltas[index] * self.factor
    }

    pub fn post_step_time(&mut self, time_ms: f64, force: bool) {
        if let Cadence::Adaptive { step_time, .. } = &mut self.cadence {
            step_time.post_value(time_ms, force);
        }
    }

    pub fn post_render_time(&mut self, time_ms: f64) {
        if let Cadence::Adaptive { render_time, .. } = &mut self.cadence {
            render_time.post_value(time_ms, false);
        }
    }

    pub fn interpolate_frames(&self) -> u32 {
        self.interpolate_frames
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn reset(&mut self) {
        self.frame = 0;
        self.interpolate_frames = self.target_frames();
    }

    /// How many extra render frames fit inside one solver interval beyond
    /// the first, bounded by the configured ceiling.
    fn target_frames(&self) -> u32 {
        let (actual, desired) = match &self.cadence {
            Cadence::Fixed { actual, desired } => (*actual, *desired),
            Cadence::Adaptive {
                step_time,
                render_time,
            } => (step_time.smoothed_value(), render_time.smoothed_value()),
        };

        let raw = actual / desired - 1.0;
        if !raw.is_finite() {
            return 0;
        }

        let base = raw.ceil().clamp(0.0, self.max_frames as f64);
        match self.cadence {
            Cadence::Fixed { .. } => base as u32,
            Cadence::Adaptive { .. } => (base * 1.1).ceil() as u32,
        }
    }
}
