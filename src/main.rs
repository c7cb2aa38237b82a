use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use nbodysim::{
    DfriHelper, NVec2, Particle, PhysicsWorker, ScenarioConfig, Settings, StepResult, StepStats,
    ITEM_SIZE,
};

#[derive(Parser, Debug)]
#[command(about = "Headless n-body simulation driver")]
struct Args {
    /// Scenario YAML, resolved relative to the scenarios/ directory
    #[arg(short, default_value = "default.yaml")]
    file_name: String,

    /// Stop after this many render frames; 0 runs until interrupted
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(file_name);
    let file = File::open(&config_path)
        .with_context(|| format!("failed to open scenario {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;

    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let settings = Settings::from_config(&scenario_cfg);

    run(settings, args.frames)
}

/// Milliseconds since the driver started; timestamps on step requests and
/// results share this epoch.
fn now_ms(epoch: Instant) -> f64 {
    epoch.elapsed().as_secs_f64() * 1000.0
}

/// Consumer side of the step pipeline: paces itself to the configured fps,
/// keeps the worker busy within the buffer budget, and interpolates between
/// solver outputs through the DFRI helper.
struct Driver {
    settings: Settings,
    worker: PhysicsWorker,
    particles: Vec<Particle>,
    ahead: VecDeque<StepResult>,
    pending: usize,
    dfri: Option<DfriHelper>,
    last_stats: Option<StepStats>,
}

impl Driver {
    fn request_next_step(&mut self, epoch: Instant) {
        self.pending += 1;
        self.worker.request_step(now_ms(epoch));
    }

    /// Pull every produced step off the result channel and top the request
    /// queue back up to the buffer budget.
    fn drain_results(&mut self, epoch: Instant) {
        while let Some(result) = self.worker.try_recv() {
            if let Some(dfri) = &mut self.dfri {
                dfri.post_step_time(now_ms(epoch) - result.timestamp, false);
            }

            self.ahead.push_back(result);
            self.pending -= 1;

            if self.ahead.len() + self.pending < self.settings.buffer_count {
                self.request_next_step(epoch);
            }
        }
    }

    /// Consume the next solver output when the interpolation budget is
    /// exhausted. An empty ahead queue means the solver has fallen behind;
    /// the current frame is stretched rather than blocked on.
    fn prepare_next_step(&mut self, epoch: Instant) {
        if self.dfri.as_ref().is_some_and(|d| !d.need_next_frame()) {
            return;
        }

        let Some(result) = self.ahead.pop_front() else {
            warn!("next buffer not ready, frames may be dropped");
            return;
        };

        for (i, p) in self.particles.iter_mut().enumerate() {
            p.pos = NVec2::new(result.buffer[i * ITEM_SIZE], result.buffer[i * ITEM_SIZE + 1]);
            p.vel = NVec2::new(
                result.buffer[i * ITEM_SIZE + 2],
                result.buffer[i * ITEM_SIZE + 3],
            );
            p.mass = result.buffer[i * ITEM_SIZE + 4];
        }

        self.last_stats = Some(result.stats);
        self.worker.ack(result.buffer);
        self.request_next_step(epoch);

        if let Some(dfri) = &mut self.dfri {
            dfri.buffer_switched(
                &self.particles,
                self.ahead.front().map(|r| r.buffer.as_slice()),
            );
        }
    }

    /// Headless stand-in for drawing: advance the interpolator and reduce
    /// the transformed positions to a centroid so the frame path is
    /// exercised end to end.
    fn render_frame(&mut self) -> NVec2 {
        let mut centroid = NVec2::zeros();

        match &mut self.dfri {
            Some(dfri) => {
                dfri.advance_frame();
                for (i, p) in self.particles.iter().enumerate() {
                    centroid += dfri.transform(i, p);
                }
            }
            None => {
                for p in &self.particles {
                    centroid += p.pos;
                }
            }
        }

        centroid / self.particles.len().max(1) as f32
    }

    fn log_stats(&self, centroid: NVec2) {
        let Some(stats) = &self.last_stats else {
            return;
        };

        info!(
            "step {:.2} ms (tree {:.2} ms), {} segments, ahead {}, interpolating {} frames, centroid ({:.1}, {:.1})",
            stats.physics_time,
            stats.tree_time,
            stats.tree.segment_count,
            self.ahead.len(),
            self.dfri.as_ref().map_or(0, |d| d.interpolate_frames()),
            centroid.x,
            centroid.y,
        );
    }
}

fn run(settings: Settings, frames: u64) -> Result<()> {
    let epoch = Instant::now();
    let worker = PhysicsWorker::spawn(settings.clone(), None)?;

    let mut driver = Driver {
        particles: vec![Particle::default(); settings.particle_count],
        ahead: VecDeque::new(),
        pending: 0,
        dfri: settings.enable_dfri.then(|| DfriHelper::new(&settings)),
        last_stats: None,
        worker,
        settings,
    };

    // The first step gates the loop so warm-up is never counted as dropped
    // frames.
    driver.request_next_step(epoch);
    match driver.worker.recv_timeout(Duration::from_secs(30)) {
        Some(result) => {
            if let Some(dfri) = &mut driver.dfri {
                dfri.post_step_time(now_ms(epoch) - result.timestamp, true);
            }
            driver.ahead.push_back(result);
            driver.pending -= 1;
        }
        None => bail!("physics worker produced no step within 30s"),
    }

    let frame_interval = Duration::from_secs_f64(1.0 / driver.settings.fps as f64);
    let mut last_render = Instant::now() - frame_interval;
    let mut last_report = Instant::now();
    let mut rendered = 0u64;

    while frames == 0 || rendered < frames {
        let frame_start = Instant::now();
        if let Some(dfri) = &mut driver.dfri {
            dfri.post_render_time((frame_start - last_render).as_secs_f64() * 1000.0);
        }
        last_render = frame_start;

        driver.drain_results(epoch);
        driver.prepare_next_step(epoch);
        let centroid = driver.render_frame();
        rendered += 1;

        if driver.settings.stats && last_report.elapsed() >= Duration::from_secs(1) {
            driver.log_stats(centroid);
            last_report = Instant::now();
        }

        let spent = frame_start.elapsed();
        if spent < frame_interval {
            thread::sleep(frame_interval - spent);
        }
    }

    Ok(())
}
