pub mod backend;
pub mod configuration;
pub mod simulation;
pub mod utils;

pub use backend::worker::{PhysicsWorker, Request};
pub use backend::{Backend, ParticleState, StepResult, ITEM_SIZE};

pub use configuration::config::ScenarioConfig;
pub use configuration::settings::{BackendKind, ParticleInit, Settings};

pub use simulation::particle::{NVec2, Particle};
pub use simulation::physics::PhysicsEngine;
pub use simulation::tree::{SegmentDebug, SpatialTree, TreeStats};
pub use simulation::{Solver, StepOutcome, StepStats};

pub use utils::dfri::DfriHelper;
pub use utils::smoother::DataSmoother;
