//! Isolated worker thread driving the step pipeline.
//!
//! Solving runs on its own thread so a slow step can never stall the
//! consumer. Communication is strictly message-passing: requests go in, step
//! results come out, and step buffers cross the boundary by move only; the
//! two sides never share mutable state. Both channels are FIFO, so buffers
//! are produced and acknowledged in order.
//!
//! There is no cancellation: a requested step is always eventually produced
//! (or the worker is torn down with the handle). Timeouts are not part of
//! the step contract; drop detection lives in the consumer's render loop.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;

use crate::backend::{Backend, ParticleState, StepResult};
use crate::configuration::settings::Settings;

/// Requests accepted by the worker.
pub enum Request {
    Step { timestamp: f64 },
    Ack { buffer: Vec<f32> },
}

/// Consumer-side handle. Dropping it closes the request channel and joins
/// the worker thread.
pub struct PhysicsWorker {
    requests: Option<Sender<Request>>,
    results: Receiver<StepResult>,
    handle: Option<JoinHandle<()>>,
}

impl PhysicsWorker {
    /// Construct the pipeline and move it onto a dedicated thread.
    ///
    /// The backend is built on the calling thread so configuration errors
    /// surface at startup rather than inside the worker.
    pub fn spawn(settings: Settings, prior_state: Option<Vec<ParticleState>>) -> Result<Self> {
        let backend = Backend::new(settings, prior_state.as_deref())?;

        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (result_tx, result_rx) = mpsc::channel::<StepResult>();

        let handle = thread::Builder::new()
            .name("physics".into())
            .spawn(move || run(backend, request_rx, result_tx))
            .context("failed to spawn physics worker thread")?;

        Ok(Self {
            requests: Some(request_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    /// Ask for one step. The result arrives on the result channel unless the
    /// pool is exhausted, in which case the worker drops the request.
    pub fn request_step(&self, timestamp: f64) {
        self.send(Request::Step { timestamp });
    }

    /// Return a consumed buffer to the pipeline's pool.
    pub fn ack(&self, buffer: Vec<f32>) {
        self.send(Request::Ack { buffer });
    }

    /// Non-blocking poll for a produced step.
    pub fn try_recv(&self) -> Option<StepResult> {
        match self.results.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("physics worker disconnected");
                None
            }
        }
    }

    /// Blocking wait for a produced step, bounded by `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StepResult> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("physics worker disconnected");
                None
            }
        }
    }

    fn send(&self, request: Request) {
        if let Some(requests) = &self.requests {
            if requests.send(request).is_err() {
                warn!("physics worker is gone, request dropped");
            }
        }
    }
}

impl Drop for PhysicsWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(mut backend: Backend, requests: Receiver<Request>, results: Sender<StepResult>) {
    for request in requests {
        match request {
            Request::Step { timestamp } => {
                if let Some(result) = backend.step(timestamp) {
                    if results.send(result).is_err() {
                        break;
                    }
                }
            }

            Request::Ack { buffer } => backend.ack(buffer),
        }
    }
}
