//! Dedicated extractor thread.
//!
//! Inference sessions are not reentrant, so a single OS thread owns the
//! extractor and every caller goes through a [`WorkerHandle`]. The handle is
//! cheap to clone and itself implements [`EmbeddingExtractor`], which makes it
//! a drop-in for the cascade and the parallel signature builder. Each call
//! waits at most `timeout` in total, queueing included; a late reply is
//! dropped on the floor.

use crate::extractor::{DetectionStrategy, EmbeddingExtractor, ExtractError};
use crate::types::DetectedFace;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use image::RgbImage;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Queue depth between callers and the worker thread.
const REQUEST_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn extractor thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("extractor initialization failed: {0}")]
    Init(String),
    #[error("extractor thread exited during initialization")]
    InitAborted,
}

struct Request {
    image: RgbImage,
    strategy: DetectionStrategy,
    reply: Sender<Result<Vec<DetectedFace>, ExtractError>>,
}

/// Clone-safe handle to the extractor thread.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<Request>,
    timeout: Duration,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl EmbeddingExtractor for WorkerHandle {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError> {
        let deadline = Instant::now() + self.timeout;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let request = Request {
            image: image.clone(),
            strategy: strategy.clone(),
            reply: reply_tx,
        };

        match self.tx.send_deadline(request, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(%strategy, timeout = ?self.timeout, "extractor queue full; request timed out");
                return Err(ExtractError::Timeout(self.timeout));
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(ExtractError::Unavailable),
        }

        match reply_rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(%strategy, timeout = ?self.timeout, "extraction timed out");
                Err(ExtractError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExtractError::Unavailable),
        }
    }
}

/// Spawn the extractor thread.
///
/// `init` runs on the new thread, so the extractor itself never has to be
/// `Send`. Returns once initialization has finished; an init failure is
/// reported here rather than on the first request.
pub fn spawn_worker<E, F>(init: F, timeout: Duration) -> Result<WorkerHandle, WorkerError>
where
    E: EmbeddingExtractor + 'static,
    F: FnOnce() -> Result<E, String> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded::<Request>(REQUEST_QUEUE_DEPTH);
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

    std::thread::Builder::new()
        .name("faceprint-extractor".into())
        .spawn(move || {
            let extractor = match init() {
                Ok(e) => {
                    let _ = ready_tx.send(Ok(()));
                    e
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            run(extractor, rx);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(WorkerHandle { tx, timeout }),
        Ok(Err(e)) => Err(WorkerError::Init(e)),
        Err(_) => Err(WorkerError::InitAborted),
    }
}

fn run<E: EmbeddingExtractor>(mut extractor: E, rx: Receiver<Request>) {
    tracing::info!("extractor thread started");
    for req in rx.iter() {
        let result = extractor.represent(&req.image, &req.strategy);
        // The caller may have timed out and gone away.
        let _ = req.reply.send(result);
    }
    tracing::info!("extractor thread exiting");
}
