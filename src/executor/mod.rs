//! Serial GPU executor
//!
//! One dedicated worker thread owns the GPU context; tasks queued from
//! any thread run on it strictly in submission order. GPU contexts cannot
//! be shared or migrated across threads, so every draw and texture
//! operation in the pipeline funnels through here.

use crate::utils::error::RecorderError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use thiserror::Error;

/// Rendering context collaborator owned by the executor thread
///
/// The executor makes the context current exactly once on its worker
/// thread before running any task.
pub trait GpuContext: Send {
    fn make_current(&mut self) -> Result<(), RecorderError>;
    fn swap_buffers(&mut self) -> Result<(), RecorderError>;
    fn release(&mut self);
}

/// Errors returned by executor operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The executor has been stopped; no further tasks are accepted.
    #[error("gpu executor is stopped")]
    Stopped,

    /// The worker thread failed to make the GPU context current.
    #[error("gpu context initialization failed: {0}")]
    ContextInit(String),

    #[error("failed to spawn executor thread: {0}")]
    Spawn(String),
}

type GpuTask = Box<dyn FnOnce(&mut dyn GpuContext) + Send>;

enum Job {
    Task(GpuTask),
    Stop,
}

/// Single-thread FIFO task runner owning one [`GpuContext`]
///
/// Tasks on the same executor observe each other's writes in submission
/// order; no extra locking is needed between them. A panicking task is
/// caught and logged without stopping the worker.
pub struct GpuExecutor {
    tx: Sender<Job>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl GpuExecutor {
    /// Spawn the worker thread and make `context` current on it.
    ///
    /// Fails with [`ExecutorError::ContextInit`] if `make_current` fails;
    /// that failure is fatal to the executor, unlike task failures.
    pub fn spawn(mut context: Box<dyn GpuContext>) -> Result<Self, ExecutorError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker = std::thread::Builder::new()
            .name("gpu-executor".into())
            .spawn(move || {
                if let Err(e) = context.make_current() {
                    context.release();
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Task(task) => {
                            let outcome =
                                catch_unwind(AssertUnwindSafe(|| task(context.as_mut())));
                            if outcome.is_err() {
                                tracing::error!("gpu task panicked; continuing with next task");
                            }
                        }
                        Job::Stop => break,
                    }
                }
                context.release();
                tracing::debug!("gpu executor thread exiting");
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx,
                worker: parking_lot::Mutex::new(Some(worker)),
                stopped: AtomicBool::new(false),
            }),
            Ok(Err(message)) => {
                let _ = worker.join();
                Err(ExecutorError::ContextInit(message))
            }
            Err(_) => {
                let _ = worker.join();
                Err(ExecutorError::ContextInit(
                    "executor thread exited before handshake".into(),
                ))
            }
        }
    }

    /// Queue a task from any thread; never blocks, never runs the task on
    /// the caller's thread.
    pub fn queue<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut dyn GpuContext) + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ExecutorError::Stopped);
        }
        self.tx
            .send(Job::Task(Box::new(task)))
            .map_err(|_| ExecutorError::Stopped)
    }

    /// Stop the executor: tasks queued before this call are drained and
    /// run, then the context is released and the thread joined.
    ///
    /// Draining (rather than discarding) guarantees that queued teardown
    /// work cannot be lost. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Job::Stop);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("gpu executor thread panicked during shutdown");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for GpuExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
