//! Ingestion Service
//!
//! Owns the long-running loops (REST scheduler, streaming consumer), the
//! handler set and the two collaborators, and sequences start and stop.
//!
//! Shutdown order:
//!
//! 1. Cancel every loop and wait for it to return
//! 2. `shutdown` each handler in registration order (buffers flush here)
//! 3. Close the publisher
//! 4. Close the repository
//!
//! A failing step is logged and the remaining steps still run.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::handlers::SharedHandler;
use crate::application::ports::{SharedPublisher, SharedRepository};

/// A loop that runs until its token is cancelled.
#[async_trait]
pub trait IngestLoop: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `cancel` fires.
    async fn run_until_cancelled(self: Box<Self>, cancel: CancellationToken);
}

/// Boxed loop handed to the service.
pub type BoxedLoop = Box<dyn IngestLoop>;

/// Service errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// `start` was called twice.
    #[error("service already started")]
    AlreadyStarted,

    /// `start` was called after `stop`.
    #[error("service already stopped")]
    Stopped,

    /// Some shutdown steps failed; the rest still ran.
    #[error("{failures} shutdown step(s) failed")]
    Shutdown {
        /// Number of failed steps.
        failures: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Thin orchestrator for the ingestion loops and their collaborators.
pub struct IngestionService {
    loops: Vec<BoxedLoop>,
    handlers: Vec<SharedHandler>,
    repository: SharedRepository,
    publisher: SharedPublisher,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    phase: Phase,
}

impl IngestionService {
    /// Create a service. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        loops: Vec<BoxedLoop>,
        handlers: Vec<SharedHandler>,
        repository: SharedRepository,
        publisher: SharedPublisher,
    ) -> Self {
        Self {
            loops,
            handlers,
            repository,
            publisher,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            phase: Phase::Idle,
        }
    }

    /// Token cancelled when the service stops.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the loops have been started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Spawn every loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the service was already started or stopped.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        match self.phase {
            Phase::Running => return Err(ServiceError::AlreadyStarted),
            Phase::Stopped => return Err(ServiceError::Stopped),
            Phase::Idle => {}
        }

        for ingest_loop in self.loops.drain(..) {
            let name = ingest_loop.name();
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(ingest_loop.run_until_cancelled(cancel));
            tracing::info!(task = name, "Ingestion loop started");
            self.tasks.push((name, handle));
        }

        self.phase = Phase::Running;
        tracing::info!(
            loops = self.tasks.len(),
            handlers = self.handlers.len(),
            "Ingestion service started"
        );
        Ok(())
    }

    /// Stop the loops, drain the handlers and close the collaborators.
    ///
    /// Calling `stop` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Shutdown`] if any step failed. Every step is
    /// attempted regardless.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        if self.phase == Phase::Stopped {
            return Ok(());
        }
        self.phase = Phase::Stopped;
        tracing::info!("Ingestion service stopping");

        let mut failures = 0;
        self.cancel.cancel();

        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                failures += 1;
                tracing::error!(task = name, error = %e, "Ingestion loop ended abnormally");
            }
        }

        for handler in &self.handlers {
            if let Err(e) = handler.shutdown().await {
                failures += 1;
                tracing::error!(channel = handler.channel(), error = %e, "Handler shutdown failed");
            }
        }

        if let Err(e) = self.publisher.close().await {
            failures += 1;
            tracing::error!(error = %e, "Publisher close failed");
        }

        if let Err(e) = self.repository.close().await {
            failures += 1;
            tracing::error!(error = %e, "Repository close failed");
        }

        if failures > 0 {
            return Err(ServiceError::Shutdown { failures });
        }
        tracing::info!("Ingestion service stopped");
        Ok(())
    }
}

impl std::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("pending_loops", &self.loops.len())
            .field("tasks", &self.tasks.len())
            .field("handlers", &self.handlers.len())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
