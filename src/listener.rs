//! Background listener lifecycle.
//!
//! ```text
//! Idle --start--> Running --stop / stream end--> Stopping --task exits--> Idle
//! ```
//!
//! The listener owns one [`ListenerSession`] per run and a cancellation token
//! shared with the scanner. The loop checks the token between readings; an
//! in-flight pipeline step is never interrupted.

use crate::credentials::Credentials;
use crate::interest::InterestSet;
use crate::pipeline::{Clock, Pipeline, PipelineError};
use crate::remote::{DevicePaths, RemoteStore};
use crate::scanner::{ReadingResult, ScanError, Scanner};
use crate::session::ListenerSession;
use crate::throttle::ForwardInterval;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Running,
    Stopping,
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

struct Running {
    session: Arc<ListenerSession>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), PipelineError>>,
}

/// Starts and stops the sampling loop.
pub struct Listener {
    scanner: Arc<dyn Scanner>,
    credentials: Arc<Credentials>,
    store: Arc<dyn RemoteStore>,
    paths: DevicePaths,
    clock: Arc<dyn Clock>,
    running: Option<Running>,
}

impl Listener {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        credentials: Arc<Credentials>,
        store: Arc<dyn RemoteStore>,
        paths: DevicePaths,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scanner,
            credentials,
            store,
            paths,
            clock,
            running: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        match &self.running {
            None => ListenerState::Idle,
            Some(running) if running.cancel.is_cancelled() => ListenerState::Stopping,
            Some(_) => ListenerState::Running,
        }
    }

    /// Start a new session. Does nothing and returns `false` if already started.
    ///
    /// # Errors
    /// Returns `ScanError` if the scanner could not be started.
    pub async fn start(
        &mut self,
        interest: InterestSet,
        interval: ForwardInterval,
    ) -> Result<bool, ListenerError> {
        if self.running.is_some() {
            warn!("Listener already started");
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let readings = self
            .scanner
            .start_scan(interest.allow_list(), cancel.clone())
            .await?;

        let session = Arc::new(ListenerSession::new(interest, interval));
        let pipeline = Pipeline::new(
            session.clone(),
            self.credentials.clone(),
            self.store.clone(),
            self.paths.clone(),
            self.clock.clone(),
        );
        let task = tokio::spawn(run_loop(readings, pipeline, cancel.clone()));

        info!(
            %interval,
            followed = ?session.interest().followed(),
            "Listener started"
        );
        self.running = Some(Running {
            session,
            cancel,
            task,
        });
        Ok(true)
    }

    /// Shared state of the current session, for display.
    pub fn session(&self) -> Option<Arc<ListenerSession>> {
        self.running.as_ref().map(|r| r.session.clone())
    }

    /// Token that fires when the current session begins stopping, whether
    /// by [`Listener::stop`], end of the reading stream, or a fatal error.
    pub fn stopping(&self) -> Option<CancellationToken> {
        self.running.as_ref().map(|r| r.cancel.clone())
    }

    /// Stop the session and wait for the loop to exit.
    ///
    /// Returns the fatal error that ended the loop, if any. Stopping an idle
    /// listener is a no-op.
    pub async fn stop(&mut self) -> Result<(), ListenerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        let result = running.task.await?;
        info!(
            forwarded_devices = running.session.forwarded_devices(),
            "Listener stopped"
        );
        result.map_err(ListenerError::from)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Feed readings to the pipeline until cancelled, the stream ends, or a fatal error.
///
/// Non-fatal failures inside a pipeline step, panics included, are logged and
/// the loop moves on to the next reading. The token is cancelled on exit so
/// observers see the session stopping.
async fn run_loop(
    mut readings: mpsc::Receiver<ReadingResult>,
    pipeline: Pipeline,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let result = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            next = readings.recv() => next,
        };

        let reading = match next {
            None => {
                info!("Reading stream closed");
                break Ok(());
            }
            Some(Err(e)) => {
                debug!(error = %e, "Ignoring undecodable advertisement");
                continue;
            }
            Some(Ok(reading)) => reading,
        };

        let device = reading.device.clone();
        match AssertUnwindSafe(pipeline.on_reading(reading)).catch_unwind().await {
            Ok(Ok(outcome)) => trace!(device = %device, ?outcome, "Reading processed"),
            Ok(Err(fatal)) => {
                error!(device = %device, error = %fatal, "Stopping listener");
                break Err(fatal);
            }
            Err(panic) => {
                error!(device = %device, panic = panic_message(panic.as_ref()), "Pipeline step panicked");
            }
        }
    };

    cancel.cancel();
    result
}
