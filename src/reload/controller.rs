// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hot-reload controller for the encryption configuration file.
//!
//! A single worker drains a one-slot sentinel queue. The ticker and the
//! failure path both enqueue the sentinel; because the queue holds at most
//! one pending item, bursts collapse and no two reload attempts ever run
//! concurrently. Each attempt re-reads the file, short-circuits when the
//! content hash is unchanged, health-gates the freshly built transformers,
//! and only then swaps them into the holder. A working generation is never
//! replaced by a broken one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{
    load_encryption_config, ConfigError, LoadedConfiguration, MIN_KMS_CLOSE_GRACE_PERIOD,
};
use crate::envelope::EnvelopeServiceFactory;
use crate::health::HealthCheck;
use crate::metrics::metrics;
use crate::shutdown::ShutdownToken;

use super::holder::DynamicTransformers;

/// Default interval between file polls. Integration tests shorten this via
/// [`EncryptionConfigController::with_poll_period`].
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(100);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Errors of a single reload attempt.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// The file failed to load, validate or compile.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The compiled configuration did not carry exactly one health check.
    #[error("unexpected number of health checks: {0}, expected exactly one")]
    UnexpectedHealthChecks(usize),

    /// The new transformers never passed their health check within the
    /// gate deadline.
    #[error("health check for new transformers failed: {0}")]
    HealthGate(String),

    /// The attempt was cancelled while polling the new transformers'
    /// health check, typically because the server is shutting down.
    #[error("reload attempt cancelled while waiting for new transformers to become healthy")]
    Cancelled,
}

enum Applied {
    Updated,
    Unchanged,
}

/// Watches the encryption configuration file and hot-swaps transformers.
pub struct EncryptionConfigController {
    name: String,
    file_path: PathBuf,
    holder: Arc<DynamicTransformers>,
    apiserver_id: String,
    factory: Arc<dyn EnvelopeServiceFactory>,
    poll_period: Duration,
    last_loaded_hash: parking_lot::Mutex<String>,
    consecutive_failures: AtomicU32,
    tx: mpsc::Sender<()>,
    rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl EncryptionConfigController {
    /// Creates a controller watching `file_path`.
    ///
    /// `initial_hash` is the content hash of the configuration the holder
    /// was booted with; the first poll is a no-op unless the file already
    /// changed. One sentinel is enqueued up front so a change that lands
    /// between the boot load and [`EncryptionConfigController::run`] is not
    /// missed.
    pub fn new(
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        holder: Arc<DynamicTransformers>,
        initial_hash: impl Into<String>,
        apiserver_id: impl Into<String>,
        factory: Arc<dyn EnvelopeServiceFactory>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(());

        Self {
            name: name.into(),
            file_path: file_path.into(),
            holder,
            apiserver_id: apiserver_id.into(),
            factory,
            poll_period: DEFAULT_POLL_PERIOD,
            last_loaded_hash: parking_lot::Mutex::new(initial_hash.into()),
            consecutive_failures: AtomicU32::new(0),
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Overrides the file poll interval.
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Runs the controller until `shutdown` is cancelled, then releases the
    /// holder's generations.
    #[instrument(skip(self, shutdown), fields(name = %self.name))]
    pub async fn run(&self, shutdown: ShutdownToken) {
        let rx = self.rx.lock().take();
        let Some(mut rx) = rx else {
            warn!("controller is already running");
            return;
        };

        info!(file = %self.file_path.display(), "starting encryption configuration controller");
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.poll_period,
            self.poll_period,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = self.tx.try_send(());
                }
                Some(()) = rx.recv() => {
                    self.process_work_item(&shutdown).await;
                }
            }
        }

        self.holder.shutdown();
        info!("shutting down encryption configuration controller");
    }

    async fn process_work_item(&self, shutdown: &ShutdownToken) {
        // Everything this attempt builds lives under a child of the server
        // token: a failed or redundant attempt is torn down on its own,
        // and server shutdown cancels any attempt still in flight.
        let attempt = shutdown.child();

        match self.try_reload(&attempt).await {
            Ok(Applied::Updated) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                metrics().record_reload_success(&self.apiserver_id);
            }
            Ok(Applied::Unchanged) => {
                attempt.cancel();
            }
            Err(err) => {
                attempt.cancel();
                metrics().record_reload_failure(&self.apiserver_id);
                error!(
                    file = %self.file_path.display(),
                    error = %err,
                    "error processing encryption configuration file"
                );
                self.schedule_retry(shutdown);
            }
        }
    }

    async fn try_reload(&self, attempt: &ShutdownToken) -> Result<Applied, ReloadError> {
        let mut loaded =
            load_encryption_config(&self.file_path, true, &self.factory, attempt).await?;

        if loaded.content_hash == *self.last_loaded_hash.lock() {
            debug!(name = %self.name, "encryption configuration has not changed");
            return Ok(Applied::Unchanged);
        }

        if loaded.health_checks.len() != 1 {
            return Err(ReloadError::UnexpectedHealthChecks(
                loaded.health_checks.len(),
            ));
        }
        let health_check = loaded.health_checks.remove(0);

        self.gate_on_health(&health_check, &loaded, attempt).await?;

        let close_token = attempt.clone();
        self.holder.set(
            loaded.transformers,
            Box::new(move || close_token.cancel()),
            health_check,
            loaded.kms_close_grace_period,
        );
        *self.last_loaded_hash.lock() = loaded.content_hash;
        info!(name = %self.name, "loaded new encryption configuration content");

        Ok(Applied::Updated)
    }

    /// Polls the new transformers' health check until it passes, the gate
    /// deadline expires, or `attempt` is cancelled. The deadline is the
    /// configuration's close grace period, floored at 10 s.
    async fn gate_on_health(
        &self,
        health_check: &Arc<dyn HealthCheck>,
        loaded: &LoadedConfiguration,
        attempt: &ShutdownToken,
    ) -> Result<(), ReloadError> {
        let deadline = loaded
            .kms_close_grace_period
            .max(MIN_KMS_CLOSE_GRACE_PERIOD);
        let started = tokio::time::Instant::now();

        loop {
            let result = tokio::select! {
                result = health_check.check() => result,
                _ = attempt.cancelled() => return Err(ReloadError::Cancelled),
            };
            match result {
                Ok(()) => {
                    debug!(name = %self.name, "health check of new transformers succeeded");
                    return Ok(());
                }
                Err(err) => {
                    if started.elapsed() >= deadline {
                        return Err(ReloadError::HealthGate(err.to_string()));
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
                _ = attempt.cancelled() => return Err(ReloadError::Cancelled),
            }
        }
    }

    fn schedule_retry(&self, shutdown: &ShutdownToken) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = backoff_delay(failures);
        debug!(failures, delay_secs = delay.as_secs(), "scheduling reload retry");

        let tx = self.tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.try_send(());
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

/// Exponential backoff, capped so a recovered provider is retried within a
/// bounded time.
fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    (BACKOFF_BASE * 2u32.pow(exponent)).min(BACKOFF_MAX)
}
