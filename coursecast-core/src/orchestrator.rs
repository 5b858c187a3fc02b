//! Drives transfer units through the transport exactly once.
//!
//! Per unit: check the ledger, upload with retries, wait out rate limits,
//! commit to the ledger, then drop the generated artifact. Every wait races the
//! [`CancelSignal`].

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::contract::{
    CancelSignal, Destination, MediaKind, ProgressObserver, ProgressReader, SentMessage, SilentObserver,
    Transport, TransportError, UnitMessage, UploadPayload,
};
use crate::error::DeliveryError;
use crate::ledger::ProgressLedger;
use crate::model::TransferUnit;

/// Upper bound on consecutive rate-limit waits for text and chat calls.
const MAX_TEXT_RATE_LIMITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Delivered { message_id: i64 },
    Skipped,
}

pub struct UploadOrchestrator {
    transport: Arc<dyn Transport>,
    ledger: Arc<ProgressLedger>,
    destination: Destination,
    policy: RetryPolicy,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancelSignal,
}

impl UploadOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: Arc<ProgressLedger>,
        destination: Destination,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            ledger,
            destination,
            policy,
            observer: Arc::new(SilentObserver),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Delivers `unit` unless the ledger already has it.
    pub async fn deliver(
        &self,
        unit: &TransferUnit,
        caption: &str,
        kind: MediaKind,
    ) -> Result<UnitOutcome, DeliveryError> {
        let key = unit.ledger_key();
        let name = unit.file_name();

        if self.ledger.is_delivered(&key) {
            info!(unit = %name, "[UPLOAD] Already delivered, skipping");
            discard(unit).await;
            return Ok(UnitOutcome::Skipped);
        }

        let timeout = if kind.is_video() {
            self.policy.video_timeout
        } else {
            self.policy.document_timeout
        };
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }

            let open_err = |source: io::Error| DeliveryError::Open {
                path: unit.path.clone(),
                source,
            };
            let file = tokio::fs::File::open(&unit.path).await.map_err(open_err)?;
            let size = file.metadata().await.map_err(open_err)?.len();
            let progress = self.observer.unit_started(&name, size);

            let message = UnitMessage {
                destination: self.destination.clone(),
                caption: caption.to_string(),
                kind: kind.clone(),
                payload: UploadPayload {
                    file_name: name.clone(),
                    size,
                    body: Box::new(ProgressReader::new(file, progress.clone())),
                },
            };

            info!(
                unit = %name,
                bytes = size,
                part = unit.index,
                of = unit.count,
                attempt = failures + 1,
                "[UPLOAD] Sending unit"
            );
            let attempt = tokio::time::timeout(timeout, self.transport.send_unit(message));
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    progress.abandon("cancelled");
                    warn!(unit = %name, "[UPLOAD] Cancelled mid-transfer");
                    return Err(DeliveryError::Cancelled);
                }
                result = attempt => result,
            };

            let err = match result {
                Ok(Ok(sent)) => {
                    progress.finish();
                    self.ledger.mark_delivered(&key)?;
                    discard(unit).await;
                    info!(unit = %name, message_id = sent.message_id, "[UPLOAD] Delivered");
                    return Ok(UnitOutcome::Delivered {
                        message_id: sent.message_id,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::Transient(format!("no response within {}s", timeout.as_secs())),
            };
            progress.abandon(&err.to_string());

            match err {
                TransportError::RateLimited(wait) => {
                    let wait = wait + self.policy.flood_wait_buffer;
                    warn!(unit = %name, wait_secs = wait.as_secs(), "[UPLOAD] Rate limited, waiting");
                    self.pause(wait).await?;
                }
                TransportError::Transient(reason) => {
                    failures += 1;
                    if failures >= max_attempts {
                        error!(unit = %name, attempts = failures, error = %reason, "[UPLOAD] Giving up");
                        return Err(DeliveryError::RetriesExhausted {
                            unit: name,
                            attempts: failures,
                            last: reason,
                        });
                    }
                    warn!(
                        unit = %name,
                        attempt = failures,
                        max_attempts,
                        error = %reason,
                        "[UPLOAD] Attempt failed, retrying"
                    );
                    self.pause(self.policy.retry_delay).await?;
                }
                TransportError::Fatal(reason) => {
                    error!(unit = %name, error = %reason, "[UPLOAD] Rejected");
                    return Err(DeliveryError::Rejected { unit: name, reason });
                }
            }
        }
    }

    /// Sends an HTML text message, waiting out rate limits.
    pub async fn send_text_with_backoff(&self, html: &str) -> Result<SentMessage, DeliveryError> {
        self.call_with_backoff("send text", || self.transport.send_text(&self.destination, html))
            .await
    }

    pub async fn pin_with_backoff(&self, message_id: i64) -> Result<(), DeliveryError> {
        self.call_with_backoff("pin message", || {
            self.transport.pin_message(&self.destination, message_id)
        })
        .await
    }

    /// Runs a ledger-free transport call with the same wait rules as units,
    /// but with a bounded number of rate-limit waits.
    pub async fn call_with_backoff<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = 0u32;
        let mut waits = 0u32;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(DeliveryError::Cancelled),
                result = op() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match err {
                TransportError::RateLimited(wait) if waits < MAX_TEXT_RATE_LIMITS => {
                    waits += 1;
                    let wait = wait + self.policy.flood_wait_buffer;
                    warn!(call = what, wait_secs = wait.as_secs(), "[UPLOAD] Rate limited, waiting");
                    self.pause(wait).await?;
                }
                TransportError::Transient(ref reason) if failures + 1 < max_attempts => {
                    failures += 1;
                    debug!(call = what, attempt = failures, error = %reason, "[UPLOAD] Retrying call");
                    self.pause(self.policy.retry_delay).await?;
                }
                other => {
                    return Err(DeliveryError::Transport {
                        what: what.to_string(),
                        source: other,
                    })
                }
            }
        }
    }

    async fn pause(&self, wait: Duration) -> Result<(), DeliveryError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeliveryError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

/// Removes a generated artifact after delivery. The original course file is kept.
async fn discard(unit: &TransferUnit) {
    if !unit.disposable {
        return;
    }
    match tokio::fs::remove_file(&unit.path).await {
        Ok(()) => debug!(path = %unit.path.display(), "[UPLOAD] Removed artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %unit.path.display(), error = %e, "[UPLOAD] Could not remove artifact"),
    }
}
