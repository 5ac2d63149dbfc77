//! Heartbeat sender reporting the status of one reconciliation.
//!
//! Interim statuses (`running`, `failed`) are re-sent every interval until the status
//! changes. Final statuses (`success`, `error`) are sent until delivered or the
//! heartbeat timeout elapses. Once a final status was set, no further change is
//! accepted.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::callback::CallbackHandler;
use crate::error::{Error, Result};
use crate::model::{CallbackMessage, Status};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Error reported with the `failed` status sent when the context closes.
pub(crate) const CONTEXT_CLOSED: &str =
    "reconciliation was interrupted because its context was closed";

/// Heartbeat interval and give-up timeout; zero selects the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Fill in defaults and check that the timeout exceeds the interval.
    pub fn validate(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            self.interval = DEFAULT_INTERVAL;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.timeout <= self.interval {
            return Err(Error::Config(format!(
                "heartbeat timeout cannot be <= interval ({:.1} secs <= {:.1} secs)",
                self.timeout.as_secs_f64(),
                self.interval.as_secs_f64()
            )));
        }
        Ok(())
    }
}

struct SenderState {
    status: Status,
    retry_id: String,
    /// Stops the resend loop of the current status
    job: Option<CancellationToken>,
}

/// Sends status transitions of one task to its callback handler.
pub struct HeartbeatSender {
    callback: Arc<dyn CallbackHandler>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
    state: Mutex<SenderState>,
}

impl HeartbeatSender {
    pub fn new(
        callback: Arc<dyn CallbackHandler>,
        mut config: HeartbeatConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            callback,
            config,
            cancel,
            state: Mutex::new(SenderState {
                status: Status::NotStarted,
                retry_id: String::new(),
                job: None,
            }),
        })
    }

    pub fn current_status(&self) -> Status {
        self.lock().status
    }

    /// Report the start of an attempt.
    ///
    /// Delivery problems are only logged: the report keeps being re-sent.
    pub async fn running(&self, retry_id: &str) -> Result<()> {
        self.change_allowed(Status::Running)?;
        if let Err(err) = self.send_update(Status::Running, None, retry_id, false).await {
            warn!(error = %err, "Heartbeat failed to report running status, will retry");
        }
        Ok(())
    }

    /// Report a failed attempt. More attempts may follow.
    pub async fn failed(&self, reason: &Error) -> Result<()> {
        self.change_allowed(Status::Failed)?;
        let retry_id = self.lock().retry_id.clone();
        self.send_update(Status::Failed, Some(reason.to_string()), &retry_id, false)
            .await
    }

    pub async fn success(&self) -> Result<()> {
        self.change_allowed(Status::Success)?;
        let retry_id = self.lock().retry_id.clone();
        self.send_update(Status::Success, None, &retry_id, true).await
    }

    /// Report the terminal failure of the reconciliation.
    pub async fn error(&self, reason: &Error) -> Result<()> {
        self.change_allowed(Status::Error)?;
        let retry_id = self.lock().retry_id.clone();
        self.send_update(Status::Error, Some(reason.to_string()), &retry_id, true)
            .await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn change_allowed(&self, next: Status) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "cannot change status to '{next}' because the heartbeat context is closed"
            )));
        }
        let current = self.lock().status;
        if current.is_final() {
            return Err(Error::StatusTransition(format!(
                "cannot switch to '{next}' status because '{current}' is already final"
            )));
        }
        Ok(())
    }

    /// Send `status` once right away and keep re-sending it in the background.
    ///
    /// Returns the result of the first delivery.
    async fn send_update(
        &self,
        status: Status,
        reason: Option<String>,
        retry_id: &str,
        only_once: bool,
    ) -> Result<()> {
        let job = CancellationToken::new();
        {
            let mut state = self.lock();
            if let Some(previous) = state.job.take() {
                previous.cancel();
            }
            state.status = status;
            state.retry_id = retry_id.to_string();
            state.job = Some(job.clone());
        }

        let msg = CallbackMessage {
            status,
            error: reason.unwrap_or_default(),
            retry_id: retry_id.to_string(),
        };

        let first = self.callback.callback(&msg).await;
        match &first {
            Ok(()) => debug!(status = %status, "Heartbeat reported status"),
            Err(err) => warn!(status = %status, error = %err, "Heartbeat failed to report status"),
        }
        if first.is_ok() && only_once {
            return first;
        }

        tokio::spawn(resend_loop(
            Arc::clone(&self.callback),
            msg,
            self.config,
            only_once,
            job,
            self.cancel.clone(),
        ));

        first
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        // Interim reports are meaningless once nobody drives the task any more.
        let state = self.lock();
        if !state.status.is_final() {
            if let Some(job) = &state.job {
                job.cancel();
            }
        }
    }
}

async fn resend_loop(
    callback: Arc<dyn CallbackHandler>,
    msg: CallbackMessage,
    config: HeartbeatConfig,
    only_once: bool,
    job: CancellationToken,
    parent: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    let give_up = sleep(config.timeout);
    tokio::pin!(give_up);

    loop {
        tokio::select! {
            biased;
            // A final status is never followed by another report.
            () = parent.cancelled(), if !only_once => {
                info!(status = %msg.status, "Heartbeat context closed: reporting failed status");
                let closed = CallbackMessage {
                    status: Status::Failed,
                    error: CONTEXT_CLOSED.to_string(),
                    retry_id: msg.retry_id.clone(),
                };
                if let Err(err) = callback.callback(&closed).await {
                    warn!(error = %err, "Heartbeat failed to report closed context");
                }
                return;
            }
            () = job.cancelled() => {
                debug!(status = %msg.status, "Heartbeat stops sending status");
                return;
            }
            () = &mut give_up, if only_once => {
                error!(status = %msg.status, "Heartbeat gave up reporting final status");
                return;
            }
            _ = ticker.tick() => {
                match callback.callback(&msg).await {
                    Ok(()) if only_once => {
                        debug!(status = %msg.status, "Heartbeat reported final status after retry");
                        return;
                    }
                    Ok(()) => {}
                    Err(err) => {
                        warn!(
                            status = %msg.status,
                            error = %err,
                            "Heartbeat failed to report status, will retry"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::LocalCallbackHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording() -> (Arc<Mutex<Vec<CallbackMessage>>>, Arc<dyn CallbackHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = LocalCallbackHandler::new(move |msg| {
            sink.lock().unwrap().push(msg.clone());
            Ok(())
        });
        (seen, Arc::new(handler))
    }

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn config_defaults_and_validation() {
        let mut cfg = HeartbeatConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.interval, DEFAULT_INTERVAL);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);

        let mut invalid = HeartbeatConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        };
        assert!(invalid.validate().is_err());
    }

    #[tokio::test]
    async fn reports_transitions_in_order() {
        let (seen, handler) = recording();
        let sender = HeartbeatSender::new(handler, config(), CancellationToken::new()).unwrap();

        sender.running("r1").await.unwrap();
        sender.failed(&Error::Other("boom".to_string())).await.unwrap();
        sender.running("r2").await.unwrap();
        sender.success().await.unwrap();

        let seen = seen.lock().unwrap();
        let statuses: Vec<Status> = seen.iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![Status::Running, Status::Failed, Status::Running, Status::Success]
        );
        assert_eq!(seen[1].error, "boom");
        assert_eq!(seen[1].retry_id, "r1");
        assert_eq!(seen[3].retry_id, "r2");
    }

    #[tokio::test]
    async fn final_status_cannot_be_left() {
        let (_, handler) = recording();
        let sender = HeartbeatSender::new(handler, config(), CancellationToken::new()).unwrap();

        sender.success().await.unwrap();
        assert_eq!(sender.current_status(), Status::Success);
        assert!(matches!(
            sender.running("r").await,
            Err(Error::StatusTransition(_))
        ));
        assert!(sender.error(&Error::Other("x".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn closed_context_rejects_changes() {
        let (_, handler) = recording();
        let cancel = CancellationToken::new();
        let sender = HeartbeatSender::new(handler, config(), cancel.clone()).unwrap();

        cancel.cancel();
        let err = sender.running("r").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn final_delivery_failure_is_returned() {
        let handler: Arc<dyn CallbackHandler> = Arc::new(LocalCallbackHandler::new(|_| {
            Err(Error::Callback("mothership unavailable".to_string()))
        }));
        let sender = HeartbeatSender::new(handler, config(), CancellationToken::new()).unwrap();

        // Running swallows delivery errors, final statuses surface them.
        sender.running("r").await.unwrap();
        assert!(matches!(
            sender.error(&Error::Other("x".to_string())).await,
            Err(Error::Callback(_))
        ));
    }

    #[tokio::test]
    async fn closed_context_keeps_delivering_final_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let calls = AtomicUsize::new(0);
        let handler: Arc<dyn CallbackHandler> = Arc::new(LocalCallbackHandler::new(move |msg| {
            sink.lock().unwrap().push(msg.status);
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Callback("connection refused".to_string()))
            } else {
                Ok(())
            }
        }));
        let cfg = HeartbeatConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        };
        let cancel = CancellationToken::new();
        let sender = HeartbeatSender::new(handler, cfg, cancel.clone()).unwrap();

        assert!(sender.error(&Error::Other("x".to_string())).await.is_err());
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![Status::Error, Status::Error]);
    }

    #[tokio::test]
    async fn interim_status_is_resent_every_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Arc<dyn CallbackHandler> = Arc::new(LocalCallbackHandler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let cfg = HeartbeatConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        };
        let sender = HeartbeatSender::new(handler, cfg, CancellationToken::new()).unwrap();

        sender.running("r").await.unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;
        sender.success().await.unwrap();
        let after_success = calls.load(Ordering::SeqCst);
        assert!(after_success >= 3, "expected resends, got {after_success}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_success);
    }
}
