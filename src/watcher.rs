//! C6 — Watcher Driver (SPEC_FULL.md §4.6).
//!
//! Wraps the registry's blocking long-poll. `start()` performs the first
//! query inline and rejects on the first transport/HTTP error; on success
//! it spawns one background task that keeps polling and publishing
//! [`WatchEvent`]s until [`Watcher::stop`] cancels it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_std::channel::{self, Receiver, Sender};
use async_std::sync::Mutex;
use async_std::task::{self, JoinHandle};
use serde_json::Value;

use crate::error::MonitorError;
use crate::health::{ConsulHeaders, Health};

/// An event emitted after `start()` succeeds (SPEC_FULL.md §4.6).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A fresh payload was validated into node records (not yet classified).
    Changed(Vec<Value>),
    /// A transport or HTTP error occurred on a subsequent poll.
    Error(MonitorErrorKind),
    /// The polling loop stopped on its own (it never does on success; this
    /// fires only if the background task's own retry budget is exhausted,
    /// which this driver does not impose — `stop()` is the only teardown
    /// path in practice, but the variant exists for the state machine in
    /// SPEC_FULL.md §4.7 to drive *Retrying*).
    End,
}

/// Cloneable wrapper so `WatchEvent` can derive `Clone` without requiring
/// `MonitorError` (which wraps non-`Clone` error internals via thiserror)
/// to implement `Clone` itself.
#[derive(Debug, Clone)]
pub struct MonitorErrorKind(pub std::sync::Arc<MonitorError>);

impl From<MonitorError> for MonitorErrorKind {
    fn from(err: MonitorError) -> Self {
        MonitorErrorKind(std::sync::Arc::new(err))
    }
}

impl std::fmt::Display for MonitorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SharedState {
    last_headers: ConsulHeaders,
    last_update: Option<Instant>,
    index: u64,
}

/// Drives one service's blocking long-poll loop.
pub struct Watcher {
    health: Health,
    service_name: String,
    request_timeout: Duration,
    long_poll_wait: Duration,
    shared: std::sync::Arc<Mutex<SharedState>>,
    sender: Sender<WatchEvent>,
    receiver: Receiver<WatchEvent>,
    running: std::sync::Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    pub fn new(
        health: Health,
        service_name: impl Into<String>,
        request_timeout: Duration,
        long_poll_wait: Duration,
    ) -> Self {
        let (sender, receiver) = channel::unbounded();
        Watcher {
            health,
            service_name: service_name.into(),
            request_timeout,
            long_poll_wait,
            shared: std::sync::Arc::new(Mutex::new(SharedState {
                last_headers: ConsulHeaders::default(),
                last_update: None,
                index: 0,
            })),
            sender,
            receiver,
            running: std::sync::Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Performs the first blocking query inline; on success, spawns the
    /// background polling task and returns the validated nodes of the
    /// initial payload (classification is the caller's, in `monitor.rs`).
    pub async fn start(&self) -> Result<Vec<Value>, MonitorError> {
        let (body, headers) = self
            .health
            .service_blocking(&self.service_name, 0, self.long_poll_wait, self.request_timeout)
            .await?;

        {
            let mut shared = self.shared.lock().await;
            shared.last_headers = headers;
            shared.last_update = Some(Instant::now());
            shared.index = headers.index;
        }

        let entries = body.as_array().cloned().unwrap_or_default();

        self.running.store(true, Ordering::SeqCst);
        self.spawn_poll_loop().await;

        Ok(entries)
    }

    async fn spawn_poll_loop(&self) {
        let health = self.health.clone();
        let service_name = self.service_name.clone();
        let request_timeout = self.request_timeout;
        let long_poll_wait = self.long_poll_wait;
        let shared = self.shared.clone();
        let sender = self.sender.clone();
        let running = self.running.clone();

        let handle = task::spawn(async move {
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let index = shared.lock().await.index;
                let result = health
                    .service_blocking(&service_name, index, long_poll_wait, request_timeout)
                    .await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match result {
                    Ok((body, headers)) => {
                        {
                            let mut guard = shared.lock().await;
                            guard.last_headers = headers;
                            guard.last_update = Some(Instant::now());
                            guard.index = headers.index;
                        }
                        let entries = body.as_array().cloned().unwrap_or_default();
                        log::debug!("watcher for {} received a fresh payload", service_name);
                        if sender.send(WatchEvent::Changed(entries)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::error!("watcher for {} failed: {err}", service_name);
                        if sender
                            .send(WatchEvent::Error(MonitorErrorKind::from(err)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            let _ = sender.send(WatchEvent::End).await;
        });

        *self.task.lock().await = Some(handle);
    }

    /// Subscribes to this watcher's events. Only meaningful after `start()`
    /// has succeeded.
    pub fn subscribe(&self) -> Receiver<WatchEvent> {
        self.receiver.clone()
    }

    pub async fn update_time(&self) -> Option<Instant> {
        self.shared.lock().await.last_update
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn consul_headers(&self) -> ConsulHeaders {
        self.shared.lock().await.last_headers
    }

    /// Idempotent teardown: cancels the background task if one is running.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().await.take() {
            handle.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_error_kind_displays_inner_error() {
        let err = MonitorError::watch("svc", "boom");
        let kind = MonitorErrorKind::from(err);
        assert!(kind.to_string().contains("boom"));
    }
}
