//! C7 — Monitor Core (SPEC_FULL.md §4.7). The lifecycle state machine,
//! event multiplexer, and retry/fallback-healing timers sit here; this is
//! the module a consumer actually talks to.

use std::sync::Arc;
use std::time::Instant;

use async_std::channel::{self, Receiver, Sender};
use async_std::sync::Mutex;
use async_std::task::{self, JoinHandle};
use serde_json::Value;

use crate::api;
use crate::classifier::{self, ClassifierConfig};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::health::{ConsulHeaders, Health};
use crate::instance_set::InstanceSet;
use crate::validator;
use crate::watcher::{MonitorErrorKind, WatchEvent, Watcher};

/// Lifecycle states (SPEC_FULL.md §4.7 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Starting,
    RunningHealthy,
    RunningUnhealthy,
    Retrying,
}

/// Consumer-visible events (SPEC_FULL.md §4.7 "ADDED — Rust shape").
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Initialized,
    Changed(InstanceSet),
    Error(MonitorErrorKind),
    Healthy,
    Unhealthy,
}

struct MonitorInner {
    client: api::Client,
    config: MonitorConfig,
    state: State,
    watcher: Option<Arc<Watcher>>,
    current_set: InstanceSet,
    consul_headers: ConsulHeaders,
    generation: u64,
    unhealthy_since: Option<Instant>,
    event_task: Option<JoinHandle<()>>,
    fallback_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    subscribers: Vec<Sender<MonitorEvent>>,
}

/// A cheap-to-clone handle to a running or stoppable service monitor. One
/// `Monitor` per (serviceName, registry-client) pair (SPEC_FULL.md §9
/// "Global state: none").
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Mutex<MonitorInner>>,
}

impl Monitor {
    pub fn new(client: api::Client, config: MonitorConfig) -> Self {
        Monitor {
            inner: Arc::new(Mutex::new(MonitorInner {
                client,
                config,
                state: State::Stopped,
                watcher: None,
                current_set: InstanceSet::new(),
                consul_headers: ConsulHeaders::default(),
                generation: 0,
                unhealthy_since: None,
                event_task: None,
                fallback_task: None,
                retry_task: None,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Adds a new subscriber and returns its receiver. May be called more
    /// than once; every subscriber receives every event from this point on.
    pub async fn subscribe(&self) -> Receiver<MonitorEvent> {
        let (sender, receiver) = channel::unbounded();
        self.inner.lock().await.subscribers.push(sender);
        receiver
    }

    pub async fn is_initialized(&self) -> bool {
        !matches!(self.inner.lock().await.state, State::Stopped)
    }

    pub async fn is_watch_healthy(&self) -> bool {
        matches!(self.inner.lock().await.state, State::RunningHealthy)
    }

    pub async fn get_instances(&self) -> InstanceSet {
        self.inner.lock().await.current_set.clone()
    }

    pub async fn get_consul_headers(&self) -> ConsulHeaders {
        self.inner.lock().await.consul_headers
    }

    pub async fn get_update_time(&self) -> Result<Option<Instant>, MonitorError> {
        let watcher = {
            let guard = self.inner.lock().await;
            match &guard.watcher {
                Some(w) => w.clone(),
                None => return Err(MonitorError::NotInitialized),
            }
        };
        Ok(watcher.update_time().await)
    }

    /// Starts the watcher, returning the initial snapshot. Fails with
    /// `AlreadyInitialized` if already running; fails with `Watch` if the
    /// initial long-poll itself fails (the monitor stays `Stopped`).
    pub async fn start_service(&self) -> Result<InstanceSet, MonitorError> {
        let (client, config, generation) = {
            let mut guard = self.inner.lock().await;
            if guard.state != State::Stopped {
                return Err(MonitorError::AlreadyInitialized);
            }
            guard.state = State::Starting;
            (guard.client.clone(), guard.config.clone(), guard.generation)
        };

        log::info!("monitor for {} transitioning Stopped -> Starting", config.service_name);

        let health = Health::new(client.clone());
        let watcher = Watcher::new(health, config.service_name.clone(), config.timeout(), config.wait());

        let started = watcher.start().await;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            // stop_service raced us; respect it and stay Stopped. The watcher
            // may already have started its background poll-loop task
            // (SPEC_FULL.md §5 "Cancellation": stopService is the sole
            // cancellation primitive, so we must tear it down here rather
            // than just dropping the local handle).
            drop(guard);
            watcher.stop().await;
            return Err(MonitorError::watch(
                config.service_name.clone(),
                "monitor was stopped during startup",
            ));
        }

        let raw_entries = match started {
            Ok(entries) => entries,
            Err(err) => {
                log::error!("initial snapshot for {} failed: {err}", config.service_name);
                guard.state = State::Stopped;
                return Err(err);
            }
        };

        let (set, errors) = classify_payload(&raw_entries, &guard.config);
        guard.current_set = set.clone();
        guard.consul_headers = watcher.consul_headers().await;
        guard.state = State::RunningHealthy;
        let watcher = Arc::new(watcher);
        guard.watcher = Some(watcher.clone());

        let forwarder = task::spawn(Self::run_event_forwarder(self.clone(), watcher, generation));
        guard.event_task = Some(forwarder);

        let subscribers = guard.subscribers.clone();
        drop(guard);

        log::info!("monitor for {} transitioning Starting -> Running-Healthy", config.service_name);

        // Delivered on a later tick (suspension point (d), SPEC_FULL.md §5):
        // `changed` must precede the per-node errors from this same payload.
        task::spawn(async move {
            broadcast(&subscribers, MonitorEvent::Initialized).await;
            broadcast(&subscribers, MonitorEvent::Changed(set)).await;
            for error in errors {
                log::warn!("{error}");
                broadcast(&subscribers, MonitorEvent::Error(MonitorErrorKind::from(error))).await;
            }
        });

        Ok(self.get_instances().await)
    }

    /// Idempotent teardown (SPEC_FULL.md §4.7 "stopService"). Cancels the
    /// watcher, both timers, and bumps the generation counter so any
    /// in-flight retry notices it has been superseded.
    pub async fn stop_service(&self) {
        let mut guard = self.inner.lock().await;
        guard.generation = guard.generation.wrapping_add(1);

        let watcher = guard.watcher.take();
        let event_task = guard.event_task.take();
        let fallback_task = guard.fallback_task.take();
        let retry_task = guard.retry_task.take();
        guard.state = State::Stopped;
        guard.unhealthy_since = None;
        drop(guard);

        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        if let Some(handle) = event_task {
            handle.cancel().await;
        }
        if let Some(handle) = fallback_task {
            handle.cancel().await;
        }
        if let Some(handle) = retry_task {
            handle.cancel().await;
        }
    }

    /// Forwards `WatchEvent`s from one watcher instance into this monitor's
    /// state machine and subscriber set, until the watcher ends or the
    /// monitor's generation moves past `generation` (SPEC_FULL.md §5
    /// "Cancellation").
    async fn run_event_forwarder(monitor: Monitor, watcher: Arc<Watcher>, generation: u64) {
        let receiver = watcher.subscribe();
        while let Ok(event) = receiver.recv().await {
            let mut guard = monitor.inner.lock().await;
            if guard.generation != generation {
                return;
            }

            match event {
                WatchEvent::Changed(raw_entries) => {
                    let (set, errors) = classify_payload(&raw_entries, &guard.config);
                    guard.current_set = set.clone();
                    guard.consul_headers = watcher.consul_headers().await;
                    let became_healthy = guard.state != State::RunningHealthy;
                    guard.state = State::RunningHealthy;
                    guard.unhealthy_since = None;
                    let subscribers = guard.subscribers.clone();
                    drop(guard);

                    if became_healthy {
                        log::info!("monitor for {} is healthy again", watcher.service_name());
                        broadcast(&subscribers, MonitorEvent::Healthy).await;
                    }
                    broadcast(&subscribers, MonitorEvent::Changed(set)).await;
                    for error in errors {
                        log::warn!("{error}");
                        broadcast(&subscribers, MonitorEvent::Error(MonitorErrorKind::from(error))).await;
                    }
                }
                WatchEvent::Error(kind) => {
                    let was_healthy = guard.state == State::RunningHealthy;
                    guard.state = State::RunningUnhealthy;
                    if was_healthy {
                        guard.unhealthy_since = Some(Instant::now());
                    }
                    let needs_fallback = guard.fallback_task.is_none();
                    let subscribers = guard.subscribers.clone();
                    let fallback_handle = if needs_fallback {
                        Some(task::spawn(Self::run_fallback_healer(
                            monitor.clone(),
                            watcher.clone(),
                            generation,
                        )))
                    } else {
                        None
                    };
                    if let Some(handle) = fallback_handle {
                        guard.fallback_task = Some(handle);
                    }
                    drop(guard);

                    if was_healthy {
                        log::error!("monitor transitioned to Running-Unhealthy: {kind}");
                        broadcast(&subscribers, MonitorEvent::Unhealthy).await;
                    }
                    broadcast(&subscribers, MonitorEvent::Error(kind)).await;
                }
                WatchEvent::End => {
                    let was_healthy = guard.state == State::RunningHealthy;
                    guard.state = State::Retrying;
                    let needs_retry = guard.retry_task.is_none();
                    let subscribers = guard.subscribers.clone();
                    let retry_handle = if needs_retry {
                        Some(task::spawn(Self::run_retry_loop(monitor.clone(), generation)))
                    } else {
                        None
                    };
                    if let Some(handle) = retry_handle {
                        guard.retry_task = Some(handle);
                    }
                    drop(guard);

                    log::info!("watcher ended, monitor transitioning to Retrying");
                    if was_healthy {
                        broadcast(&subscribers, MonitorEvent::Unhealthy).await;
                    }
                    return;
                }
            }
        }
    }

    /// Periodically samples `watcher.update_time()`; once it advances past
    /// the timestamp captured when the monitor went unhealthy, promotes
    /// the monitor back to healthy even without a fresh `Changed` event
    /// (SPEC_FULL.md §4.7 "Fallback healing").
    async fn run_fallback_healer(monitor: Monitor, watcher: Arc<Watcher>, generation: u64) {
        loop {
            task::sleep(monitor_fallback_interval(&monitor).await).await;

            let mut guard = monitor.inner.lock().await;
            if guard.generation != generation || guard.state != State::RunningUnhealthy {
                guard.fallback_task = None;
                return;
            }
            let baseline = guard.unhealthy_since;
            drop(guard);

            let latest = watcher.update_time().await;
            let advanced = match (baseline, latest) {
                (Some(baseline), Some(latest)) => latest > baseline,
                (None, Some(_)) => true,
                _ => false,
            };

            if advanced {
                let mut guard = monitor.inner.lock().await;
                if guard.generation != generation {
                    return;
                }
                guard.state = State::RunningHealthy;
                guard.unhealthy_since = None;
                guard.fallback_task = None;
                let subscribers = guard.subscribers.clone();
                drop(guard);
                log::info!("fallback healer observed progress, monitor is healthy again");
                broadcast(&subscribers, MonitorEvent::Healthy).await;
                return;
            }
        }
    }

    /// Retries `start_service`'s inner sequence on a constant back-off
    /// until it succeeds or the monitor is stopped (generation changes).
    async fn run_retry_loop(monitor: Monitor, generation: u64) {
        loop {
            let delay = {
                let guard = monitor.inner.lock().await;
                if guard.generation != generation {
                    return;
                }
                guard.config.retry_delay()
            };
            task::sleep(delay).await;

            let (client, config) = {
                let guard = monitor.inner.lock().await;
                if guard.generation != generation {
                    return;
                }
                (guard.client.clone(), guard.config.clone())
            };

            let health = Health::new(client);
            let watcher = Watcher::new(health, config.service_name.clone(), config.timeout(), config.wait());
            let attempt = watcher.start().await;

            let mut guard = monitor.inner.lock().await;
            if guard.generation != generation {
                // stop_service raced this retry attempt. If it succeeded,
                // the watcher's background poll-loop task is already
                // running and holds no other handle anywhere else — it
                // must be stopped explicitly, same as in `start_service`.
                drop(guard);
                watcher.stop().await;
                return;
            }

            match attempt {
                Ok(raw_entries) => {
                    let (set, errors) = classify_payload(&raw_entries, &guard.config);
                    guard.current_set = set.clone();
                    guard.consul_headers = watcher.consul_headers().await;
                    guard.state = State::RunningHealthy;
                    guard.unhealthy_since = None;
                    guard.retry_task = None;
                    let watcher = Arc::new(watcher);
                    guard.watcher = Some(watcher.clone());
                    let forwarder = task::spawn(Self::run_event_forwarder(
                        monitor.clone(),
                        watcher,
                        generation,
                    ));
                    guard.event_task = Some(forwarder);
                    let subscribers = guard.subscribers.clone();
                    drop(guard);

                    log::info!("retry succeeded, monitor transitioning to Running-Healthy");
                    broadcast(&subscribers, MonitorEvent::Healthy).await;
                    broadcast(&subscribers, MonitorEvent::Changed(set)).await;
                    for error in errors {
                        broadcast(&subscribers, MonitorEvent::Error(MonitorErrorKind::from(error))).await;
                    }
                    return;
                }
                Err(err) => {
                    log::error!("retry attempt for {} failed: {err}", guard.config.service_name);
                    let subscribers = guard.subscribers.clone();
                    drop(guard);
                    broadcast(&subscribers, MonitorEvent::Error(MonitorErrorKind::from(err))).await;
                    // loop again after another retry_delay
                }
            }
        }
    }
}

async fn monitor_fallback_interval(monitor: &Monitor) -> std::time::Duration {
    monitor.inner.lock().await.config.fallback_interval()
}

fn classify_payload(raw_entries: &[Value], config: &MonitorConfig) -> (InstanceSet, Vec<MonitorError>) {
    let validated = validator::validate_response(&Value::Array(raw_entries.to_vec()));
    let mut set = InstanceSet::new();
    let mut errors = validated.errors;

    let classifier_config = ClassifierConfig {
        status_check_name: &config.status_check_name,
        extractors: &config.extractors,
        strict_status_consistency: config.strict_status_consistency,
    };

    for node in &validated.valid_nodes {
        let outcome = classifier::classify(node, &classifier_config);
        errors.extend(outcome.errors);
        if let Some((bucket, instance)) = outcome.assignment {
            set.add(bucket, instance);
        }
    }

    (set, errors)
}

async fn broadcast(subscribers: &[Sender<MonitorEvent>], event: MonitorEvent) {
    for subscriber in subscribers {
        let _ = subscriber.send(event.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    fn test_config() -> MonitorConfig {
        MonitorConfig::new("web", "app:status")
    }

    #[test]
    fn new_monitor_is_stopped_and_uninitialized() {
        let client = api::Client::new(api::Config::default());
        let monitor = Monitor::new(client, test_config());
        async_std::task::block_on(async {
            assert!(!monitor.is_initialized().await);
            assert!(!monitor.is_watch_healthy().await);
            assert_eq!(monitor.get_consul_headers().await, ConsulHeaders::default());
            assert!(monitor.get_instances().await.is_empty());
        });
    }

    #[test]
    fn get_update_time_before_start_is_not_initialized() {
        let client = api::Client::new(api::Config::default());
        let monitor = Monitor::new(client, test_config());
        async_std::task::block_on(async {
            let result = monitor.get_update_time().await;
            assert!(matches!(result, Err(MonitorError::NotInitialized)));
        });
    }

    #[test]
    fn stop_before_start_is_a_safe_no_op() {
        let client = api::Client::new(api::Config::default());
        let monitor = Monitor::new(client, test_config());
        async_std::task::block_on(async {
            monitor.stop_service().await;
            monitor.stop_service().await;
            assert!(!monitor.is_initialized().await);
        });
    }

    const VALID_NODE_PAYLOAD: &str = r#"[{"Node":{"Node":"node-1","Address":"10.0.0.1","Datacenter":"dc1","TaggedAddresses":{"lan":"10.0.0.1","wan":"203.0.113.1"}},"Service":{"ID":"svc-1","Address":"","Port":8080,"Tags":[]},"Checks":[{"CheckID":"serfHealth","Name":"Serf Health Status","Status":"passing","Output":""}]}]"#;

    async fn serve_one(stream: &mut async_std::net::TcpStream, status: &str, body: &str) {
        use async_std::io::{ReadExt, WriteExt};
        let mut buffer = [0_u8; 1024];
        let _ = stream.read(&mut buffer).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
    }

    /// Spawns an in-process mock Consul endpoint (grounded on the
    /// `TcpListener` fixture in `doctor_test.rs`, extended to a loop since a
    /// watcher issues more than one request over its lifetime) that hands
    /// out `responses` in order, then repeats them for any connection the
    /// background poll loop opens afterwards.
    async fn spawn_mock_registry(responses: Vec<(&'static str, &'static str)>) -> String {
        let listener = async_std::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock registry listener");
        let addr = listener.local_addr().expect("mock registry local_addr");
        task::spawn(async move {
            let mut cycle = responses.into_iter().cycle();
            loop {
                let (status, body) = match cycle.next() {
                    Some(entry) => entry,
                    None => return,
                };
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                serve_one(&mut stream, status, body).await;
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn start_service_rejects_when_initial_query_fails() {
        async_std::task::block_on(async {
            let address = spawn_mock_registry(vec![("500 Internal Server Error", "")]).await;
            let client = api::Client::new(api::Config {
                Address: address,
                ..Default::default()
            });
            let mut config = test_config();
            config.wait_secs = 1;
            config.timeout_msec = 500;
            let monitor = Monitor::new(client, config);

            let result = monitor.start_service().await;
            assert!(matches!(result, Err(MonitorError::Watch { .. })));
            assert!(!monitor.is_initialized().await);

            let events = monitor.subscribe().await;
            assert!(events.try_recv().is_err());
        });
    }

    #[test]
    fn stop_then_restart_succeeds_with_a_fresh_snapshot() {
        async_std::task::block_on(async {
            let address = spawn_mock_registry(vec![
                ("200 OK", VALID_NODE_PAYLOAD),
                ("200 OK", VALID_NODE_PAYLOAD),
            ])
            .await;
            let client = api::Client::new(api::Config {
                Address: address,
                ..Default::default()
            });
            let mut config = test_config();
            config.wait_secs = 1;
            config.timeout_msec = 500;
            let monitor = Monitor::new(client, config);

            monitor.start_service().await.expect("first start_service");
            assert!(monitor.is_initialized().await);

            monitor.stop_service().await;
            assert!(!monitor.is_initialized().await);

            let second = monitor
                .start_service()
                .await
                .expect("start_service after stop_service should succeed again");
            assert!(monitor.is_initialized().await);
            assert_eq!(second.total_len(), 1);
        });
    }
}
