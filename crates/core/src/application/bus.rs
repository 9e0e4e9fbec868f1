// JobBus - event distribution
//
// Fans a published event out to in-process subscribers, every connected
// duplex channel, and (for status-class events) a debounced durable
// fallback record. Delivery is best-effort, at-most-once per channel per
// publish; a reconnecting observer recovers current state via replay of the
// latest status event, not an event log.

use crate::application::store::JobStore;
use crate::domain::JobEvent;
use crate::port::{EventChannel, TimeProvider};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bus tuning knobs
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Delivery attempts per channel per publish
    pub send_retry_max: u32,
    /// Linear backoff base between delivery attempts
    pub send_retry_backoff: Duration,
    /// Heartbeat ping period; channels silent for 3x this are dropped
    pub heartbeat_interval: Duration,
    /// In-memory recent-event queue size (debugging introspection)
    pub recent_cap: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            send_retry_max: 3,
            send_retry_backoff: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(30),
            recent_cap: 100,
        }
    }
}

struct ChannelEntry {
    channel: Arc<dyn EventChannel>,
    connected_at: i64,
    last_seen: i64,
    message_count: u64,
}

/// Introspection view of one connected channel
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub connected_at: i64,
    pub last_seen: i64,
    pub message_count: u64,
}

type Subscriber = Box<dyn Fn(&JobEvent) + Send + Sync>;

/// Event distribution layer
pub struct JobBus {
    config: BusConfig,
    store: Arc<JobStore>,
    time: Arc<dyn TimeProvider>,
    channels: Mutex<HashMap<String, ChannelEntry>>,
    subscribers: Mutex<Vec<(String, Subscriber)>>,
    last_status: Mutex<Option<JobEvent>>,
    recent: Mutex<VecDeque<JobEvent>>,
}

impl JobBus {
    pub fn new(store: Arc<JobStore>, time: Arc<dyn TimeProvider>, config: BusConfig) -> Self {
        Self {
            config,
            store,
            time,
            channels: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            last_status: Mutex::new(None),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Seed the replay cache from the durable fallback record, so observers
    /// connecting right after a restart still see the last known state
    pub async fn hydrate(&self) {
        if self.lock_last_status().is_some() {
            return;
        }
        match self.store.load_last_event().await {
            Ok(Some(event)) => {
                *self.lock_mut_last_status() = Some(event);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not hydrate last event from storage"),
        }
    }

    /// Track a channel; an existing channel of the same name is replaced
    /// (last writer wins per name). The new channel immediately receives a
    /// connected acknowledgment and one replay of the latest status event.
    pub async fn register_channel(&self, channel: Arc<dyn EventChannel>) {
        let name = channel.name().to_string();
        let now = self.time.now_millis();
        let replaced = {
            let mut channels = self.lock_channels();
            channels
                .insert(
                    name.clone(),
                    ChannelEntry {
                        channel: Arc::clone(&channel),
                        connected_at: now,
                        last_seen: now,
                        message_count: 0,
                    },
                )
                .is_some()
        };
        if replaced {
            debug!(port = %name, "Replacing existing channel of same name");
        }
        info!(port = %name, "Channel connected");

        let ack = JobEvent::Connected {
            port_name: name.clone(),
        };
        if let Err(e) = channel.send(&ack).await {
            warn!(port = %name, error = %e, "Connected ack delivery failed");
        }

        let replay = self.lock_last_status();
        if let Some(event) = replay {
            if let Err(e) = channel.send(&event).await {
                warn!(port = %name, error = %e, "Status replay delivery failed");
            }
        }
    }

    /// Explicit channel removal; no further delivery is attempted
    pub async fn disconnect(&self, name: &str) -> bool {
        let removed = self.lock_channels().remove(name).is_some();
        if removed {
            info!(port = %name, "Channel disconnected");
            self.publish(JobEvent::Disconnected {
                port_name: name.to_string(),
            })
            .await;
        }
        removed
    }

    /// Record activity from a channel acting as a command source
    pub fn note_seen(&self, name: &str) {
        let now = self.time.now_millis();
        if let Some(entry) = self.lock_channels().get_mut(name) {
            entry.last_seen = now;
            entry.message_count += 1;
        }
    }

    /// Register an in-process subscriber by name (last writer wins)
    pub fn subscribe(&self, name: impl Into<String>, f: impl Fn(&JobEvent) + Send + Sync + 'static) {
        let name = name.into();
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|(n, _)| *n != name);
        subscribers.push((name, Box::new(f)));
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(n, _)| n != name);
        subscribers.len() != before
    }

    /// Fan one event out to all transports
    pub async fn publish(&self, event: JobEvent) {
        if event.is_status_class() {
            *self.lock_mut_last_status() = Some(event.clone());
            self.store.save_last_event(&event);
        }

        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.push_back(event.clone());
            while recent.len() > self.config.recent_cap {
                recent.pop_front();
            }
        }

        // A panicking subscriber must not prevent the others from running
        {
            let subscribers = self.lock_subscribers();
            for (name, subscriber) in subscribers.iter() {
                if catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                    warn!(subscriber = %name, "Subscriber panicked, continuing fan-out");
                }
            }
        }

        let targets: Vec<(String, Arc<dyn EventChannel>)> = self
            .lock_channels()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.channel)))
            .collect();

        for (name, channel) in targets {
            if self.deliver_with_retry(&name, channel.as_ref(), &event).await {
                let now = self.time.now_millis();
                if let Some(entry) = self.lock_channels().get_mut(&name) {
                    entry.last_seen = now;
                    entry.message_count += 1;
                }
            }
        }
    }

    /// Bounded retry with linear backoff; failures are logged and swallowed
    async fn deliver_with_retry(
        &self,
        name: &str,
        channel: &dyn EventChannel,
        event: &JobEvent,
    ) -> bool {
        for attempt in 1..=self.config.send_retry_max {
            match channel.send(event).await {
                Ok(()) => return true,
                Err(e) => {
                    if attempt < self.config.send_retry_max {
                        debug!(
                            port = %name,
                            attempt = attempt,
                            error = %e,
                            "Delivery failed, retrying"
                        );
                        tokio::time::sleep(self.config.send_retry_backoff * attempt).await;
                    } else {
                        warn!(
                            port = %name,
                            attempts = attempt,
                            error = %e,
                            "Delivery abandoned"
                        );
                    }
                }
            }
        }
        false
    }

    /// Ping every connected channel; forcibly drop any channel silent for
    /// more than three heartbeat intervals
    pub async fn heartbeat(&self) {
        let targets: Vec<(String, Arc<dyn EventChannel>)> = self
            .lock_channels()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.channel)))
            .collect();

        for (name, channel) in targets {
            match channel.ping().await {
                Ok(()) => {
                    let now = self.time.now_millis();
                    if let Some(entry) = self.lock_channels().get_mut(&name) {
                        entry.last_seen = now;
                    }
                }
                Err(e) => debug!(port = %name, error = %e, "Heartbeat ping failed"),
            }
        }

        let cutoff =
            self.time.now_millis() - 3 * self.config.heartbeat_interval.as_millis() as i64;
        let stale: Vec<String> = self
            .lock_channels()
            .iter()
            .filter(|(_, entry)| entry.last_seen < cutoff)
            .map(|(name, _)| name.clone())
            .collect();

        for name in stale {
            warn!(port = %name, "Channel silent past heartbeat deadline, dropping");
            self.lock_channels().remove(&name);
            self.publish(JobEvent::Disconnected { port_name: name }).await;
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    /// The cached status event a new channel would receive as replay
    pub fn last_status(&self) -> Option<JobEvent> {
        self.lock_last_status()
    }

    /// Bounded queue of recently published events
    pub fn recent_events(&self) -> Vec<JobEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.lock_channels()
            .iter()
            .map(|(name, entry)| ChannelInfo {
                name: name.clone(),
                connected_at: entry.connected_at,
                last_seen: entry.last_seen,
                message_count: entry.message_count,
            })
            .collect()
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelEntry>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(String, Subscriber)>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_last_status(&self) -> Option<JobEvent> {
        self.last_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_mut_last_status(&self) -> std::sync::MutexGuard<'_, Option<JobEvent>> {
        self.last_status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::store::{keys, StoreConfig};
    use crate::domain::{JobSnapshot, JobStatus, QueueMeta};
    use crate::port::channel::mocks::RecordingChannel;
    use crate::port::durable_store::mocks::MemoryStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> JobSnapshot {
        JobSnapshot::new(
            "j-1",
            "library_maintenance",
            1000,
            vec!["collect".to_string()],
            BTreeMap::from([("collect".to_string(), 100)]),
            QueueMeta::default(),
        )
        .unwrap()
    }

    fn status_event() -> JobEvent {
        let mut job = snapshot();
        job.status = JobStatus::Running;
        JobEvent::Status { job }
    }

    struct Fixture {
        mem: Arc<MemoryStore>,
        time: Arc<FixedTimeProvider>,
        bus: Arc<JobBus>,
    }

    fn fixture() -> Fixture {
        let mem = Arc::new(MemoryStore::new());
        let time = Arc::new(FixedTimeProvider::new(1_000_000));
        let store = Arc::new(JobStore::new(
            mem.clone(),
            time.clone(),
            StoreConfig::default(),
        ));
        let bus = Arc::new(JobBus::new(store, time.clone(), BusConfig::default()));
        Fixture { mem, time, bus }
    }

    #[tokio::test(start_paused = true)]
    async fn new_channel_gets_ack_then_exactly_one_replay() {
        let f = fixture();
        f.bus.publish(status_event()).await;

        let channel = Arc::new(RecordingChannel::new("popup"));
        f.bus.register_channel(channel.clone()).await;

        assert_eq!(channel.sent_kinds(), vec!["jobConnected", "jobStatus"]);

        // Reconnect under the same name: one fresh replay, nothing more
        let reconnected = Arc::new(RecordingChannel::new("popup"));
        f.bus.register_channel(reconnected.clone()).await;
        assert_eq!(reconnected.sent_kinds(), vec!["jobConnected", "jobStatus"]);
        assert_eq!(f.bus.channels().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_without_prior_status_gets_only_ack() {
        let f = fixture();
        let channel = Arc::new(RecordingChannel::new("options"));
        f.bus.register_channel(channel.clone()).await;
        assert_eq!(channel.sent_kinds(), vec!["jobConnected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_send_failure_is_retried() {
        let f = fixture();
        let channel = Arc::new(RecordingChannel::new("popup"));
        f.bus.register_channel(channel.clone()).await;

        channel.fail_next_sends(2);
        f.bus.publish(status_event()).await;

        let kinds = channel.sent_kinds();
        assert_eq!(*kinds.last().unwrap(), "jobStatus");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_swallowed() {
        let f = fixture();
        let channel = Arc::new(RecordingChannel::new("popup"));
        f.bus.register_channel(channel.clone()).await;

        channel.fail_next_sends(10);
        f.bus.publish(status_event()).await;

        // No jobStatus made it through, and the bus did not panic
        assert_eq!(channel.sent_kinds(), vec!["jobConnected"]);
        assert!(f.bus.last_status().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_subscriber_does_not_stop_fanout() {
        let f = fixture();
        let seen = Arc::new(AtomicUsize::new(0));

        f.bus.subscribe("bad", |_| panic!("subscriber bug"));
        let seen_clone = seen.clone();
        f.bus.subscribe("good", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        f.bus.publish(status_event()).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_event_reaches_durable_fallback_after_debounce() {
        let f = fixture();
        f.bus.publish(status_event()).await;
        assert!(f.mem.peek(keys::LAST_EVENT).is_none());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let stored = f.mem.peek(keys::LAST_EVENT).unwrap();
        assert_eq!(stored["type"], "jobStatus");
    }

    #[tokio::test(start_paused = true)]
    async fn activity_events_do_not_touch_fallback() {
        let f = fixture();
        f.bus
            .publish(JobEvent::Connected {
                port_name: "x".to_string(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(f.mem.peek(keys::LAST_EVENT).is_none());
        assert!(f.bus.last_status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_drops_silent_channels() {
        let f = fixture();
        let healthy = Arc::new(RecordingChannel::new("healthy"));
        let silent = Arc::new(RecordingChannel::new("silent"));
        f.bus.register_channel(healthy.clone()).await;
        f.bus.register_channel(silent.clone()).await;

        silent.fail_pings(true);

        // Three missed heartbeats plus margin
        f.time.advance(3 * 30_000 + 1);
        f.bus.heartbeat().await;

        let names: Vec<String> = f.bus.channels().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["healthy".to_string()]);

        // Disconnect announcement reached the survivor
        assert!(healthy
            .sent_kinds()
            .contains(&"jobDisconnected"));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_disconnect_stops_delivery() {
        let f = fixture();
        let channel = Arc::new(RecordingChannel::new("popup"));
        f.bus.register_channel(channel.clone()).await;

        assert!(f.bus.disconnect("popup").await);
        assert!(!f.bus.disconnect("popup").await);

        f.bus.publish(status_event()).await;
        assert_eq!(channel.sent_kinds(), vec!["jobConnected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn recent_queue_is_bounded() {
        let f = fixture();
        for _ in 0..150 {
            f.bus.publish(status_event()).await;
        }
        assert_eq!(f.bus.recent_events().len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn hydrate_restores_replay_after_restart() {
        let mem = Arc::new(MemoryStore::new());
        let time = Arc::new(FixedTimeProvider::new(1_000_000));
        let store = Arc::new(JobStore::new(
            mem.clone(),
            time.clone(),
            StoreConfig::default(),
        ));
        store.save_last_event(&status_event());
        tokio::time::sleep(Duration::from_millis(400)).await;

        let bus = JobBus::new(store, time, BusConfig::default());
        assert!(bus.last_status().is_none());
        bus.hydrate().await;
        assert!(bus.last_status().is_some());
    }
}
