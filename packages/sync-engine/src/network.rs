//! Connectivity state machine with hysteresis, per spec §4.2.
//!
//! State is held behind [`arc_swap::ArcSwap`] for lock-free reads and
//! broadcast through a [`tokio::sync::watch`] channel -- the same
//! lock-free-state-plus-watch-channel combination the teacher's shutdown
//! controller uses, adapted here for a three-state machine instead of a
//! boolean.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Connectivity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkState {
    Online,
    Slow,
    Offline,
}

/// A link-quality reading, used to distinguish `online` from `slow`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkQuality {
    pub rtt_ms: Option<u64>,
    pub downlink_mbps: Option<f64>,
}

/// Abstraction over the runtime's connectivity indicator, so tests can
/// drive the sensor without real network hardware.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// The runtime's authoritative online/offline signal.
    fn is_online(&self) -> bool;

    /// A link-quality sample, if the runtime exposes one.
    fn link_quality(&self) -> Option<LinkQuality> {
        None
    }
}

fn classify_quality(quality: Option<LinkQuality>) -> NetworkState {
    match quality {
        Some(LinkQuality { rtt_ms: Some(rtt), .. }) if rtt >= 500 => NetworkState::Slow,
        Some(LinkQuality { downlink_mbps: Some(d), .. }) if d < 0.5 => NetworkState::Slow,
        _ => NetworkState::Online,
    }
}

struct Pending {
    online_since: Option<u64>,
}

/// Debounced connectivity state machine.
///
/// `observe_signal` is the sole input: callers feed it the runtime's
/// connectivity events (or, in tests, synthetic ones) along with the wall
/// clock time of the observation, and the sensor derives transitions.
pub struct NetworkSensor {
    state: Arc<ArcSwap<NetworkState>>,
    tx: watch::Sender<NetworkState>,
    pending: Mutex<Pending>,
    debounce_ms: u64,
    http: reqwest::Client,
}

impl NetworkSensor {
    #[must_use]
    pub fn new(initial_online: bool, debounce_ms: u64) -> Self {
        let initial = if initial_online { NetworkState::Online } else { NetworkState::Offline };
        let (tx, _rx) = watch::channel(initial);
        Self {
            state: Arc::new(ArcSwap::from_pointee(initial)),
            tx,
            pending: Mutex::new(Pending { online_since: None }),
            debounce_ms,
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn current_state(&self) -> NetworkState {
        **self.state.load()
    }

    /// Current state delivered synchronously, then every transition as it happens.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    fn set_state(&self, new_state: NetworkState) {
        if self.current_state() != new_state {
            self.state.store(Arc::new(new_state));
            let _ = self.tx.send(new_state);
        }
    }

    /// Feeds one connectivity observation into the state machine.
    pub fn observe_signal(&self, online: bool, quality: Option<LinkQuality>, now_ms: u64) {
        let mut pending = self.pending.lock();

        if !online {
            pending.online_since = None;
            drop(pending);
            self.set_state(NetworkState::Offline);
            return;
        }

        let classified = classify_quality(quality);

        if self.current_state() == NetworkState::Offline {
            match pending.online_since {
                None => pending.online_since = Some(now_ms),
                Some(since) if now_ms.saturating_sub(since) >= self.debounce_ms => {
                    pending.online_since = None;
                    drop(pending);
                    self.set_state(classified);
                }
                Some(_) => {}
            }
        } else {
            pending.online_since = None;
            drop(pending);
            self.set_state(classified);
        }
    }

    /// Samples a [`ConnectivitySource`] and feeds the reading through
    /// [`Self::observe_signal`] -- the integration point a host application
    /// wires to its platform reachability API on a timer.
    pub fn poll_source(&self, source: &dyn ConnectivitySource, now_ms: u64) {
        self.observe_signal(source.is_online(), source.link_quality(), now_ms);
    }

    /// Issues a HEAD request to `health_url`, aborting after `timeout`.
    ///
    /// A successful probe from `offline` promotes directly to `online`
    /// (bypassing the debounce window, since a real response is stronger
    /// evidence than a raw signal reading). A failed probe never demotes:
    /// the runtime's own signal remains authoritative for that direction.
    pub async fn probe(&self, health_url: &str, timeout: Duration) -> bool {
        let result = tokio::time::timeout(timeout, self.http.head(health_url).send()).await;
        let reachable = matches!(result, Ok(Ok(resp)) if resp.status().is_success());
        if reachable && self.current_state() == NetworkState::Offline {
            self.set_state(NetworkState::Online);
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_matches_constructor() {
        let sensor = NetworkSensor::new(true, 1_000);
        assert_eq!(sensor.current_state(), NetworkState::Online);
        let sensor = NetworkSensor::new(false, 1_000);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
    }

    #[test]
    fn p9_offline_to_online_requires_debounce() {
        let sensor = NetworkSensor::new(false, 1_000);
        sensor.observe_signal(true, None, 0);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
        sensor.observe_signal(true, None, 500);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
        sensor.observe_signal(true, None, 1_000);
        assert_eq!(sensor.current_state(), NetworkState::Online);
    }

    #[test]
    fn p9_any_to_offline_is_immediate() {
        let sensor = NetworkSensor::new(true, 1_000);
        sensor.observe_signal(false, None, 0);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
    }

    #[test]
    fn online_slow_reclassified_without_debounce() {
        let sensor = NetworkSensor::new(true, 1_000);
        sensor.observe_signal(true, Some(LinkQuality { rtt_ms: Some(600), downlink_mbps: None }), 0);
        assert_eq!(sensor.current_state(), NetworkState::Slow);
        sensor.observe_signal(true, Some(LinkQuality { rtt_ms: Some(10), downlink_mbps: Some(10.0) }), 1);
        assert_eq!(sensor.current_state(), NetworkState::Online);
    }

    #[test]
    fn intermittent_online_signal_resets_debounce_window() {
        let sensor = NetworkSensor::new(false, 1_000);
        sensor.observe_signal(true, None, 0);
        sensor.observe_signal(false, None, 200);
        sensor.observe_signal(true, None, 300);
        // only 700ms of continuous signal since the reset at t=300
        sensor.observe_signal(true, None, 999);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
        sensor.observe_signal(true, None, 1_300);
        assert_eq!(sensor.current_state(), NetworkState::Online);
    }

    #[test]
    fn subscriber_receives_current_state_synchronously() {
        let sensor = NetworkSensor::new(true, 1_000);
        let rx = sensor.subscribe();
        assert_eq!(*rx.borrow(), NetworkState::Online);
    }

    struct ManualConnectivitySource {
        online: std::sync::atomic::AtomicBool,
    }

    impl ConnectivitySource for ManualConnectivitySource {
        fn is_online(&self) -> bool {
            self.online.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn poll_source_feeds_observe_signal() {
        let sensor = NetworkSensor::new(true, 1_000);
        let source = ManualConnectivitySource { online: std::sync::atomic::AtomicBool::new(false) };
        sensor.poll_source(&source, 0);
        assert_eq!(sensor.current_state(), NetworkState::Offline);
    }
}
