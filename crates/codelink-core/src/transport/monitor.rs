//! Hot-plug monitoring
//!
//! A [`DeviceMonitor`] tells subscribers when a named port appears or
//! disappears. [`PortMonitor`] implements it by polling a port lister and
//! diffing successive snapshots.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::serial::port_names;
use crate::signal::{lock, Signal};

/// A port appearing or disappearing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// The port became available
    Arrived(String),
    /// The port went away
    Removed(String),
}

impl HotplugEvent {
    /// Name of the port the event concerns
    pub fn port_name(&self) -> &str {
        match self {
            HotplugEvent::Arrived(name) | HotplugEvent::Removed(name) => name,
        }
    }
}

/// Callback invoked for hot-plug events on a subscribed port
pub type HotplugCallback = Arc<dyn Fn(&HotplugEvent) + Send + Sync>;

/// Handle identifying a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of hot-plug notifications
pub trait DeviceMonitor: Send + Sync {
    /// Call `callback` for arrivals and removals of `port_name`
    fn subscribe(&self, port_name: &str, callback: HotplugCallback) -> SubscriptionId;

    /// Stop notifying a subscription; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

type Lister = Box<dyn Fn() -> Vec<String> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    port_name: String,
    callback: HotplugCallback,
}

/// Polling [`DeviceMonitor`]
///
/// Call [`PortMonitor::poll`] directly or let [`PortMonitor::spawn`] run it on
/// a background thread.
pub struct PortMonitor {
    lister: Lister,
    known: Mutex<BTreeSet<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl PortMonitor {
    /// Monitor the system's serial ports
    pub fn new() -> Self {
        Self::with_lister(port_names)
    }

    /// Monitor the names returned by `lister`
    ///
    /// The first snapshot is taken here, so ports present now never produce
    /// an arrival.
    pub fn with_lister(lister: impl Fn() -> Vec<String> + Send + Sync + 'static) -> Self {
        let known = lister().into_iter().collect();
        Self {
            lister: Box::new(lister),
            known: Mutex::new(known),
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take a new snapshot and notify subscribers of the differences
    pub fn poll(&self) -> Vec<HotplugEvent> {
        let current: BTreeSet<String> = (self.lister)().into_iter().collect();
        let events: Vec<HotplugEvent> = {
            let mut known = lock(&self.known);
            let removed = known
                .difference(&current)
                .cloned()
                .map(HotplugEvent::Removed);
            let arrived = current
                .difference(&known)
                .cloned()
                .map(HotplugEvent::Arrived);
            let events = removed.chain(arrived).collect();
            *known = current;
            events
        };

        for event in &events {
            info!("port {:?}", event);
            let callbacks: Vec<HotplugCallback> = lock(&self.subscriptions)
                .iter()
                .filter(|s| s.port_name == event.port_name())
                .map(|s| s.callback.clone())
                .collect();
            for callback in callbacks {
                callback(event);
            }
        }
        events
    }

    /// Poll every `interval` on a background thread
    ///
    /// The thread stops when the returned handle is dropped or the monitor
    /// itself is dropped.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> std::io::Result<MonitorHandle> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let stop = Arc::new(StopFlag::default());
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("codelink port monitor".into())
            .spawn(move || {
                debug!("port monitor started");
                while !thread_stop.stopped.load(Ordering::Acquire) {
                    thread_stop.wake.wait_timeout(interval);
                    match weak.upgrade() {
                        Some(monitor) if !thread_stop.stopped.load(Ordering::Acquire) => {
                            monitor.poll();
                        }
                        _ => break,
                    }
                }
                debug!("port monitor stopped");
            })?;
        Ok(MonitorHandle {
            stop,
            thread: Some(thread),
        })
    }
}

impl Default for PortMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMonitor for PortMonitor {
    fn subscribe(&self, port_name: &str, callback: HotplugCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription {
            id,
            port_name: port_name.to_string(),
            callback,
        });
        debug!("watching {} ({:?})", port_name, id);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.subscriptions).retain(|s| s.id != id);
    }
}

#[derive(Default)]
struct StopFlag {
    stopped: AtomicBool,
    wake: Signal,
}

/// Owns a [`PortMonitor`] polling thread
pub struct MonitorHandle {
    stop: Arc<StopFlag>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop polling and wait for the thread to finish
    pub fn stop(&mut self) {
        self.stop.stopped.store(true, Ordering::Release);
        self.stop.wake.set();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("port monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
