//! Device Controller
//!
//! A [`Device`] owns one link to one peer. While connected it runs three
//! worker threads:
//!
//! - the receiver moves bytes from the transport into the ring buffer,
//! - the framer turns buffered bytes into messages for the response handler,
//! - the transmitter writes queued commands out as codewords.
//!
//! More than [`MAX_CRC_ERRORS`] checksum failures in one session trigger an
//! automatic reset. With a [`DeviceMonitor`] attached the link also follows
//! the port through unplug and replug.

mod counters;
mod framer;
mod queue;
mod receiver;
mod session;
mod transmitter;

pub use counters::CounterSnapshot;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use self::counters::Counters;
use self::queue::CommandQueue;
use self::session::{Session, SessionHandle};
use crate::config::DeviceConfig;
use crate::protocol::{ProtocolError, MAX_CRC_ERRORS};
use crate::signal::{lock, Stopwatch};
use crate::transport::{
    Connector, DeviceMonitor, HotplugEvent, SerialConnector, SubscriptionId, Transport,
};

/// Poll interval of [`Device::wait_for_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport and starting workers
    Connecting,
    /// Connected and running
    Connected,
    /// Stopping workers
    Disconnecting,
}

/// Lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A session started
    Connected,
    /// A session is about to end
    Disconnecting,
}

type ResponseHandler = Arc<dyn Fn(&str) + Send + Sync>;
type EventHandler = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Lifecycle {
    session: Option<SessionHandle>,
    watch: Option<SubscriptionId>,
}

pub(crate) struct Inner {
    config: RwLock<DeviceConfig>,
    connector: Arc<dyn Connector>,
    monitor: Option<Arc<dyn DeviceMonitor>>,
    lifecycle: Mutex<Lifecycle>,
    state: Mutex<ConnectionState>,
    queue: CommandQueue,
    counters: Counters,
    rx_clock: Stopwatch,
    tx_clock: Stopwatch,
    response_handler: RwLock<Option<ResponseHandler>>,
    event_handler: RwLock<Option<EventHandler>>,
    reset_pending: AtomicBool,
    /// Bumped by every explicit disconnect
    epoch: AtomicU64,
    closed: AtomicBool,
}

/// A checksummed command link to one device
///
/// Commands queue up with [`Device::command`]; responses arrive on the
/// handler set with [`Device::set_response_handler`], on the framing thread.
pub struct Device {
    inner: Arc<Inner>,
}

impl Device {
    /// Device on a serial port
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_connector(config, Arc::new(SerialConnector))
    }

    /// Device on a transport opened by `connector`
    pub fn with_connector(config: DeviceConfig, connector: Arc<dyn Connector>) -> Self {
        Self::build(config, connector, None)
    }

    /// Device that reconnects as `monitor` reports its port coming and going
    pub fn with_monitor(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
        monitor: Arc<dyn DeviceMonitor>,
    ) -> Self {
        Self::build(config, connector, Some(monitor))
    }

    fn build(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
        monitor: Option<Arc<dyn DeviceMonitor>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                connector,
                monitor,
                lifecycle: Mutex::new(Lifecycle::default()),
                state: Mutex::new(ConnectionState::Disconnected),
                queue: CommandQueue::default(),
                counters: Counters::default(),
                rx_clock: Stopwatch::new(),
                tx_clock: Stopwatch::new(),
                response_handler: RwLock::new(None),
                event_handler: RwLock::new(None),
                reset_pending: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Current configuration
    pub fn config(&self) -> DeviceConfig {
        read(&self.inner.config).clone()
    }

    /// Replace the configuration, resetting a live link to apply it
    pub fn set_config(&self, config: DeviceConfig) -> Result<(), ProtocolError> {
        {
            let mut current = write(&self.inner.config);
            if *current == config {
                return Ok(());
            }
            *current = config;
        }
        if self.is_ready() {
            self.inner.reset()
        } else {
            Ok(())
        }
    }

    /// Set the callback for received messages
    ///
    /// Runs on the framing thread; it may queue commands but must not block
    /// for long.
    pub fn set_response_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        *write(&self.inner.response_handler) = Some(Arc::new(handler));
    }

    /// Set the callback for lifecycle events
    ///
    /// The callback must not connect, disconnect or reset the device.
    pub fn set_event_handler(&self, handler: impl Fn(DeviceEvent) + Send + Sync + 'static) {
        *write(&self.inner.event_handler) = Some(Arc::new(handler));
    }

    /// Open the transport and start the workers
    ///
    /// Connecting an already connected device does nothing.
    pub fn connect(&self) -> Result<(), ProtocolError> {
        self.inner.connect()
    }

    /// Stop the workers and close the transport; safe to call repeatedly
    ///
    /// An automatic reset that is still pending will not reconnect.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.disconnect_session(false);
    }

    /// Same as [`Device::disconnect`]
    pub fn close(&self) {
        self.disconnect();
    }

    /// Disconnect and connect again
    pub fn reset(&self) -> Result<(), ProtocolError> {
        self.inner.reset()
    }

    /// Queue a command
    ///
    /// Commands queue even while disconnected and go out once a session is
    /// running. Returns whether the device is connected.
    pub fn command(&self, text: &str) -> Result<bool, ProtocolError> {
        if text.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        let format = read(&self.inner.config).log_format;
        debug!("command \"{}\"", format.render_text(text));
        self.inner.queue.push(text.to_string());
        Ok(self.inner.is_connected())
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Connected
    pub fn is_ready(&self) -> bool {
        self.inner.is_connected()
    }

    /// Connected with commands queued or being written
    pub fn is_busy(&self) -> bool {
        self.is_ready() && !self.inner.queue.is_drained()
    }

    /// Nothing left to transmit, or not connected
    pub fn is_idle(&self) -> bool {
        !self.is_busy()
    }

    /// Connected with nothing left to transmit
    pub fn is_free(&self) -> bool {
        self.is_ready() && self.inner.queue.is_drained()
    }

    /// Wait until [`Device::is_idle`] holds; returns false on timeout
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(IDLE_POLL_INTERVAL);
        }
        true
    }

    /// Commands not yet taken by the transmitter
    pub fn pending_commands(&self) -> usize {
        self.inner.queue.len()
    }

    /// Link statistics
    pub fn counters(&self) -> CounterSnapshot {
        self.inner.counters.snapshot(self.inner.rx_clock.longest())
    }

    /// Time since bytes were last written
    pub fn since_last_tx(&self) -> Option<Duration> {
        self.inner.tx_clock.elapsed()
    }

    /// Time since bytes were last received
    pub fn since_last_rx(&self) -> Option<Duration> {
        self.inner.rx_clock.elapsed()
    }

    /// Longest gap observed between received batches
    pub fn longest_silence(&self) -> Duration {
        self.inner.rx_clock.longest()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.disconnect();
    }
}

impl Inner {
    fn is_connected(&self) -> bool {
        *lock(&self.state) == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn emit(&self, event: DeviceEvent) {
        let handler = read(&self.event_handler).clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Hand a message to the response handler
    fn deliver(&self, text: &str) {
        let format = read(&self.config).log_format;
        debug!("response \"{}\"", format.render_text(text.trim_end()));
        self.counters.record_message();
        let handler = read(&self.response_handler).clone();
        if let Some(handler) = handler {
            handler(text);
        }
    }

    fn connect(self: &Arc<Self>) -> Result<(), ProtocolError> {
        self.connect_in(None)
    }

    /// Connect, unless `epoch` is given and an explicit disconnect has
    /// happened since it was read
    fn connect_in(self: &Arc<Self>, epoch: Option<u64>) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionFailed("device is closed".into()));
        }

        let mut life = lock(&self.lifecycle);
        if life.session.is_some() {
            return Ok(());
        }
        let current = self.epoch.load(Ordering::SeqCst);
        if epoch.is_some_and(|epoch| epoch != current) {
            debug!("link was disconnected; not reconnecting");
            return Ok(());
        }

        let config = read(&self.config).clone();
        config.validate()?;

        self.set_state(ConnectionState::Connecting);
        info!("connecting to {}", config.port.port_name);

        match self.open_session(config.clone(), current) {
            Ok(handle) => {
                life.session = Some(handle);
                if life.watch.is_none() {
                    life.watch = self.watch(&config.port.port_name);
                }
                self.set_state(ConnectionState::Connected);
                drop(life);
                info!("connected to {}", config.port.port_name);
                self.emit(DeviceEvent::Connected);
                Ok(())
            }
            Err(e) => {
                warn!("connect to {} failed: {}", config.port.port_name, e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn open_session(
        self: &Arc<Self>,
        config: DeviceConfig,
        epoch: u64,
    ) -> Result<SessionHandle, ProtocolError> {
        let mut transport = self.connector.open(&config.port)?;
        if let Err(e) = transport
            .clear_input_buffer()
            .and_then(|()| transport.clear_output_buffer())
        {
            debug!("failed to clear transport buffers: {} (continuing)", e);
        }
        transport.set_rts_mode(config.rts_mode)?;

        if let Some(checksum) = &config.checksum {
            if !checksum.self_test() {
                warn!(
                    "checksum parameters {:?} fail self-test; every message will be rejected",
                    checksum
                );
            }
        }

        let rx_transport = transport.try_clone()?;
        self.counters.begin_session();
        self.reset_pending.store(false, Ordering::Release);
        self.rx_clock.clear();

        let mut handle = SessionHandle {
            session: Arc::new(Session::new(config, epoch)),
            workers: Vec::with_capacity(3),
        };
        if let Err(e) = self.start_workers(&mut handle, rx_transport, transport) {
            handle.shutdown(&self.queue);
            return Err(ProtocolError::IoError(e));
        }
        Ok(handle)
    }

    fn start_workers(
        self: &Arc<Self>,
        handle: &mut SessionHandle,
        rx_transport: Box<dyn Transport>,
        tx_transport: Box<dyn Transport>,
    ) -> std::io::Result<()> {
        let port = handle.session.config.port.port_name.clone();

        let (inner, session) = (self.clone(), handle.session.clone());
        handle.workers.push(spawn_worker(&port, "receive", move || {
            receiver::run(inner, session, rx_transport)
        })?);

        let (inner, session) = (self.clone(), handle.session.clone());
        handle.workers.push(spawn_worker(&port, "framing", move || {
            framer::run(inner, session)
        })?);

        let (inner, session) = (self.clone(), handle.session.clone());
        handle.workers.push(spawn_worker(&port, "transmit", move || {
            transmitter::run(inner, session, tx_transport)
        })?);
        Ok(())
    }

    /// End the session; `keep_watch` keeps the hot-plug subscription alive
    fn disconnect_session(&self, keep_watch: bool) {
        if self.is_connected() {
            self.emit(DeviceEvent::Disconnecting);
        }

        let mut life = lock(&self.lifecycle);
        if !keep_watch {
            if let (Some(id), Some(monitor)) = (life.watch.take(), &self.monitor) {
                monitor.unsubscribe(id);
            }
        }
        let Some(handle) = life.session.take() else {
            return;
        };

        let port = handle.session.config.port.port_name.clone();
        info!("disconnecting from {}", port);
        self.set_state(ConnectionState::Disconnecting);
        handle.shutdown(&self.queue);
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected from {}", port);
    }

    fn reset(self: &Arc<Self>) -> Result<(), ProtocolError> {
        info!("resetting link");
        self.disconnect_session(true);
        self.counters.record_reset();
        self.connect()
    }

    /// Reset scheduled by the framer; dropped if the link was disconnected
    /// after it was scheduled
    fn auto_reset(self: &Arc<Self>, epoch: u64) -> Result<(), ProtocolError> {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!("link was disconnected; automatic reset dropped");
            return Ok(());
        }
        info!("resetting link");
        self.disconnect_session(true);
        self.counters.record_reset();
        self.connect_in(Some(epoch))
    }

    /// Count a checksum failure and reset once the session has seen too many
    ///
    /// `epoch` is that of the session reporting the failure.
    fn handle_crc_error(self: &Arc<Self>, epoch: u64) {
        let count = self.counters.record_crc_error();
        if count <= MAX_CRC_ERRORS || self.reset_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        warn!("{} CRC errors this session; resetting", count);
        // The reset joins the worker reporting the error, so it needs its own thread
        let inner = self.clone();
        let spawned = thread::Builder::new()
            .name("codelink reset".into())
            .spawn(move || {
                if let Err(e) = inner.auto_reset(epoch) {
                    warn!("automatic reset failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!("failed to start reset: {}", e);
            self.reset_pending.store(false, Ordering::Release);
        }
    }

    fn watch(self: &Arc<Self>, port_name: &str) -> Option<SubscriptionId> {
        let monitor = self.monitor.as_ref()?;
        let weak = Arc::downgrade(self);
        Some(monitor.subscribe(
            port_name,
            Arc::new(move |event: &HotplugEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_hotplug(event);
                }
            }),
        ))
    }

    fn on_hotplug(self: &Arc<Self>, event: &HotplugEvent) {
        match event {
            HotplugEvent::Arrived(port) => {
                if self.is_connected() {
                    return;
                }
                info!("{} arrived; reconnecting", port);
                if let Err(e) = self.connect() {
                    warn!("reconnect to {} failed: {}", port, e);
                }
            }
            HotplugEvent::Removed(port) => {
                info!("{} removed", port);
                self.disconnect_session(true);
            }
        }
    }
}

fn spawn_worker<F>(port: &str, role: &str, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("codelink {} {}", role, port))
        .spawn(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpConnector;

    fn unopenable() -> Device {
        Device::with_connector(DeviceConfig::default(), Arc::new(TcpConnector))
    }

    #[test]
    fn test_new_device_is_disconnected() {
        let device = unopenable();
        assert_eq!(device.state(), ConnectionState::Disconnected);
        assert!(!device.is_ready());
        assert!(device.is_idle());
        assert!(!device.is_free());
        assert!(device.since_last_rx().is_none());
    }

    #[test]
    fn test_invalid_config_does_not_connect() {
        let device = unopenable();
        assert!(matches!(
            device.connect(),
            Err(ProtocolError::InvalidConfig(_))
        ));
        assert_eq!(device.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_empty_command_rejected() {
        let device = unopenable();
        assert!(matches!(device.command(""), Err(ProtocolError::EmptyCommand)));
        assert_eq!(device.pending_commands(), 0);
    }

    #[test]
    fn test_command_queues_while_disconnected() {
        let device = unopenable();
        assert!(!device.command("PING").unwrap());
        assert_eq!(device.pending_commands(), 1);
        // Not connected, so nothing counts as busy
        assert!(device.is_idle());
        assert!(device.wait_for_idle(Duration::from_millis(1)));
    }

    #[test]
    fn test_disconnect_without_session() {
        let device = unopenable();
        device.disconnect();
        device.close();
        assert_eq!(device.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_set_config_while_disconnected() {
        let device = unopenable();
        let config = DeviceConfig::for_port("127.0.0.1:1", 9600);
        device.set_config(config.clone()).unwrap();
        assert_eq!(device.config(), config);
        assert_eq!(device.counters().resets, 0);
    }
}
