//! Streaming pairable driver.
//!
//! The host side runs a background loop that polls [`StreamHooks::serialize_state`]
//! every interval and emits a `State` command when the bytes changed or the
//! bus has been silent for `max_silence`. The virtual side records incoming
//! states and can ask the host to start or stop.
//!
//! The loop is a tokio task owned by a [`StreamController`]. Stopping cancels
//! its token; [`StreamController::stop`] waits on a watch channel until the
//! loop reports [`StreamState::Stopped`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use jdbus_frame::{ControlPacket, FrameError, Packet, StreamCommand, MAX_STATE_LEN};
use jdbus_transport::{PacketSink, TransportError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::StreamingConfig;
use crate::driver::{send_data, Driver, DriverContext};
use crate::error::{ProtocolError, Result};
use crate::pairing::{PacketHandler, PairableDriver, PairingState};
use crate::status::{DeviceStatus, PeerIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Streaming,
    /// Stop requested; the loop has not exited yet.
    Stopping,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
        })
    }
}

/// A state snapshot received by the virtual side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSample {
    pub timestamp: u32,
    pub state: Bytes,
}

/// Application side of a streaming driver.
///
/// Hooks run either on the streaming task or on the packet-intake path, so
/// they take `&self` and must not block.
pub trait StreamHooks: Send + Sync + 'static {
    /// Current host state, or `None` to end the stream.
    fn serialize_state(&self) -> Option<Bytes>;

    fn handle_virtual_state(&self, timestamp: u32, state: &[u8]) {
        let _ = (timestamp, state);
    }

    /// A command the host side does not handle itself.
    fn handle_host_command(&self, ctx: &mut DriverContext<'_>, command: &StreamCommand) -> bool {
        let _ = (ctx, command);
        false
    }

    /// A command the virtual side does not handle itself.
    fn handle_virtual_command(&self, ctx: &mut DriverContext<'_>, command: &StreamCommand) -> bool {
        let _ = (ctx, command);
        false
    }
}

/// Change detection with a silence ceiling.
#[derive(Debug)]
pub struct StreamCache {
    last: Option<(Bytes, Instant)>,
    max_silence: Duration,
}

impl StreamCache {
    pub fn new(max_silence: Duration) -> Self {
        Self {
            last: None,
            max_silence,
        }
    }

    /// True if `state` differs from the last sent state, or if the last send
    /// is at least `max_silence` old.
    pub fn should_send(&self, state: &[u8], now: Instant) -> bool {
        match &self.last {
            Some((last, sent_at)) => {
                last.as_ref() != state || now.duration_since(*sent_at) >= self.max_silence
            }
            None => true,
        }
    }

    pub fn record(&mut self, state: Bytes, now: Instant) {
        self.last = Some((state, now));
    }
}

#[derive(Clone)]
struct Link {
    address: u8,
    sink: PacketSink,
}

struct Task {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct TaskSlot {
    next: u64,
    current: Option<Task>,
}

struct Shared<S> {
    hooks: S,
    config: StreamingConfig,
    epoch: Instant,
    link: watch::Sender<Option<Link>>,
    state: watch::Sender<StreamState>,
    received: watch::Sender<Option<StateSample>>,
    task: Mutex<TaskSlot>,
}

impl<S: StreamHooks> Shared<S> {
    fn task(&self) -> MutexGuard<'_, TaskSlot> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Milliseconds since the driver was built, wrapping at `u32::MAX`.
    fn timestamp(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn link(&self) -> Option<Link> {
        self.link.borrow().clone()
    }

    fn send(&self, command: &StreamCommand) -> Result<()> {
        let link = self.link().ok_or(ProtocolError::NotConnected)?;
        send_data(&link.sink, link.address, &command.to_bytes())
    }

    /// Ask the running loop to exit. Returns immediately.
    fn cancel(&self) {
        let slot = self.task();
        if let Some(task) = &slot.current {
            task.token.cancel();
            self.state.send_if_modified(|state| {
                let running = *state == StreamState::Streaming;
                if running {
                    *state = StreamState::Stopping;
                }
                running
            });
        }
    }

    /// Called by a loop on exit. A loop that was replaced leaves the state alone.
    fn finish(&self, generation: u64) {
        let mut slot = self.task();
        if slot
            .current
            .as_ref()
            .is_some_and(|task| task.generation == generation)
        {
            slot.current = None;
            self.state.send_replace(StreamState::Stopped);
        }
    }
}

/// Cloneable application handle of one streaming driver.
pub struct StreamController<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for StreamController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: StreamHooks> StreamController<S> {
    pub fn hooks(&self) -> &S {
        &self.shared.hooks
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.shared.state.subscribe()
    }

    /// True once the driver has an address to stream under.
    pub fn is_connected(&self) -> bool {
        self.shared.link.borrow().is_some()
    }

    /// Start the streaming loop. The interval is clamped to the configured
    /// minimum; the effective interval is returned.
    pub fn start(&self, interval: Duration) -> Result<Duration> {
        let runtime = Handle::try_current()
            .map_err(|err| ProtocolError::StreamingUnavailable(err.to_string()))?;
        let interval = self.shared.config.effective_interval(interval);

        let mut slot = self.shared.task();
        if slot
            .current
            .as_ref()
            .is_some_and(|task| !task.token.is_cancelled())
        {
            debug!(?interval, "stream already running");
            return Ok(interval);
        }

        let generation = slot.next;
        slot.next = slot.next.wrapping_add(1);
        let token = CancellationToken::new();
        slot.current = Some(Task {
            generation,
            token: token.clone(),
        });
        self.shared.state.send_replace(StreamState::Streaming);
        drop(slot);

        info!(interval_ms = interval.as_millis() as u64, "streaming started");
        runtime.spawn(run_stream(Arc::clone(&self.shared), token, generation, interval));
        Ok(interval)
    }

    /// Stop the loop and wait until it has exited.
    pub async fn stop(&self) {
        self.shared.cancel();
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `shared`, which we hold.
        let _ = rx.wait_for(|state| *state == StreamState::Stopped).await;
    }

    /// Virtual side: ask the host to start streaming.
    pub fn request_stream(&self, interval: Duration) -> Result<()> {
        let interval = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);
        self.shared.send(&StreamCommand::StartStream { interval })
    }

    /// Virtual side: ask the host to stop streaming.
    pub fn request_stop(&self) -> Result<()> {
        self.shared.send(&StreamCommand::StopStream)
    }

    /// The most recent state received from the host.
    pub fn last_state(&self) -> Option<StateSample> {
        self.shared.received.borrow().clone()
    }

    pub fn watch_samples(&self) -> watch::Receiver<Option<StateSample>> {
        self.shared.received.subscribe()
    }
}

async fn run_stream<S: StreamHooks>(
    shared: Arc<Shared<S>>,
    token: CancellationToken,
    generation: u64,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cache = StreamCache::new(shared.config.max_silence);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(state) = shared.hooks.serialize_state() else {
            debug!("no state to stream");
            break;
        };
        if state.len() > MAX_STATE_LEN {
            warn!(len = state.len(), max = MAX_STATE_LEN, "state does not fit in one packet; ending stream");
            break;
        }
        let now = Instant::now();
        if !cache.should_send(&state, now) {
            continue;
        }
        let Some(link) = shared.link() else {
            trace!("stream tick without address");
            continue;
        };

        let command = StreamCommand::State {
            timestamp: shared.timestamp(),
            state: state.clone(),
        };
        match send_data(&link.sink, link.address, &command.to_bytes()) {
            Ok(()) => {
                trace!(address = link.address, len = state.len(), "state sent");
                cache.record(state, now);
            }
            Err(ProtocolError::Transport(TransportError::Closed | TransportError::Shutdown)) => {
                debug!("bus closed; ending stream");
                break;
            }
            Err(err @ ProtocolError::Frame(FrameError::PayloadTooLarge { .. })) => {
                warn!(%err, "state packet rejected; ending stream");
                break;
            }
            Err(err) => warn!(%err, "state packet dropped"),
        }
    }

    shared.finish(generation);
    debug!(generation, "streaming loop exited");
}

/// Packet handler behind a [`StreamingDriver`].
pub struct StreamHandler<S> {
    shared: Arc<Shared<S>>,
}

impl<S: StreamHooks> StreamHandler<S> {
    fn controller(&self) -> StreamController<S> {
        StreamController {
            shared: Arc::clone(&self.shared),
        }
    }

    fn set_link(&self, ctx: &DriverContext<'_>) {
        let address = ctx.status().address;
        let sink = ctx.sink();
        self.shared.link.send_if_modified(|link| {
            if link.as_ref().is_some_and(|link| link.address == address) {
                return false;
            }
            *link = Some(Link {
                address,
                sink: sink.clone(),
            });
            true
        });
    }

    fn host_command(&mut self, ctx: &mut DriverContext<'_>, command: StreamCommand) -> bool {
        match command {
            StreamCommand::StartStream { interval } => {
                let requested = Duration::from_millis(u64::from(interval));
                if let Err(err) = self.controller().start(requested) {
                    warn!(handle = %ctx.handle(), %err, "cannot start stream");
                }
                true
            }
            StreamCommand::StopStream => {
                debug!(handle = %ctx.handle(), "stream stop requested");
                self.shared.cancel();
                true
            }
            other => self.shared.hooks.handle_host_command(ctx, &other),
        }
    }

    fn virtual_command(&mut self, ctx: &mut DriverContext<'_>, command: StreamCommand) -> bool {
        match command {
            StreamCommand::State { timestamp, state } => {
                trace!(handle = %ctx.handle(), timestamp, len = state.len(), "state received");
                self.shared.hooks.handle_virtual_state(timestamp, &state);
                self.shared
                    .received
                    .send_replace(Some(StateSample { timestamp, state }));
                true
            }
            other => self.shared.hooks.handle_virtual_command(ctx, &other),
        }
    }
}

impl<S: StreamHooks> PacketHandler for StreamHandler<S> {
    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        let command = match StreamCommand::decode(&packet.data) {
            Ok(command) => command,
            Err(err) => {
                debug!(handle = %ctx.handle(), %err, "undecodable stream command");
                return false;
            }
        };
        self.set_link(ctx);

        if ctx.status().is_host_driver() {
            self.host_command(ctx, command)
        } else {
            self.virtual_command(ctx, command)
        }
    }

    fn connected(&mut self, ctx: &mut DriverContext<'_>) {
        self.set_link(ctx);
    }

    fn removed(&mut self, ctx: &mut DriverContext<'_>) {
        trace!(handle = %ctx.handle(), "stream link dropped");
        self.shared.link.send_replace(None);
        self.shared.cancel();
    }

    fn unpaired(&mut self, _ctx: &mut DriverContext<'_>) {
        self.shared.cancel();
    }

    fn name(&self) -> &str {
        "streaming"
    }
}

/// A pairable driver that streams host state to its client.
///
/// Registered as a local host role it serves `StartStream`/`StopStream`;
/// registered as a virtual or paired-client role it receives `State`.
pub struct StreamingDriver<S> {
    inner: PairableDriver<StreamHandler<S>>,
}

impl<S: StreamHooks> StreamingDriver<S> {
    pub fn new(hooks: S, config: StreamingConfig) -> (Self, StreamController<S>) {
        let shared = Arc::new(Shared {
            hooks,
            config,
            epoch: Instant::now(),
            link: watch::Sender::new(None),
            state: watch::Sender::new(StreamState::Stopped),
            received: watch::Sender::new(None),
            task: Mutex::new(TaskSlot::default()),
        });
        let controller = StreamController {
            shared: Arc::clone(&shared),
        };
        let driver = Self {
            inner: PairableDriver::new(StreamHandler { shared }),
        };
        (driver, controller)
    }

    pub fn pairing_state(&self) -> PairingState {
        self.inner.state()
    }
}

impl<S: StreamHooks> Driver for StreamingDriver<S> {
    fn handle_control_packet(&mut self, ctx: &mut DriverContext<'_>, cp: &ControlPacket) -> bool {
        self.inner.handle_control_packet(ctx, cp)
    }

    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        self.inner.handle_packet(ctx, packet)
    }

    fn fill_control_packet(&mut self, status: &DeviceStatus, cp: &mut ControlPacket) {
        self.inner.fill_control_packet(status, cp);
    }

    fn device_connected(&mut self, ctx: &mut DriverContext<'_>) {
        self.inner.device_connected(ctx);
    }

    fn device_removed(&mut self, ctx: &mut DriverContext<'_>) {
        self.inner.device_removed(ctx);
    }

    fn partner(&self) -> Option<PeerIdentity> {
        self.inner.partner()
    }

    fn partner_lost(&mut self, ctx: &mut DriverContext<'_>) {
        self.inner.partner_lost(ctx);
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use jdbus_frame::{decode_packet, DeviceFlags};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::event::BusEvent;
    use crate::registry::DriverHandle;
    use crate::status::DriverRole;

    struct Fixed {
        state: Mutex<Option<Bytes>>,
        polls: AtomicUsize,
        received: Mutex<Vec<(u32, Vec<u8>)>>,
    }

    impl Fixed {
        fn new(state: &'static [u8]) -> Self {
            Self {
                state: Mutex::new(Some(Bytes::from_static(state))),
                polls: AtomicUsize::new(0),
                received: Mutex::new(Vec::new()),
            }
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    impl StreamHooks for Fixed {
        fn serialize_state(&self) -> Option<Bytes> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.state.lock().unwrap().clone()
        }

        fn handle_virtual_state(&self, timestamp: u32, state: &[u8]) {
            self.received.lock().unwrap().push((timestamp, state.to_vec()));
        }
    }

    struct Node {
        driver: StreamingDriver<Fixed>,
        controller: StreamController<Fixed>,
        status: DeviceStatus,
        sink: PacketSink,
        rx: UnboundedReceiver<Bytes>,
        events: Vec<BusEvent>,
    }

    impl Node {
        fn new(role: DriverRole, state: &'static [u8]) -> Self {
            let (driver, controller) = StreamingDriver::new(Fixed::new(state), StreamingConfig::default());
            let mut status = DeviceStatus::new(role, 7, 100);
            status.address = 3;
            status.flags.insert(DeviceFlags::INITIALISED);
            let (sink, rx) = PacketSink::channel();
            let mut node = Self {
                driver,
                controller,
                status,
                sink,
                rx,
                events: Vec::new(),
            };
            let mut ctx = DriverContext::new(
                DriverHandle::new(0, 0),
                &mut node.status,
                &node.sink,
                &mut node.events,
            );
            node.driver.device_connected(&mut ctx);
            node
        }

        fn deliver(&mut self, command: StreamCommand) -> bool {
            let packet = Packet::new(3, command.to_bytes()).unwrap();
            let mut ctx = DriverContext::new(
                DriverHandle::new(0, 0),
                &mut self.status,
                &self.sink,
                &mut self.events,
            );
            self.driver.handle_packet(&mut ctx, &packet)
        }

        fn drain(&mut self) -> Vec<StreamCommand> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                let packet = decode_packet(&frame).unwrap();
                assert_eq!(packet.address, 3);
                out.push(StreamCommand::decode(&packet.data).unwrap());
            }
            out
        }
    }

    #[test]
    fn cache_dedups_within_silence() {
        let start = Instant::now();
        let mut cache = StreamCache::new(Duration::from_millis(500));
        assert!(cache.should_send(b"a", start));
        cache.record(Bytes::from_static(b"a"), start);

        assert!(!cache.should_send(b"a", start + Duration::from_millis(499)));
        assert!(cache.should_send(b"b", start + Duration::from_millis(1)));
        assert!(cache.should_send(b"a", start + Duration::from_millis(500)));
    }

    #[test]
    fn start_requires_runtime() {
        let (_driver, controller) = StreamingDriver::new(Fixed::new(b"x"), StreamingConfig::default());
        let err = controller.start(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamingUnavailable(_)));
        assert_eq!(controller.state(), StreamState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_is_clamped_and_stop_waits() {
        let node = Node::new(DriverRole::PairableHost, b"x");
        let interval = node.controller.start(Duration::from_millis(5)).unwrap();
        assert_eq!(interval, Duration::from_millis(20));
        assert_eq!(node.controller.state(), StreamState::Streaming);

        time::sleep(Duration::from_millis(100)).await;
        assert!(node.controller.hooks().polls() >= 5);

        node.controller.stop().await;
        assert_eq!(node.controller.state(), StreamState::Stopped);

        let polls = node.controller.hooks().polls();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(node.controller.hooks().polls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_state_is_sent_once_per_silence_window() {
        let mut node = Node::new(DriverRole::PairableHost, b"same");
        node.controller.start(Duration::from_millis(20)).unwrap();

        time::sleep(Duration::from_millis(490)).await;
        let sent = node.drain();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], StreamCommand::State { state, .. } if state.as_ref() == b"same"));

        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(node.drain().len(), 1);

        node.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn changed_state_is_sent_every_tick() {
        let mut node = Node::new(DriverRole::PairableHost, b"a");
        node.controller.start(Duration::from_millis(20)).unwrap();
        time::sleep(Duration::from_millis(10)).await;

        *node.controller.hooks().state.lock().unwrap() = Some(Bytes::from_static(b"b"));
        time::sleep(Duration::from_millis(20)).await;

        let states: Vec<_> = node
            .drain()
            .into_iter()
            .map(|command| match command {
                StreamCommand::State { state, .. } => state,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(states, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        node.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ends_when_state_runs_out() {
        let node = Node::new(DriverRole::PairableHost, b"a");
        node.controller.start(Duration::from_millis(20)).unwrap();
        *node.controller.hooks().state.lock().unwrap() = None;

        let mut states = node.controller.watch_state();
        states
            .wait_for(|state| *state == StreamState::Stopped)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_state_ends_the_stream() {
        static WIDE: [u8; 40] = [0xAB; 40];
        let mut node = Node::new(DriverRole::PairableHost, &WIDE);
        node.controller.start(Duration::from_millis(20)).unwrap();

        let mut states = node.controller.watch_state();
        time::timeout(
            Duration::from_secs(1),
            states.wait_for(|state| *state == StreamState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(node.controller.hooks().polls(), 1);
        assert!(node.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn largest_state_still_fits() {
        static FULL: [u8; MAX_STATE_LEN] = [0x11; MAX_STATE_LEN];
        let mut node = Node::new(DriverRole::PairableHost, &FULL);
        node.controller.start(Duration::from_millis(20)).unwrap();
        time::sleep(Duration::from_millis(1)).await;

        let sent = node.drain();
        assert!(matches!(&sent[..], [StreamCommand::State { state, .. }] if state.len() == MAX_STATE_LEN));
        assert_eq!(node.controller.state(), StreamState::Streaming);
        node.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_intervals_fall_back_to_a_millisecond() {
        let config = StreamingConfig {
            default_interval: Duration::ZERO,
            min_interval: Duration::ZERO,
            ..StreamingConfig::default()
        };
        let (_driver, controller) = StreamingDriver::new(Fixed::new(b"x"), config);

        let interval = controller.start(Duration::ZERO).unwrap();
        assert_eq!(interval, Duration::from_millis(1));
        time::sleep(Duration::from_millis(10)).await;
        assert!(controller.hooks().polls() >= 5);

        time::timeout(Duration::from_secs(1), controller.stop())
            .await
            .unwrap();
        assert_eq!(controller.state(), StreamState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn host_serves_start_and_stop_commands() {
        let mut node = Node::new(DriverRole::PairableHost, b"a");

        assert!(node.deliver(StreamCommand::StartStream { interval: 50 }));
        assert_eq!(node.controller.state(), StreamState::Streaming);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(node.drain().len(), 1);

        assert!(node.deliver(StreamCommand::StopStream));
        assert_ne!(node.controller.state(), StreamState::Streaming);
        let mut states = node.controller.watch_state();
        states
            .wait_for(|state| *state == StreamState::Stopped)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn virtual_side_records_state_and_requests() {
        let mut node = Node::new(DriverRole::Virtual, b"");

        assert!(node.deliver(StreamCommand::State {
            timestamp: 42,
            state: Bytes::from_static(b"\x01\x02"),
        }));
        let sample = node.controller.last_state().unwrap();
        assert_eq!(sample.timestamp, 42);
        assert_eq!(sample.state.as_ref(), &[1, 2]);
        assert_eq!(
            *node.controller.hooks().received.lock().unwrap(),
            vec![(42, vec![1, 2])]
        );

        node.controller.request_stream(Duration::from_millis(30)).unwrap();
        node.controller.request_stop().unwrap();
        assert_eq!(
            node.drain(),
            vec![StreamCommand::StartStream { interval: 30 }, StreamCommand::StopStream]
        );
    }

    #[test]
    fn unknown_commands_reach_hooks() {
        let mut node = Node::new(DriverRole::Virtual, b"");
        let handled = node.deliver(StreamCommand::Other {
            command: 9,
            payload: Bytes::new(),
        });
        assert!(!handled);
    }

    #[test]
    fn requests_need_a_link() {
        let (_driver, controller) = StreamingDriver::new(Fixed::new(b"x"), StreamingConfig::default());
        assert!(!controller.is_connected());
        assert!(matches!(
            controller.request_stop(),
            Err(ProtocolError::NotConnected)
        ));
    }
}
