//! Async runtime around a [`LogicDriver`].
//!
//! A [`BusNode`] owns the logic driver and is its only writer. One task
//! selects over received frames, the announce ticker, commands from
//! [`BusHandle`]s and a shutdown token, so the registry scan always runs to
//! completion before the next packet is looked at.

use std::time::Duration;

use bytes::Bytes;
use jdbus_transport::{MemoryBus, PacketSink};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{BusConfig, DriverSpec};
use crate::driver::Driver;
use crate::error::{ProtocolError, Result};
use crate::event::{BusEvent, EventKind};
use crate::logic::LogicDriver;
use crate::registry::DriverHandle;
use crate::status::DeviceStatus;

const EVENT_CAPACITY: usize = 64;

enum Command {
    Register {
        spec: DriverSpec,
        driver: Box<dyn Driver>,
        reply: oneshot::Sender<Result<DriverHandle>>,
    },
    Unregister {
        handle: DriverHandle,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        handle: DriverHandle,
        reply: oneshot::Sender<Option<DeviceStatus>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(DriverHandle, DeviceStatus)>>,
    },
    Filtered {
        reply: oneshot::Sender<Vec<u8>>,
    },
}

pub struct BusNode {
    logic: LogicDriver,
    intake: mpsc::UnboundedReceiver<Bytes>,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: BusHandle,
}

impl BusNode {
    /// Build a node that sends through `sink` and receives frames from `intake`.
    pub fn new(config: BusConfig, sink: PacketSink, intake: mpsc::UnboundedReceiver<Bytes>) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            logic: LogicDriver::new(config, sink),
            intake,
            commands,
            handle: BusHandle {
                commands: commands_tx,
                events,
                shutdown: CancellationToken::new(),
            },
        }
    }

    /// Build a node on a fresh port of an in-process bus.
    pub fn attach(config: BusConfig, bus: &MemoryBus) -> Self {
        let port = bus.attach();
        debug!(port = %port.id, serial = config.node_serial, "node attached");
        Self::new(config, port.sink, port.rx)
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    pub fn logic(&self) -> &LogicDriver {
        &self.logic
    }

    /// Register a driver before the node runs.
    pub fn register(&mut self, spec: DriverSpec, driver: impl Driver + 'static) -> Result<DriverHandle> {
        self.logic.register(spec, Box::new(driver))
    }

    /// Run until shutdown or until the intake closes.
    pub async fn run(mut self) -> Result<()> {
        let config = self.logic.config().clone();
        let mut ticker = time::interval(config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = self.handle.shutdown.clone();

        info!(
            serial = config.node_serial,
            drivers = self.logic.registry().len(),
            tick_ms = config.tick_period().as_millis() as u64,
            "bus node running"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(serial = config.node_serial, "bus node stopping");
                    break;
                }
                frame = self.intake.recv() => match frame {
                    Some(frame) => self.logic.handle_frame(&frame),
                    None => {
                        info!(serial = config.node_serial, "bus intake closed");
                        break;
                    }
                },
                Some(command) = self.commands.recv() => self.execute(command),
                _ = ticker.tick() => self.logic.tick(),
            }
            self.publish();
        }

        shutdown.cancel();
        Ok(())
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> (BusHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    fn execute(&mut self, command: Command) {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match command {
            Command::Register {
                spec,
                driver,
                reply,
            } => {
                let _ = reply.send(self.logic.register(spec, driver));
            }
            Command::Unregister { handle, reply } => {
                let _ = reply.send(self.logic.unregister(handle));
            }
            Command::Status { handle, reply } => {
                let _ = reply.send(self.logic.status(handle));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.logic.snapshot());
            }
            Command::Filtered { reply } => {
                let _ = reply.send(self.logic.filter().iter().collect());
            }
        }
    }

    fn publish(&mut self) {
        for event in self.logic.drain_events() {
            match &event.kind {
                EventKind::Connected { .. }
                | EventKind::Removed
                | EventKind::Paired { .. }
                | EventKind::Unpaired => info!(handle = %event.handle, event = %event.kind, "driver lifecycle"),
                _ => debug!(handle = %event.handle, event = %event.kind, "driver event"),
            }
            // No subscribers is not an error.
            let _ = self.handle.events.send(event);
        }
    }
}

/// Cloneable handle to a running [`BusNode`].
#[derive(Clone)]
pub struct BusHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<BusEvent>,
    shutdown: CancellationToken,
}

impl BusHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| ProtocolError::NodeStopped)?;
        rx.await.map_err(|_| ProtocolError::NodeStopped)
    }

    pub async fn register(&self, spec: DriverSpec, driver: impl Driver + 'static) -> Result<DriverHandle> {
        let driver: Box<dyn Driver> = Box::new(driver);
        self.request(|reply| Command::Register {
            spec,
            driver,
            reply,
        })
        .await?
    }

    pub async fn unregister(&self, handle: DriverHandle) -> Result<()> {
        self.request(|reply| Command::Unregister { handle, reply })
            .await?
    }

    pub async fn status(&self, handle: DriverHandle) -> Result<Option<DeviceStatus>> {
        self.request(|reply| Command::Status { handle, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<(DriverHandle, DeviceStatus)>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Addresses currently ignored because they are paired elsewhere.
    pub async fn filtered(&self) -> Result<Vec<u8>> {
        self.request(|reply| Command::Filtered { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until the driver is connected.
    pub async fn wait_connected(&self, handle: DriverHandle, timeout: Duration) -> Result<DeviceStatus> {
        self.wait_until(handle, timeout, DeviceStatus::is_connected).await
    }

    /// Wait until the driver is paired. Pairing has no timeout of its own.
    pub async fn wait_paired(&self, handle: DriverHandle, timeout: Duration) -> Result<DeviceStatus> {
        self.wait_until(handle, timeout, DeviceStatus::is_paired).await
    }

    async fn wait_until(
        &self,
        handle: DriverHandle,
        timeout: Duration,
        done: fn(&DeviceStatus) -> bool,
    ) -> Result<DeviceStatus> {
        // Subscribe before the first query so no transition slips between them.
        let mut events = self.subscribe();
        let wait = async {
            loop {
                let status = self
                    .status(handle)
                    .await?
                    .ok_or(ProtocolError::UnknownDriver(handle))?;
                if done(&status) {
                    return Ok(status);
                }
                loop {
                    match events.recv().await {
                        Ok(event) if event.handle == handle => break,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(ProtocolError::NodeStopped)
                        }
                    }
                }
            }
        };

        tokio::select! {
            result = time::timeout(timeout, wait) => {
                result.map_err(|_| ProtocolError::Timeout(timeout))?
            }
            _ = self.shutdown.cancelled() => Err(ProtocolError::NodeStopped),
        }
    }
}
