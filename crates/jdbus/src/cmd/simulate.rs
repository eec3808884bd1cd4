use std::time::{Duration, Instant};

use bytes::Bytes;
use jdbus_frame::LOGGER;
use jdbus_protocol::{
    BusConfig, BusHandle, BusNode, ConsoleListener, ConsolePriority, DriverHandle, DriverRole,
    DriverSpec, LogBroadcaster, LogSender, StreamController, StreamHooks, StreamingConfig,
    StreamingDriver,
};
use jdbus_transport::MemoryBus;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, SimulateArgs};
use crate::exit::{io_error, protocol_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::logging::BusLog;
use crate::output::{print_devices, DeviceRow, OutputFormat};

/// Interval the paired clients ask their hosts to stream at.
const STREAM_INTERVAL: Duration = Duration::from_millis(100);

/// Streams whole seconds since the node started.
struct Uptime {
    started: Instant,
}

impl StreamHooks for Uptime {
    fn serialize_state(&self) -> Option<Bytes> {
        let secs = self.started.elapsed().as_secs() as u32;
        Some(Bytes::copy_from_slice(&secs.to_le_bytes()))
    }

    fn handle_virtual_state(&self, timestamp: u32, state: &[u8]) {
        debug!(timestamp, state = %hex::encode(state), "uptime sample");
    }
}

struct SimNode {
    serial: u32,
    bus: BusHandle,
    task: JoinHandle<jdbus_protocol::Result<()>>,
}

pub fn run(args: SimulateArgs, format: OutputFormat, bus_log: BusLog) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    let rows = runtime.block_on(simulate(&args, duration, &bus_log))?;
    print_devices(&rows, format);
    Ok(SUCCESS)
}

async fn simulate(
    args: &SimulateArgs,
    duration: Duration,
    bus_log: &BusLog,
) -> CliResult<Vec<DeviceRow>> {
    let bus = MemoryBus::new();
    let (console, mut lines) = ConsoleListener::new(ConsolePriority::Log);
    let mut console = Some(console);
    let mut nodes = Vec::new();

    for index in 0..args.nodes {
        let serial = index + 1;
        let mut node = BusNode::attach(BusConfig::default().with_serial(serial), &bus);

        let role = if index % 2 == 0 {
            DriverRole::PairableHost
        } else {
            DriverRole::PairedClient
        };
        let mut spec = DriverSpec::new(role, args.class);
        if let Some(address) = args.collide {
            spec = spec.with_address(address);
        }
        let started = Instant::now();
        let (driver, stream) = StreamingDriver::new(Uptime { started }, StreamingConfig::default());
        let handle = node
            .register(spec, driver)
            .map_err(|err| protocol_error("register failed", err))?;

        // Node 1 hosts the console, every other node logs to it.
        let logger = match console.take() {
            Some(listener) => {
                node.register(DriverSpec::new(DriverRole::Host, LOGGER), listener)
                    .map_err(|err| protocol_error("register failed", err))?;
                None
            }
            None => {
                let (broadcaster, sender) = LogBroadcaster::new();
                node.register(DriverSpec::new(DriverRole::Virtual, LOGGER), broadcaster)
                    .map_err(|err| protocol_error("register failed", err))?;
                // The first logging node also carries this process's own log lines.
                bus_log.attach(sender.clone());
                Some(sender)
            }
        };

        let (bus_handle, task) = node.spawn();
        info!(serial, role = %role, "node started");
        if role == DriverRole::PairedClient {
            tokio::spawn(drive_client(
                bus_handle.clone(),
                handle,
                stream,
                logger,
                duration,
                serial,
            ));
        }
        nodes.push(SimNode {
            serial,
            bus: bus_handle,
            task,
        });
    }

    tokio::time::sleep(duration).await;

    let mut rows = Vec::new();
    for node in &nodes {
        let snapshot = node
            .bus
            .snapshot()
            .await
            .map_err(|err| protocol_error("snapshot failed", err))?;
        rows.extend(
            snapshot
                .iter()
                .map(|(handle, status)| DeviceRow::new(node.serial, *handle, status)),
        );
    }

    for node in nodes {
        node.bus.shutdown();
        node.task
            .await
            .map_err(|err| CliError::new(INTERNAL, format!("node task failed: {err}")))?
            .map_err(|err| protocol_error("node failed", err))?;
    }

    let mut received = 0usize;
    while lines.try_recv().is_ok() {
        received += 1;
    }
    info!(lines = received, "console lines received");

    Ok(rows)
}

/// Wait for pairing, ask the host to stream and report on the console.
async fn drive_client(
    bus: BusHandle,
    handle: DriverHandle,
    stream: StreamController<Uptime>,
    logger: Option<LogSender>,
    patience: Duration,
    serial: u32,
) {
    let status = match bus.wait_paired(handle, patience).await {
        Ok(status) => status,
        Err(err) => {
            debug!(serial, error = %err, "client never paired");
            return;
        }
    };
    info!(serial, address = status.address, "client paired");

    if let Err(err) = stream.request_stream(STREAM_INTERVAL) {
        warn!(serial, error = %err, "stream request failed");
        return;
    }

    if let Some(logger) = logger {
        let line = format!("node {serial} paired at address {}", status.address);
        if let Err(err) = logger.log(ConsolePriority::Log, &line) {
            debug!(serial, error = %err, "console unavailable");
        }
    }
}
