//! Multi-node scenarios over the in-process bus.

use std::time::Duration;

use bytes::Bytes;
use jdbus_frame::{decode_packet, ControlFlags, ControlPacket, ControlPacketType, LOGGER};
use jdbus_protocol::{
    BusConfig, BusNode, ConsoleListener, ConsolePriority, DriverRole, DriverSpec, EventKind,
    LogBroadcaster, LogicDriver, PacketHandler, PairableDriver, StreamHooks, StreamState, StreamingConfig,
    StreamingDriver,
};
use jdbus_transport::{MemoryBus, PacketSink};
use tokio::time;

const WAIT: Duration = Duration::from_secs(5);

struct Greeting;

impl StreamHooks for Greeting {
    fn serialize_state(&self) -> Option<Bytes> {
        Some(Bytes::from_static(b"hi"))
    }
}

struct Idle;

impl PacketHandler for Idle {}

#[test]
fn pairable_host_requests_pairing_from_pairable_peer() {
    let (sink, mut rx) = PacketSink::channel();
    let mut logic = LogicDriver::new(BusConfig::default().with_serial(100), sink);
    let host = logic
        .register(
            DriverSpec::new(DriverRole::PairableHost, 7).with_address(3),
            Box::new(PairableDriver::new(Idle)),
        )
        .unwrap();
    for _ in 0..=logic.config().alloc_ticks() {
        logic.tick();
    }
    assert!(logic.status(host).unwrap().is_connected());
    while rx.try_recv().is_ok() {}

    let mut hello = ControlPacket::hello(5, 7, 200);
    hello.flags = ControlFlags::PAIRABLE;
    logic.handle_packet(&hello.to_packet().unwrap());

    let frame = rx.try_recv().unwrap();
    let request = ControlPacket::from_packet(&decode_packet(&frame).unwrap()).unwrap();
    assert_eq!(request.packet_type, ControlPacketType::PairingRequest);
    assert_eq!(request.address, 5);
    assert_eq!(request.flags.bits(), 0x40A0);
    assert_eq!(request.serial_number, 200);
    assert_eq!(request.driver_class, 7);
    assert!(logic.status(host).unwrap().is_pairing());
}

#[tokio::test(start_paused = true)]
async fn host_and_client_pair_then_stream() {
    let bus = MemoryBus::new();

    let mut host_node = BusNode::attach(BusConfig::default().with_serial(100), &bus);
    let (host_driver, host_stream) = StreamingDriver::new(Greeting, StreamingConfig::default());
    let host = host_node
        .register(
            DriverSpec::new(DriverRole::PairableHost, 7).with_address(10),
            host_driver,
        )
        .unwrap();

    let mut client_node = BusNode::attach(BusConfig::default().with_serial(200), &bus);
    let (client_driver, client_stream) = StreamingDriver::new(Greeting, StreamingConfig::default());
    let client = client_node
        .register(
            DriverSpec::new(DriverRole::PairedClient, 7).with_address(20),
            client_driver,
        )
        .unwrap();

    let (host_bus, _) = host_node.spawn();
    let (client_bus, _) = client_node.spawn();

    let host_status = host_bus.wait_paired(host, WAIT).await.unwrap();
    let client_status = client_bus.wait_paired(client, WAIT).await.unwrap();
    assert_eq!(host_status.address, 10);
    assert_eq!(client_status.address, 20);

    client_stream
        .request_stream(Duration::from_millis(20))
        .unwrap();
    let mut samples = client_stream.watch_samples();
    time::timeout(WAIT, samples.wait_for(|sample| sample.is_some()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host_stream.state(), StreamState::Streaming);
    assert_eq!(
        client_stream.last_state().map(|sample| sample.state),
        Some(Bytes::from_static(b"hi"))
    );

    client_stream.request_stop().unwrap();
    let mut host_state = host_stream.watch_state();
    time::timeout(WAIT, host_state.wait_for(|state| *state == StreamState::Stopped))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn log_lines_reach_the_console() {
    let bus = MemoryBus::new();

    let mut console_node = BusNode::attach(BusConfig::default().with_serial(1), &bus);
    let (listener, mut lines) = ConsoleListener::new(ConsolePriority::Log);
    console_node
        .register(DriverSpec::new(DriverRole::Host, LOGGER), listener)
        .unwrap();

    let mut app_node = BusNode::attach(BusConfig::default().with_serial(2), &bus);
    let (broadcaster, sender) = LogBroadcaster::new();
    let client = app_node
        .register(DriverSpec::new(DriverRole::Virtual, LOGGER), broadcaster)
        .unwrap();

    let (_console_bus, _) = console_node.spawn();
    let (app_bus, _) = app_node.spawn();
    app_bus.wait_connected(client, WAIT).await.unwrap();

    assert_eq!(sender.log(ConsolePriority::Debug, "hidden").unwrap(), 1);
    assert_eq!(sender.log(ConsolePriority::Error, "boom").unwrap(), 1);

    let line = time::timeout(WAIT, lines.recv()).await.unwrap().unwrap();
    assert_eq!(line.priority, ConsolePriority::Error);
    assert_eq!(line.text, "boom");
}

#[tokio::test(start_paused = true)]
async fn colliding_hosts_settle_on_distinct_addresses() {
    let bus = MemoryBus::new();
    let mut handles = Vec::new();
    for serial in [1, 2] {
        let mut node = BusNode::attach(BusConfig::default().with_serial(serial), &bus);
        let driver = node
            .register(
                DriverSpec::new(DriverRole::Host, 7).with_address(10),
                PairableDriver::new(Idle),
            )
            .unwrap();
        let (bus_handle, _) = node.spawn();
        handles.push((bus_handle, driver));
    }

    let mut addresses = Vec::new();
    for (bus_handle, driver) in &handles {
        let status = bus_handle.wait_connected(*driver, WAIT).await.unwrap();
        addresses.push(status.address);
    }
    assert_ne!(addresses[0], addresses[1]);

    // Stable after a few more announce rounds.
    time::sleep(Duration::from_secs(1)).await;
    for ((bus_handle, driver), address) in handles.iter().zip(&addresses) {
        let status = bus_handle.status(*driver).await.unwrap().unwrap();
        assert!(status.is_connected());
        assert_eq!(status.address, *address);
    }
}

#[tokio::test(start_paused = true)]
async fn paired_host_unpairs_when_client_goes_silent() {
    let bus = MemoryBus::new();
    let config = BusConfig::default();

    let mut host_node = BusNode::attach(config.clone().with_serial(100), &bus);
    let host = host_node
        .register(
            DriverSpec::new(DriverRole::PairableHost, 7).with_address(10),
            PairableDriver::new(Idle),
        )
        .unwrap();
    let mut client_node = BusNode::attach(config.clone().with_serial(200), &bus);
    let client = client_node
        .register(
            DriverSpec::new(DriverRole::PairedClient, 7).with_address(20),
            PairableDriver::new(Idle),
        )
        .unwrap();

    let (host_bus, _) = host_node.spawn();
    let (client_bus, client_task) = client_node.spawn();
    host_bus.wait_paired(host, WAIT).await.unwrap();
    client_bus.wait_paired(client, WAIT).await.unwrap();

    let mut events = host_bus.subscribe();
    let silenced = time::Instant::now();
    client_bus.shutdown();
    client_task.await.unwrap().unwrap();

    time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if event.handle == host && event.kind == EventKind::Unpaired {
                break;
            }
        }
    })
    .await
    .unwrap();

    let waited = silenced.elapsed();
    let window = config.tick_period() * u32::from(config.timeout_ticks());
    assert!(waited >= window, "unpaired after {waited:?}, window {window:?}");

    let status = host_bus.status(host).await.unwrap().unwrap();
    assert!(!status.is_paired());
    assert!(status.is_connected());
}
