use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jdbus_frame::{FrameError, LinkConfig, PacketReader};
use jdbus_transport::BridgeSocket;
use tracing::{debug, info};

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// How often a blocked read wakes up to check for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let socket = BridgeSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %args.path.display(), "listening for bridge connections");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let link = LinkConfig {
        read_timeout: Some(POLL_INTERVAL),
        write_timeout: None,
    };
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let stream = socket
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        let mut reader = PacketReader::with_config_bus(stream, &link)
            .map_err(|err| frame_error("stream setup failed", err))?;

        while running.load(Ordering::SeqCst) {
            let packet = match reader.read_packet() {
                Ok(packet) => packet,
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    continue
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!("bridge disconnected");
                    break;
                }
                Err(err) => return Err(frame_error("receive failed", err)),
            };

            if let Some(addresses) = &args.address {
                if !addresses.contains(&packet.address) {
                    continue;
                }
            }

            print_frame(&packet, format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
