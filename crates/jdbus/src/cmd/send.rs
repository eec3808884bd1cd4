use jdbus_frame::PacketWriter;
use jdbus_transport::BridgeSocket;
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, transport_error, CliResult, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let payload = args.payload.resolve()?;
    let stream =
        BridgeSocket::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let mut writer = PacketWriter::new(stream);
    writer
        .send(args.address, &payload)
        .map_err(|err| frame_error("send failed", err))?;
    info!(address = args.address, size = payload.len(), "frame sent");
    Ok(SUCCESS)
}
