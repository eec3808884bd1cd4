use jdbus_frame::Packet;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};

pub fn run(args: EncodeArgs) -> CliResult<i32> {
    let payload = args.payload.resolve()?;
    let packet = Packet::new(args.address, payload).map_err(|err| frame_error("encode failed", err))?;
    println!("{}", hex::encode(packet.to_bytes()));
    Ok(SUCCESS)
}
