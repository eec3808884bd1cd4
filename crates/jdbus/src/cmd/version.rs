use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("jdbus {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: jdbus");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("JDBUS_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "frame: packet={}B header={}B control_header={}B",
        jdbus_frame::PACKET_SIZE,
        jdbus_frame::HEADER_SIZE,
        jdbus_frame::CONTROL_HEADER_SIZE
    );
    println!(
        "features: protocol={}, cli=true",
        cfg!(feature = "protocol")
    );

    Ok(SUCCESS)
}
