use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::logging::BusLog;
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
#[cfg(unix)]
pub mod listen;
#[cfg(unix)]
pub mod send;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a hex-encoded bus frame.
    Decode(DecodeArgs),
    /// Encode a bus frame and print it as hex.
    Encode(EncodeArgs),
    /// Send a single frame through a bridge socket.
    #[cfg(unix)]
    Send(SendArgs),
    /// Accept a bridge connection and print received frames.
    #[cfg(unix)]
    Listen(ListenArgs),
    /// Run nodes on an in-process bus and print the settled address table.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, bus_log: BusLog) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Encode(args) => encode::run(args),
        #[cfg(unix)]
        Command::Send(args) => send::run(args),
        #[cfg(unix)]
        Command::Listen(args) => listen::run(args, format),
        Command::Simulate(args) => simulate::run(args, format, bus_log),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex (spaces and a 0x prefix are ignored).
    pub frame: String,
}

/// Frame payload source shared by `encode` and `send`.
#[derive(Args, Debug, Default)]
pub struct PayloadArgs {
    /// Payload as hex.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Payload as a UTF-8 string.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["hex", "data"])]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    pub fn resolve(&self) -> CliResult<Vec<u8>> {
        if let Some(text) = &self.hex {
            return parse_hex(text);
        }
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(path) = &self.file {
            return fs::read(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
        }
        Ok(Vec::new())
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Destination address (0 addresses the logic driver).
    #[arg(long, short = 'a', default_value = "0")]
    pub address: u8,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Bridge socket path to connect to.
    pub path: PathBuf,
    /// Destination address (0 addresses the logic driver).
    #[arg(long, short = 'a', default_value = "0")]
    pub address: u8,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Bridge socket path to bind.
    pub path: PathBuf,
    /// Only print frames sent to these addresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub address: Option<Vec<u8>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of nodes on the bus.
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=16))]
    pub nodes: u32,
    /// How long to run before printing the table (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub duration: String,
    /// Driver class used by every simulated driver.
    #[arg(long, default_value_t = jdbus_frame::PIN)]
    pub class: u32,
    /// Preferred address for every host, to force address conflicts.
    #[arg(long)]
    pub collide: Option<u8>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse hex bytes, ignoring whitespace and an optional `0x` prefix.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|err| CliError::new(USAGE, format!("invalid hex: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
