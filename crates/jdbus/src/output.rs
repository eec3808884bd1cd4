use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use jdbus_frame::{class_name, ControlPacket, ControlPacketType, Packet, StreamCommand};
use jdbus_protocol::{DeviceStatus, DriverHandle};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ControlView {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub address: u8,
    pub flags: u16,
    pub flag_names: Vec<&'static str>,
    pub driver_class: u32,
    pub class_name: &'static str,
    pub serial_number: u32,
    pub payload: String,
}

impl From<&ControlPacket> for ControlView {
    fn from(cp: &ControlPacket) -> Self {
        Self {
            packet_type: control_type_name(cp.packet_type),
            address: cp.address,
            flags: cp.flags.bits(),
            flag_names: cp.flags.names(),
            driver_class: cp.driver_class,
            class_name: class_name(cp.driver_class),
            serial_number: cp.serial_number,
            payload: hex::encode(&cp.payload),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommandView {
    pub command: u8,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl From<&StreamCommand> for CommandView {
    fn from(command: &StreamCommand) -> Self {
        let mut view = Self {
            command: command.command(),
            name: "",
            interval_ms: None,
            timestamp_ms: None,
            state: None,
        };
        match command {
            StreamCommand::None => view.name = "none",
            StreamCommand::StartStream { interval } => {
                view.name = "start-stream";
                view.interval_ms = Some(*interval);
            }
            StreamCommand::StopStream => view.name = "stop-stream",
            StreamCommand::State { timestamp, state } => {
                view.name = "state";
                view.timestamp_ms = Some(*timestamp);
                view.state = Some(hex::encode(state));
            }
            StreamCommand::Other { payload, .. } => {
                view.name = "other";
                view.state = Some(hex::encode(payload));
            }
        }
        view
    }
}

/// A decoded bus frame, ready for printing.
#[derive(Debug, Serialize)]
pub struct FrameView {
    pub address: u8,
    pub crc: u16,
    pub size: usize,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandView>,
    /// Why the payload could not be interpreted, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FrameView {
    pub fn from_packet(packet: &Packet) -> Self {
        let mut view = Self {
            address: packet.address,
            crc: packet.crc,
            size: packet.data.len(),
            data: hex::encode(&packet.data),
            control: None,
            command: None,
            note: None,
        };

        if packet.is_control() {
            match ControlPacket::from_packet(packet) {
                Ok(cp) => view.control = Some(ControlView::from(&cp)),
                Err(err) => view.note = Some(err.to_string()),
            }
        } else {
            match StreamCommand::decode(&packet.data) {
                Ok(command) => view.command = Some(CommandView::from(&command)),
                Err(err) => view.note = Some(err.to_string()),
            }
        }
        view
    }

    fn kind(&self) -> &'static str {
        if self.address == 0 {
            "control"
        } else {
            "data"
        }
    }

    fn detail(&self) -> String {
        if let Some(cp) = &self.control {
            let flags = if cp.flag_names.is_empty() {
                "-".to_string()
            } else {
                cp.flag_names.join("|")
            };
            return format!(
                "{} addr={} flags={} class={} ({}) serial={}",
                cp.packet_type, cp.address, flags, cp.driver_class, cp.class_name, cp.serial_number
            );
        }
        if let Some(command) = &self.command {
            let mut detail = command.name.to_string();
            if let Some(interval) = command.interval_ms {
                detail.push_str(&format!(" interval={interval}ms"));
            }
            if let Some(timestamp) = command.timestamp_ms {
                detail.push_str(&format!(" ts={timestamp}"));
            }
            if let Some(state) = &command.state {
                detail.push_str(&format!(" bytes={state}"));
            }
            return detail;
        }
        self.note.clone().unwrap_or_default()
    }
}

pub fn print_frame(packet: &Packet, format: OutputFormat) {
    let view = FrameView::from_packet(packet);
    match format {
        OutputFormat::Json => print_json(&view),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "KIND", "SIZE", "DETAIL"])
                .add_row(vec![
                    view.address.to_string(),
                    view.kind().to_string(),
                    view.size.to_string(),
                    view.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "address={} kind={} size={} {}",
                view.address,
                view.kind(),
                view.size,
                view.detail()
            );
        }
        OutputFormat::Raw => print_raw(&packet.to_bytes()),
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceRow {
    pub node: u32,
    pub handle: String,
    pub role: String,
    pub driver_class: u32,
    pub address: u8,
    pub serial_number: u32,
    pub flags: String,
    pub connected: bool,
    pub paired: bool,
}

impl DeviceRow {
    pub fn new(node: u32, handle: DriverHandle, status: &DeviceStatus) -> Self {
        Self {
            node,
            handle: handle.to_string(),
            role: status
                .role()
                .map(|role| role.to_string())
                .unwrap_or_else(|| "?".to_string()),
            driver_class: status.driver_class,
            address: status.address,
            serial_number: status.serial_number,
            flags: status.flags.to_string(),
            connected: status.is_connected(),
            paired: status.is_paired(),
        }
    }
}

pub fn print_devices(rows: &[DeviceRow], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&rows),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "NODE", "DRIVER", "ROLE", "CLASS", "ADDRESS", "SERIAL", "FLAGS",
                ]);
            for row in rows {
                table.add_row(vec![
                    row.node.to_string(),
                    row.handle.clone(),
                    row.role.clone(),
                    row.driver_class.to_string(),
                    row.address.to_string(),
                    row.serial_number.to_string(),
                    row.flags.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "node={} driver={} role={} class={} address={} serial={} flags={}",
                    row.node,
                    row.handle,
                    row.role,
                    row.driver_class,
                    row.address,
                    row.serial_number,
                    row.flags
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn control_type_name(packet_type: ControlPacketType) -> String {
    match packet_type {
        ControlPacketType::Hello => "hello".to_string(),
        ControlPacketType::PairingRequest => "pairing-request".to_string(),
        ControlPacketType::Unknown(v) => format!("unknown({v})"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use jdbus_frame::ControlFlags;

    use super::*;

    #[test]
    fn control_frames_show_flag_names() {
        let mut cp = ControlPacket::hello(5, jdbus_frame::PIN, 200);
        cp.flags = ControlFlags::PAIRABLE | ControlFlags::UNCERTAIN;
        let view = FrameView::from_packet(&cp.to_packet().unwrap());

        let control = view.control.as_ref().unwrap();
        assert_eq!(control.packet_type, "hello");
        assert_eq!(control.class_name, "PIN");
        assert!(control.flag_names.contains(&"PAIRABLE"));
        assert!(control.flag_names.contains(&"UNCERTAIN"));
        assert!(view.command.is_none());
    }

    #[test]
    fn data_frames_decode_as_stream_commands() {
        let command = StreamCommand::State {
            timestamp: 1000,
            state: Bytes::from_static(&[0xAB]),
        };
        let packet = Packet::new(12, command.to_bytes()).unwrap();
        let view = FrameView::from_packet(&packet);

        let command = view.command.as_ref().unwrap();
        assert_eq!(command.name, "state");
        assert_eq!(command.timestamp_ms, Some(1000));
        assert_eq!(command.state.as_deref(), Some("ab"));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["address"], 12);
        assert!(json.get("control").is_none());
    }

    #[test]
    fn short_control_frames_carry_a_note() {
        let packet = Packet::new(0, Bytes::from_static(&[1, 2, 3])).unwrap();
        let view = FrameView::from_packet(&packet);
        assert!(view.control.is_none());
        assert!(view.note.as_deref().unwrap().contains("too short"));
    }
}
