use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use bmsbc_serial::SUPPORTED_BAUDS;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_hex64(value: &str) -> Result<u64, String> {
    let digits = value.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|_| format!("`{value}` is not a 64-bit hex identity"))
}

fn parse_baud(value: &str) -> Result<u32, String> {
    let baud: u32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a baud rate"))?;
    if SUPPORTED_BAUDS.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!(
            "baud {baud} not supported (choose one of {SUPPORTED_BAUDS:?})"
        ))
    }
}

#[derive(Parser, Debug)]
#[command(name = "bmsbc", version, about = "Bristlemouth node host")]
pub struct Cli {
    /// This node's 64-bit identity (hex), unique among running peers.
    #[arg(long, value_parser = parse_hex64, value_name = "HEX64")]
    pub node_id: u64,

    /// Peer identity wired to the next port slot (repeatable; at most
    /// fifteen are used, extras are dropped with a warning).
    #[arg(long = "peer", value_parser = parse_hex64, value_name = "HEX64")]
    pub peers: Vec<u64>,

    /// Directory for the local socket namespace.
    #[arg(long, default_value = "/tmp", value_name = "PATH")]
    pub socket_dir: PathBuf,

    /// Serial device path; enables gateway mode.
    #[arg(long, value_name = "PATH")]
    pub uart: Option<PathBuf>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200, value_parser = parse_baud, value_name = "RATE")]
    pub baud: u32,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}
