use std::net::{IpAddr, SocketAddr};

use clap::{Parser, ValueEnum};
use forward::config::{BRIDGE_ADDR, REMOTE_ADDRESS, RELAY_CHUNK_SIZE, SOCKET_BUFFER_SIZE};
use forward::ForwardConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (if enabled)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for machine parsing
    Json,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum ColorMode {
    /// Auto-detect based on terminal capabilities
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Determine if colors should be enabled based on mode and terminal detection.
    pub fn should_enable(&self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "adb-forward")]
#[command(
    author,
    version,
    about = "Forward local TCP ports to the host through the ADB server"
)]
pub struct Cli {
    /// Ports to forward (comma-separated)
    #[arg(
        short = 'p',
        long = "ports",
        value_delimiter = ',',
        default_values_t = forward::DEFAULT_PORTS.to_vec()
    )]
    pub ports: Vec<u16>,

    /// Local address the listeners bind to
    #[arg(long = "bind", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Address of the ADB server
    #[arg(long = "bridge", default_value_t = BRIDGE_ADDR)]
    pub bridge: SocketAddr,

    /// Host the ADB server forwards each port to
    #[arg(long = "remote-address", default_value = REMOTE_ADDRESS)]
    pub remote_address: String,

    /// Socket buffer size in bytes for listening and bridge sockets (0 keeps kernel defaults)
    #[arg(long = "buffer-size", default_value_t = SOCKET_BUFFER_SIZE)]
    pub buffer_size: u32,

    /// Bytes relayed per read in each direction
    #[arg(long = "chunk-size", default_value_t = RELAY_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Enable colored log output (auto-detected by default)
    #[arg(long = "color", default_value = "auto")]
    pub color: ColorMode,

    /// Also write logs to a daily rolling file in the state directory
    #[arg(long = "log-file")]
    pub log_file: bool,
}

impl Cli {
    /// Build the forwarder configuration from the command line.
    pub fn forward_config(&self) -> ForwardConfig {
        ForwardConfig {
            bind_addr: self.bind,
            bridge_addr: self.bridge,
            remote_address: self.remote_address.clone(),
            socket_buffer_size: (self.buffer_size > 0).then_some(self.buffer_size),
            chunk_size: self.chunk_size.max(1),
        }
    }
}
