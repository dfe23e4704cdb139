/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The port number is outside the device's port range.
    #[error("port {port} out of range 1..={num_ports}")]
    InvalidPort { port: u8, num_ports: u8 },

    /// The frame length is outside the accepted bounds.
    #[error("frame length {len} outside {min}..={max}")]
    InvalidFrameLength { len: usize, min: usize, max: usize },

    /// The port has no usable outbound path.
    #[error("port {port} has no usable link")]
    LinkDown { port: u8 },

    /// The underlying socket or serial device rejected the operation.
    #[error("device I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
