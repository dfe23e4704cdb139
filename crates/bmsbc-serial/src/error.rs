use std::path::PathBuf;

use bmsbc_codec::CodecError;

/// Errors that can occur in the serial transport.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    /// The baud rate is not on the supported whitelist.
    #[error("unsupported baud rate {baud}")]
    UnsupportedBaud { baud: u32 },

    /// Failed to open the serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to configure the line discipline.
    #[error("serial device configuration failed: {0}")]
    Configure(std::io::Error),

    /// Frame could not be encoded for the wire.
    #[error("serial codec error: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error occurred on the serial device.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
