/// Errors that can occur during record encoding/decoding.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A code byte in the stuffed data was zero.
    #[error("zero code byte in stuffed data")]
    ZeroCode,

    /// A declared run extends past the end of the input.
    #[error("stuffed run extends past end of input")]
    TruncatedRun,

    /// Decoding would produce more bytes than the caller allows.
    #[error("decoded output exceeds {max} bytes")]
    OutputOverflow { max: usize },

    /// A data byte inside a stuffed run was zero.
    #[error("zero byte inside a stuffed run")]
    ZeroInRun,

    /// The frame length is zero or above the layer maximum.
    #[error("frame length {len} outside 1..={max}")]
    InvalidLength { len: usize, max: usize },

    /// The unstuffed record is shorter than the fixed overhead.
    #[error("record too short ({len} bytes, need at least {min})")]
    RecordTooShort { len: usize, min: usize },

    /// The declared frame length disagrees with the decoded payload.
    #[error("declared length {declared} does not match decoded payload {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The received CRC does not match the one computed over the record.
    #[error("CRC mismatch (received {received:#010x}, computed {computed:#010x})")]
    CrcMismatch { received: u32, computed: u32 },
}

pub type Result<T> = std::result::Result<T, CodecError>;
