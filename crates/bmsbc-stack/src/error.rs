use bmsbc_device::DeviceError;

/// Errors that can abort stack initialization.
///
/// Each variant carries the process exit code its stage reports, so a
/// startup failure is attributable from the exit status alone.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// L2 initialization failed (device registration or enablement).
    #[error("l2 initialization failed: {0}")]
    L2(#[from] DeviceError),

    /// The control-protocol housekeeping thread could not be started.
    #[error("control-protocol initialization failed: {0}")]
    Bcmp(#[source] std::io::Error),
}

impl StackError {
    /// Process exit code for this failure (always > 1; 1 is reserved
    /// for configuration errors).
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::L2(_) => 2,
            StackError::Bcmp(_) => 4,
        }
    }
}
