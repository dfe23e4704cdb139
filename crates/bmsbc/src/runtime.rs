use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bmsbc_device::NetworkDevice;
use bmsbc_gateway::GatewayDevice;
use bmsbc_ipc::{VirtualPortConfig, VirtualPortDevice};
use bmsbc_serial::SerialConfig;
use bmsbc_stack::{Stack, StackError};
use tracing::info;

use crate::app::{self, MultinodeApp};
use crate::cli::Cli;

/// Errors that abort startup. Exit codes are >1 and stage-specific;
/// 1 is reserved for configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The serial leg of the gateway could not be brought up.
    #[error("gateway setup failed: {0}")]
    Gateway(#[from] bmsbc_serial::SerialError),

    /// A stack initialization stage failed.
    #[error(transparent)]
    Stack(#[from] StackError),

    /// The shutdown signal handler could not be installed.
    #[error("signal handler setup failed: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl RuntimeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::Gateway(_) => 3,
            RuntimeError::Stack(err) => err.exit_code(),
            RuntimeError::Signal(_) => 5,
        }
    }
}

/// Construct the device, bring the stack up in order, then drive the
/// application until a shutdown signal arrives.
pub fn run(cli: Cli) -> Result<(), RuntimeError> {
    let node_id = cli.node_id;
    info!(node = format_args!("{node_id:016x}"), "device identity assigned");

    let ipc = VirtualPortDevice::new(VirtualPortConfig {
        node_id,
        socket_dir: cli.socket_dir.clone(),
        peers: cli.peers.clone(),
    });

    let device: Arc<dyn NetworkDevice> = match &cli.uart {
        Some(path) => {
            let gateway = GatewayDevice::new(
                ipc,
                &SerialConfig {
                    path: path.clone(),
                    baud: cli.baud,
                },
            )?;
            info!(uart = ?path, baud = cli.baud, port = gateway.serial_port(), "gateway mode");
            Arc::new(gateway)
        }
        None => Arc::new(ipc),
    };

    let stack = Stack::init(device, node_id)?;
    println!("[{node_id:016x}] stack initialized");

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })?;

    let mut multinode = MultinodeApp::new(stack.clone());
    app::drive(&mut multinode, &running);

    stack.shutdown();
    Ok(())
}
