//! Composite (gateway) network device.
//!
//! Presents N+1 ports behind one device: ports 1..N delegate to the
//! local-IPC underlay, port N+1 is the serial link. Flood (port 0)
//! routes to both. The gateway shares its callback block with the IPC
//! underlay, so the stack registers its callbacks once and frames from
//! either transport arrive through the same pair.

use std::sync::Arc;

use bmsbc_codec::CodecError;
use bmsbc_device::{
    check_frame_len, CallbackBlock, DeviceError, NetworkDevice, PortStats, Result, FLOOD_PORT,
};
use bmsbc_ipc::VirtualPortDevice;
use bmsbc_serial::{SerialConfig, SerialError, SerialTransport};
use tracing::debug;

/// Network device that fans out to the IPC underlay and one serial
/// trunk.
pub struct GatewayDevice {
    ipc: VirtualPortDevice,
    serial: SerialTransport,
    /// Port number of the serial link: IPC port count + 1.
    serial_port: u8,
    callbacks: Arc<CallbackBlock>,
}

fn serial_to_device(err: SerialError, port: u8) -> DeviceError {
    match err {
        SerialError::Codec(CodecError::InvalidLength { len, max }) => {
            DeviceError::InvalidFrameLength { len, min: 1, max }
        }
        SerialError::Io(source) => DeviceError::Io(source),
        other => DeviceError::Io(std::io::Error::other(format!("port {port}: {other}"))),
    }
}

impl GatewayDevice {
    /// Wrap `ipc` and open the serial link described by `serial`.
    ///
    /// Serial frames enter the stack as ingress port N+1 through the
    /// shared callback block.
    pub fn new(ipc: VirtualPortDevice, serial: &SerialConfig) -> std::result::Result<Self, SerialError> {
        let callbacks = ipc.callbacks().clone();
        let serial_port = ipc.num_ports() + 1;

        let serial = SerialTransport::open(serial, {
            let callbacks = callbacks.clone();
            move |frame| callbacks.receive(serial_port, frame)
        })?;

        Ok(Self {
            ipc,
            serial,
            serial_port,
            callbacks,
        })
    }

    /// Port number of the serial link.
    pub fn serial_port(&self) -> u8 {
        self.serial_port
    }
}

impl NetworkDevice for GatewayDevice {
    fn num_ports(&self) -> u8 {
        self.serial_port
    }

    fn send(&self, frame: &[u8], port: u8) -> Result<()> {
        check_frame_len(frame.len())?;
        if port == FLOOD_PORT {
            // Flood both underlays; succeed if either accepted.
            let ipc_result = self.ipc.send(frame, FLOOD_PORT);
            let serial_result = self
                .serial
                .send(frame)
                .map_err(|err| serial_to_device(err, self.serial_port));
            return match (ipc_result, serial_result) {
                (Err(ipc_err), Err(serial_err)) => {
                    debug!(error = %serial_err, "serial flood leg failed");
                    Err(ipc_err)
                }
                _ => Ok(()),
            };
        }

        if port == self.serial_port {
            return self
                .serial
                .send(frame)
                .map_err(|err| serial_to_device(err, port));
        }

        if port > self.serial_port {
            return Err(DeviceError::InvalidPort {
                port,
                num_ports: self.serial_port,
            });
        }
        self.ipc.send(frame, port)
    }

    fn enable(&self) -> Result<()> {
        self.ipc.enable()?;
        // The serial link has been carrying traffic since `open`; its
        // link-up edge rides on device enablement.
        self.callbacks.link_change(self.serial_port, true);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.callbacks.link_change(self.serial_port, false);
        self.serial.shutdown();
        self.ipc.disable()
    }

    fn enable_port(&self, port: u8) -> Result<()> {
        if port == self.serial_port {
            return Ok(());
        }
        if port == 0 || port > self.serial_port {
            return Err(DeviceError::InvalidPort {
                port,
                num_ports: self.serial_port,
            });
        }
        self.ipc.enable_port(port)
    }

    fn disable_port(&self, port: u8) -> Result<()> {
        if port == self.serial_port {
            return Ok(());
        }
        if port == 0 || port > self.serial_port {
            return Err(DeviceError::InvalidPort {
                port,
                num_ports: self.serial_port,
            });
        }
        self.ipc.disable_port(port)
    }

    fn retry_negotiation(&self, port: u8) -> Result<bool> {
        if port == self.serial_port {
            // The serial link needs no negotiation.
            return Ok(false);
        }
        self.ipc.retry_negotiation(port)
    }

    fn port_stats(&self, port: u8) -> Result<PortStats> {
        if port == self.serial_port {
            let s = self.serial.stats();
            return Ok(PortStats {
                tx_frames: s.tx_frames,
                rx_frames: s.rx_frames,
                tx_errors: s.tx_errors,
                rx_dropped: s.rx_dropped,
            });
        }
        self.ipc.port_stats(port)
    }

    fn callbacks(&self) -> &Arc<CallbackBlock> {
        &self.callbacks
    }
}
