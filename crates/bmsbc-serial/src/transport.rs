use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bmsbc_codec::encode_frame;
use tracing::{debug, info, warn};

use crate::accum::FrameAccumulator;
use crate::error::{Result, SerialError};
use crate::tty;

/// Launch configuration for a [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub path: PathBuf,
    /// Whitelisted baud rate.
    pub baud: u32,
}

#[derive(Default)]
struct Counters {
    tx_frames: AtomicU64,
    tx_errors: AtomicU64,
    rx_frames: AtomicU64,
    rx_dropped: AtomicU64,
}

/// Point-in-time view of the transport counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SerialStatsSnapshot {
    pub tx_frames: u64,
    pub tx_errors: u64,
    pub rx_frames: u64,
    pub rx_dropped: u64,
}

/// L2 frame tunnel over a serial byte stream.
///
/// The receive thread starts at `open` and runs until [`shutdown`]
/// (or drop). The send path is serialized by a mutex so concurrent
/// callers cannot interleave encoded bytes on the wire.
///
/// [`shutdown`]: SerialTransport::shutdown
pub struct SerialTransport {
    file: Arc<File>,
    path: PathBuf,
    tx_lock: Mutex<()>,
    running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl SerialTransport {
    /// Open and configure the device, then start the receive thread.
    /// `rx_cb` is invoked once per complete, valid L2 frame.
    pub fn open(
        config: &SerialConfig,
        rx_cb: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<Self> {
        let file = Arc::new(tty::open_raw(&config.path, config.baud)?);
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let thread = std::thread::Builder::new()
            .name("bmsbc-serial-rx".to_string())
            .spawn({
                let file = file.clone();
                let running = running.clone();
                let counters = counters.clone();
                move || Self::rx_loop(&file, &running, &counters, rx_cb)
            })
            .map_err(|err| {
                running.store(false, Ordering::SeqCst);
                SerialError::Io(err)
            })?;

        info!(path = ?config.path, baud = config.baud, "serial transport up");
        Ok(Self {
            file,
            path: config.path.clone(),
            tx_lock: Mutex::new(()),
            running,
            rx_thread: Mutex::new(Some(thread)),
            counters,
        })
    }

    /// Encode and write one L2 frame.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let wire = encode_frame(frame)?;

        let _guard = self.tx_lock.lock().expect("serial tx lock poisoned");
        let mut writer = &*self.file;
        match writer.write_all(&wire).and_then(|()| writer.flush()) {
            Ok(()) => {
                self.counters.tx_frames.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.counters.tx_errors.fetch_add(1, Ordering::Relaxed);
                Err(SerialError::Io(err))
            }
        }
    }

    /// Stop the receive thread and join it. Idempotent; the 100 ms
    /// read poll bounds the wait.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let thread = self
            .rx_thread
            .lock()
            .expect("serial thread lock poisoned")
            .take();
        if let Some(thread) = thread {
            let _ = thread.join();
            debug!(path = ?self.path, "serial transport down");
        }
    }

    pub fn stats(&self) -> SerialStatsSnapshot {
        SerialStatsSnapshot {
            tx_frames: self.counters.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.counters.tx_errors.load(Ordering::Relaxed),
            rx_frames: self.counters.rx_frames.load(Ordering::Relaxed),
            rx_dropped: self.counters.rx_dropped.load(Ordering::Relaxed),
        }
    }

    fn rx_loop(
        file: &File,
        running: &AtomicBool,
        counters: &Counters,
        rx_cb: impl Fn(&[u8]),
    ) {
        let mut accum = FrameAccumulator::new();
        let mut chunk = [0u8; 256];

        while running.load(Ordering::SeqCst) {
            let n = match (&*file).read(&mut chunk) {
                // VTIME expired with no data; re-check the stop flag.
                Ok(0) => continue,
                Ok(n) => n,
                Err(err)
                    if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
                {
                    continue
                }
                Err(err) => {
                    if running.load(Ordering::SeqCst) {
                        warn!(error = %err, "serial read failed; transport going passive");
                    }
                    break;
                }
            };

            let before = accum.dropped();
            accum.feed(&chunk[..n], |frame| {
                counters.rx_frames.fetch_add(1, Ordering::Relaxed);
                rx_cb(&frame);
            });
            let dropped = accum.dropped() - before;
            if dropped > 0 {
                counters.rx_dropped.fetch_add(dropped, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
