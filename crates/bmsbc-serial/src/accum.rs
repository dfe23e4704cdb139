use bmsbc_codec::{decode_frame, MAX_FRAME, OVERHEAD, SENTINEL};
use tracing::debug;

/// Largest stuffed record the accumulator will hold (worst-case
/// encoding of a maximum frame, without the sentinel).
pub const MAX_RECORD: usize = max_record_len();

const fn max_record_len() -> usize {
    let payload = MAX_FRAME + OVERHEAD;
    payload + payload / 254 + 1
}

/// Gathers raw serial bytes and yields decoded L2 frames.
///
/// Every sentinel triggers a decode attempt on the accumulated record;
/// corrupt records are dropped silently. Overflow discards the partial
/// record and resynchronizes on the next sentinel.
pub struct FrameAccumulator {
    buf: Vec<u8>,
    /// Set after an overflow: bytes are discarded until a sentinel.
    resyncing: bool,
    dropped: u64,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_RECORD),
            resyncing: false,
            dropped: 0,
        }
    }

    /// Records dropped so far (corrupt or overflowing).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feed raw bytes; invokes `on_frame` once per decoded frame.
    pub fn feed(&mut self, bytes: &[u8], mut on_frame: impl FnMut(Vec<u8>)) {
        for &byte in bytes {
            if byte == SENTINEL {
                if self.resyncing {
                    self.resyncing = false;
                } else if !self.buf.is_empty() {
                    match decode_frame(&self.buf) {
                        Ok(frame) => on_frame(frame),
                        Err(err) => {
                            self.dropped += 1;
                            debug!(error = %err, len = self.buf.len(), "dropping corrupt record");
                        }
                    }
                    self.buf.clear();
                }
                // Consecutive sentinels delimit empty records; ignore.
            } else if self.resyncing {
                // Discarding until the next sentinel.
            } else if self.buf.len() >= MAX_RECORD {
                self.dropped += 1;
                debug!("record accumulator overflow; resynchronizing");
                self.buf.clear();
                self.resyncing = true;
            } else {
                self.buf.push(byte);
            }
        }
    }
}
