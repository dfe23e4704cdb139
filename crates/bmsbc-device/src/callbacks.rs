use std::sync::{Arc, Mutex};

/// Upward frame delivery: `(ingress_port, frame)`.
pub type ReceiveFn = dyn Fn(u8, &[u8]) + Send + Sync;

/// Upward link-state edge: `(port, up)`.
pub type LinkChangeFn = dyn Fn(u8, bool) + Send + Sync;

/// The upward callback pair shared between a device and the protocol
/// stack above it.
///
/// A composite device hands the same block to its underlay, so one
/// registration by the stack reaches every transport. Pointers are
/// snapshotted under the internal lock and invoked outside it, so
/// upward code may call back into the device without deadlock.
#[derive(Default)]
pub struct CallbackBlock {
    receive: Mutex<Option<Arc<ReceiveFn>>>,
    link_change: Mutex<Option<Arc<LinkChangeFn>>>,
}

impl CallbackBlock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the frame delivery callback.
    pub fn set_receive(&self, f: impl Fn(u8, &[u8]) + Send + Sync + 'static) {
        *self.receive.lock().expect("callback lock poisoned") = Some(Arc::new(f));
    }

    /// Register the link-state callback.
    pub fn set_link_change(&self, f: impl Fn(u8, bool) + Send + Sync + 'static) {
        *self.link_change.lock().expect("callback lock poisoned") = Some(Arc::new(f));
    }

    /// Deliver one frame upward. No-op until a callback is registered.
    pub fn receive(&self, port: u8, frame: &[u8]) {
        let cb = self
            .receive
            .lock()
            .expect("callback lock poisoned")
            .clone();
        if let Some(cb) = cb {
            cb(port, frame);
        }
    }

    /// Deliver one link-state edge upward. No-op until registered.
    pub fn link_change(&self, port: u8, up: bool) {
        let cb = self
            .link_change
            .lock()
            .expect("callback lock poisoned")
            .clone();
        if let Some(cb) = cb {
            cb(port, up);
        }
    }
}

impl std::fmt::Debug for CallbackBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackBlock")
            .field(
                "receive",
                &self.receive.lock().map(|g| g.is_some()).unwrap_or(false),
            )
            .field(
                "link_change",
                &self
                    .link_change
                    .lock()
                    .map(|g| g.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn unregistered_callbacks_are_noops() {
        let block = CallbackBlock::new();
        block.receive(1, b"frame");
        block.link_change(1, true);
    }

    #[test]
    fn registered_callbacks_fire() {
        let block = CallbackBlock::new();
        let received = Arc::new(AtomicUsize::new(0));
        let edges = Arc::new(AtomicUsize::new(0));

        let r = received.clone();
        block.set_receive(move |port, frame| {
            assert_eq!(port, 3);
            assert_eq!(frame, b"abc");
            r.fetch_add(1, Ordering::SeqCst);
        });
        let e = edges.clone();
        block.set_link_change(move |_, up| {
            assert!(up);
            e.fetch_add(1, Ordering::SeqCst);
        });

        block.receive(3, b"abc");
        block.link_change(2, true);
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(edges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_reenter_the_block() {
        // The pointer is snapshotted before invocation, so a callback
        // that re-registers itself must not deadlock.
        let block = CallbackBlock::new();
        let inner = block.clone();
        block.set_link_change(move |_, _| {
            inner.set_link_change(|_, _| {});
        });
        block.link_change(1, true);
    }
}
