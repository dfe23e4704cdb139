//! Topic-keyed request/reply services.
//!
//! A handler registered under a topic turns publications on that topic
//! into requests: the stack runs the handler and publishes the
//! response on `<topic>/reply`. The hosted node ships no built-in
//! services; applications attach their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type ServiceHandler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Default)]
pub struct ServiceRegistry {
    handlers: Mutex<HashMap<String, ServiceHandler>>,
}

impl ServiceRegistry {
    /// Attach a handler; replaces any previous handler for the topic.
    pub fn register(
        &self,
        topic: &str,
        handler: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .expect("service lock poisoned")
            .insert(topic.to_string(), Arc::new(handler));
    }

    pub fn lookup(&self, topic: &str) -> Option<ServiceHandler> {
        self.handlers
            .lock()
            .expect("service lock poisoned")
            .get(topic)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().expect("service lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_invoke() {
        let registry = ServiceRegistry::default();
        assert!(registry.is_empty());

        registry.register("echo", |req| req.to_vec());
        let handler = registry.lookup("echo").expect("service should exist");
        assert_eq!(handler(b"abc"), b"abc");
        assert!(registry.lookup("missing").is_none());
    }
}
