//! Topic pub/sub middleware over UDP multicast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// UDP port the middleware speaks on, both directions.
pub const MIDDLEWARE_PORT: u16 = 4321;

/// Middleware wire version.
pub const VERSION: u8 = 1;

const TYPE_PUBLISH: u8 = 1;

/// A publication as it travels inside the UDP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub src_node: u64,
    pub topic: String,
    pub data: Vec<u8>,
}

pub fn encode(publication: &Publication) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + publication.topic.len() + publication.data.len());
    out.push(VERSION);
    out.push(TYPE_PUBLISH);
    out.extend_from_slice(&publication.src_node.to_le_bytes());
    out.extend_from_slice(&(publication.topic.len() as u16).to_le_bytes());
    out.extend_from_slice(publication.topic.as_bytes());
    out.extend_from_slice(&publication.data);
    out
}

pub fn parse(bytes: &[u8]) -> Option<Publication> {
    if bytes.len() < 12 || bytes[0] != VERSION || bytes[1] != TYPE_PUBLISH {
        return None;
    }
    let src_node = u64::from_le_bytes(bytes[2..10].try_into().unwrap());
    let topic_len = usize::from(u16::from_le_bytes(bytes[10..12].try_into().unwrap()));
    let rest = &bytes[12..];
    if rest.len() < topic_len {
        return None;
    }
    let topic = std::str::from_utf8(&rest[..topic_len]).ok()?.to_string();
    Some(Publication {
        src_node,
        topic,
        data: rest[topic_len..].to_vec(),
    })
}

/// Invoked on delivery: `(src_node, topic, data)`.
pub type SubscriptionCallback = Arc<dyn Fn(u64, &str, &[u8]) + Send + Sync>;

/// Topic subscription table.
#[derive(Default)]
pub struct Subscriptions {
    by_topic: Mutex<HashMap<String, Vec<SubscriptionCallback>>>,
}

impl Subscriptions {
    pub fn subscribe(&self, topic: &str, cb: impl Fn(u64, &str, &[u8]) + Send + Sync + 'static) {
        self.by_topic
            .lock()
            .expect("subscription lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(Arc::new(cb));
    }

    /// Deliver to every subscriber of the publication's topic.
    pub fn deliver(&self, publication: &Publication) {
        let subscribers = {
            let by_topic = self.by_topic.lock().expect("subscription lock poisoned");
            by_topic.get(&publication.topic).cloned().unwrap_or_default()
        };
        for cb in subscribers {
            cb(publication.src_node, &publication.topic, &publication.data);
        }
    }
}
