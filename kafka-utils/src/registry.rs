use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;

pub type MessageHandler = dyn Fn(&Message) + Send + Sync;

/// Per-topic message handlers of a consumer.
///
/// A topic with a handler here owns its message stream: its messages are never passed to
/// the consumer's generic `on_msg` callback.
#[derive(Default)]
pub struct TopicHandlers {
    handlers: Mutex<HashMap<String, Arc<MessageHandler>>>,
}

impl TopicHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`, replacing any previous one.
    pub fn subscribe<F>(&self, topic: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.insert(topic, Arc::new(handler));
    }

    pub fn insert(&self, topic: &str, handler: Arc<MessageHandler>) {
        let replaced = self
            .lock()
            .insert(topic.to_owned(), handler)
            .is_some();
        debug!(topic, replaced, "registered topic handler");
    }

    /// Register one handler per topic, pairing them by position. Nothing is registered unless
    /// both lists have the same length.
    pub fn subscribe_all(&self, topics: &[&str], handlers: Vec<Arc<MessageHandler>>) -> Result<()> {
        if topics.len() != handlers.len() {
            return Err(Error::SubscriptionMismatch {
                topics: topics.len(),
                handlers: handlers.len(),
            });
        }

        let mut registered = self.lock();
        for (topic, handler) in topics.iter().zip(handlers) {
            registered.insert((*topic).to_owned(), handler);
        }
        Ok(())
    }

    pub fn lookup(&self, topic: &str) -> Option<Arc<MessageHandler>> {
        self.lock().get(topic).cloned()
    }

    /// Hand `message` to its topic's handler. Returns false if the topic has none.
    pub fn route(&self, message: &Message) -> bool {
        // Look up under the lock, call outside it
        match self.lookup(&message.topic) {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<MessageHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
