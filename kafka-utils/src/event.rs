//! Client events and the callback interfaces they are dispatched to.
//!
//! librdkafka reports errors, logs, statistics and throttling out of band. The contexts in
//! [`crate::context`] turn each of those into a [`ClientEvent`] and [`dispatch_event`] maps
//! the event onto exactly one callback (two for "all brokers down") of the registered
//! handler. Producer and consumers share this mapping; only their handler traits differ.
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde::Deserialize;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Error {
        code: Option<RDKafkaErrorCode>,
        text: String,
        description: String,
    },
    /// A statistics JSON document.
    Stats(String),
    Log {
        severity: i32,
        facility: String,
        message: String,
    },
    Throttle {
        throttle_ms: i32,
        broker_name: String,
        broker_id: i32,
    },
    Unknown {
        kind: String,
        text: String,
        description: String,
    },
}

impl ClientEvent {
    pub fn from_error(error: &KafkaError, reason: &str) -> Self {
        ClientEvent::Error {
            code: error.rdkafka_error_code(),
            text: reason.to_owned(),
            description: error.to_string(),
        }
    }

    pub fn log(level: RDKafkaLogLevel, facility: &str, message: &str) -> Self {
        ClientEvent::Log {
            severity: level as i32,
            facility: facility.to_owned(),
            message: message.to_owned(),
        }
    }

    /// The statistics document itself, followed by one throttle event per broker that
    /// throttled requests during the last statistics window.
    pub fn from_stats(raw: &[u8]) -> Vec<ClientEvent> {
        let json = match std::str::from_utf8(raw) {
            Ok(json) => json,
            Err(e) => {
                return vec![ClientEvent::Unknown {
                    kind: "stats".to_owned(),
                    text: String::from_utf8_lossy(raw).into_owned(),
                    description: e.to_string(),
                }]
            }
        };

        let mut events = vec![ClientEvent::Stats(json.to_owned())];

        // Statistics that don't parse still reach on_status, they just yield no throttling
        if let Ok(stats) = serde_json::from_str::<ThrottleStats>(json) {
            let mut brokers: Vec<BrokerThrottle> = stats
                .brokers
                .into_values()
                .filter(|broker| broker.throttle.cnt > 0)
                .collect();
            brokers.sort_by_key(|broker| broker.nodeid);

            events.extend(brokers.into_iter().map(|broker| ClientEvent::Throttle {
                throttle_ms: i32::try_from(broker.throttle.max).unwrap_or(i32::MAX),
                broker_name: broker.name,
                broker_id: broker.nodeid,
            }));
        }

        events
    }
}

#[derive(Deserialize)]
struct ThrottleStats {
    #[serde(default)]
    brokers: HashMap<String, BrokerThrottle>,
}

#[derive(Deserialize)]
struct BrokerThrottle {
    name: String,
    nodeid: i32,
    #[serde(default)]
    throttle: ThrottleWindow,
}

#[derive(Deserialize, Default)]
struct ThrottleWindow {
    #[serde(default)]
    max: i64,
    #[serde(default)]
    cnt: i64,
}

/// Callbacks common to producers and consumers. Every method defaults to doing nothing.
pub trait ClientEventHandler: Send + Sync {
    /// Every broker connection is down. Followed by `on_error` for the same event.
    fn on_all_brokers_down(&self) {}

    fn on_error(&self, _event: &str, _description: &str) {}

    /// Statistics JSON emitted every `statistics.interval.ms`.
    fn on_status(&self, _json: &str) {}

    /// `severity` uses syslog levels, 0 (emergency) to 7 (debug).
    fn on_log(&self, _severity: i32, _facility: &str, _message: &str) {}

    fn on_throttle(&self, _throttle_ms: i32, _broker_name: &str, _broker_id: i32) {}

    fn on_unknown_event(&self, _kind: &str, _event: &str, _description: &str) {}
}

pub trait ProducerEventHandler: ClientEventHandler {
    /// Delivery report for a produced message; `message.error` is set if it failed.
    fn on_msg_delivered(&self, _message: &Message) {}
}

pub trait ConsumerEventHandler: ClientEventHandler {
    /// A consumed message whose topic has no handler of its own.
    fn on_msg(&self, _message: &Message) {}

    fn on_partition_eof(&self, _partition: i32, _partition_count: i32) {}

    fn on_failed(&self, _description: &str) {}
}

pub fn dispatch_event<H>(handler: &H, event: &ClientEvent)
where
    H: ClientEventHandler + ?Sized,
{
    match event {
        ClientEvent::Error {
            code,
            text,
            description,
        } => {
            if *code == Some(RDKafkaErrorCode::AllBrokersDown) {
                handler.on_all_brokers_down();
            }
            handler.on_error(text, description);
        }
        ClientEvent::Stats(json) => handler.on_status(json),
        ClientEvent::Log {
            severity,
            facility,
            message,
        } => handler.on_log(*severity, facility, message),
        ClientEvent::Throttle {
            throttle_ms,
            broker_name,
            broker_id,
        } => handler.on_throttle(*throttle_ms, broker_name, *broker_id),
        ClientEvent::Unknown {
            kind,
            text,
            description,
        } => handler.on_unknown_event(kind, text, description),
    }
}

/// The handler registered on a producer or consumer, replaceable at any time.
///
/// Callbacks run on a cloned `Arc`, never under the lock.
pub struct HandlerSlot<H: ?Sized> {
    handler: RwLock<Option<Arc<H>>>,
}

impl<H: ?Sized> HandlerSlot<H> {
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    pub fn set(&self, handler: Arc<H>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn clear(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn get(&self) -> Option<Arc<H>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<H: ?Sized> Default for HandlerSlot<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ClientEventHandler + ?Sized> HandlerSlot<H> {
    /// Dispatch to the registered handler, if any.
    pub fn dispatch(&self, event: &ClientEvent) {
        if let Some(handler) = self.get() {
            dispatch_event(handler.as_ref(), event);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every callback as a string, in call order.
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl ClientEventHandler for RecordingHandler {
        fn on_all_brokers_down(&self) {
            self.record("all_brokers_down".to_string());
        }

        fn on_error(&self, event: &str, description: &str) {
            self.record(format!("error:{}:{}", event, description));
        }

        fn on_status(&self, json: &str) {
            self.record(format!("status:{}", json));
        }

        fn on_log(&self, severity: i32, facility: &str, message: &str) {
            self.record(format!("log:{}:{}:{}", severity, facility, message));
        }

        fn on_throttle(&self, throttle_ms: i32, broker_name: &str, broker_id: i32) {
            self.record(format!("throttle:{}:{}:{}", throttle_ms, broker_name, broker_id));
        }

        fn on_unknown_event(&self, kind: &str, event: &str, description: &str) {
            self.record(format!("unknown:{}:{}:{}", kind, event, description));
        }
    }

    impl ProducerEventHandler for RecordingHandler {
        fn on_msg_delivered(&self, message: &Message) {
            self.record(format!(
                "delivered:{}:{}:{}",
                message.topic,
                message.partition,
                message.is_error()
            ));
        }
    }

    impl ConsumerEventHandler for RecordingHandler {
        fn on_msg(&self, message: &Message) {
            self.record(format!(
                "msg:{}:{}",
                message.topic,
                message.payload_str().unwrap_or_default()
            ));
        }

        fn on_partition_eof(&self, partition: i32, partition_count: i32) {
            self.record(format!("eof:{}:{}", partition, partition_count));
        }

        fn on_failed(&self, description: &str) {
            self.record(format!("failed:{}", description));
        }
    }

    #[test]
    fn test_all_brokers_down_fires_both_callbacks_in_order() {
        let handler = RecordingHandler::default();
        let event = ClientEvent::Error {
            code: Some(RDKafkaErrorCode::AllBrokersDown),
            text: "3/3 brokers are down".to_string(),
            description: "Local: All broker connections are down".to_string(),
        };

        dispatch_event(&handler, &event);

        assert_eq!(
            handler.calls(),
            vec![
                "all_brokers_down".to_string(),
                "error:3/3 brokers are down:Local: All broker connections are down".to_string(),
            ]
        );
    }

    #[test]
    fn test_other_errors_only_fire_on_error() {
        let handler = RecordingHandler::default();
        let event = ClientEvent::from_error(
            &KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure),
            "localhost:9092/1: Disconnected",
        );

        dispatch_event(&handler, &event);

        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("error:localhost:9092/1: Disconnected:"));
    }

    #[test]
    fn test_each_kind_maps_to_one_callback() {
        let handler = RecordingHandler::default();

        dispatch_event(&handler, &ClientEvent::Stats("{}".to_string()));
        dispatch_event(
            &handler,
            &ClientEvent::log(RDKafkaLogLevel::Warning, "BROKER", "connection refused"),
        );
        dispatch_event(
            &handler,
            &ClientEvent::Throttle {
                throttle_ms: 250,
                broker_name: "localhost:9092/1".to_string(),
                broker_id: 1,
            },
        );
        dispatch_event(
            &handler,
            &ClientEvent::Unknown {
                kind: "oauthbearer".to_string(),
                text: "token refresh".to_string(),
                description: "Success".to_string(),
            },
        );

        assert_eq!(
            handler.calls(),
            vec![
                "status:{}".to_string(),
                "log:4:BROKER:connection refused".to_string(),
                "throttle:250:localhost:9092/1:1".to_string(),
                "unknown:oauthbearer:token refresh:Success".to_string(),
            ]
        );
    }

    #[test]
    fn test_dispatch_through_trait_objects() {
        let recorder = Arc::new(RecordingHandler::default());

        let producers: HandlerSlot<dyn ProducerEventHandler> = HandlerSlot::new();
        producers.dispatch(&ClientEvent::Stats("{}".to_string()));
        producers.set(recorder.clone());
        producers.dispatch(&ClientEvent::Stats("{\"a\":1}".to_string()));

        let consumers: HandlerSlot<dyn ConsumerEventHandler> = HandlerSlot::new();
        consumers.set(recorder.clone());
        consumers.dispatch(&ClientEvent::Stats("{\"b\":2}".to_string()));
        consumers.clear();
        consumers.dispatch(&ClientEvent::Stats("{\"c\":3}".to_string()));

        assert_eq!(
            recorder.calls(),
            vec!["status:{\"a\":1}".to_string(), "status:{\"b\":2}".to_string()]
        );
    }

    #[test]
    fn test_stats_yield_throttle_events() {
        let raw = serde_json::json!({
            "name": "rdkafka#producer-1",
            "brokers": {
                "localhost:9093/2": {
                    "name": "localhost:9093/2",
                    "nodeid": 2,
                    "throttle": { "min": 0, "max": 40, "avg": 20, "cnt": 2 }
                },
                "localhost:9092/1": {
                    "name": "localhost:9092/1",
                    "nodeid": 1,
                    "throttle": { "min": 0, "max": 0, "avg": 0, "cnt": 0 }
                }
            }
        })
        .to_string();

        let events = ClientEvent::from_stats(raw.as_bytes());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ClientEvent::Stats(raw.clone()));
        assert_eq!(
            events[1],
            ClientEvent::Throttle {
                throttle_ms: 40,
                broker_name: "localhost:9093/2".to_string(),
                broker_id: 2,
            }
        );
    }

    #[test]
    fn test_unparseable_stats_still_reported() {
        let events = ClientEvent::from_stats(b"not json");
        assert_eq!(events, vec![ClientEvent::Stats("not json".to_string())]);

        let events = ClientEvent::from_stats(&[0xff, 0xfe]);
        assert!(matches!(&events[..], [ClientEvent::Unknown { kind, .. }] if kind == "stats"));
    }
}
