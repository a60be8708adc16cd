use rdkafka::error::KafkaError;
use rdkafka::message::Message as KafkaMessage;

/// An owned copy of a consumed message or of a delivery report.
///
/// Built once per poll and handed to exactly one callback.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// Set on delivery reports for messages that could not be delivered.
    pub error: Option<KafkaError>,
}

impl Message {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            error: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn from_kafka<M: KafkaMessage>(message: &M) -> Self {
        Self {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            error: None,
        }
    }

    pub fn from_failed_delivery<M: KafkaMessage>(error: &KafkaError, message: &M) -> Self {
        Self {
            error: Some(error.clone()),
            ..Self::from_kafka(message)
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
