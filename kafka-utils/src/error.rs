use rdkafka::error::KafkaError;
use thiserror::Error;

/// Enumeration of errors returned by the synchronous operations of the producer and consumers.
/// Anything that happens asynchronously is reported to the registered event handler instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to spawn a polling worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("got {topics} topics but {handlers} handlers")]
    SubscriptionMismatch { topics: usize, handlers: usize },
    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
