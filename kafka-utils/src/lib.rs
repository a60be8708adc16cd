pub mod config;
pub mod consume;
pub mod consumer;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod metadata;
pub mod partitioner;
pub mod producer;
pub mod rebalance;
pub mod registry;
pub mod resolve;
pub mod simple_consumer;
pub mod worker_pool;

pub use config::{
    ConnectionOptions, ConsumerOptions, ProducerOptions, SimpleConsumerOptions, StartOffset,
    TargetPartition,
};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use event::{ClientEventHandler, ConsumerEventHandler, ProducerEventHandler};
pub use message::Message;
pub use partitioner::{PartitionStrategy, PartitionerKind};
pub use producer::Producer;
pub use simple_consumer::SimpleConsumer;
