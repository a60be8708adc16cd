use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer as _};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{error, info};

use crate::config::SimpleConsumerOptions;
use crate::consume::{deliver, PollOutcome};
use crate::context::ConsumerEventContext;
use crate::error::{Error, Result};
use crate::event::{ConsumerEventHandler, HandlerSlot};
use crate::worker_pool::WorkerPool;

const POLL_TIMEOUT: Duration = Duration::from_secs(2);

// A simple consumer reads exactly one partition
const PARTITION_COUNT: i32 = 1;

type KafkaConsumer = BaseConsumer<ConsumerEventContext>;

struct PartitionClient {
    consumer: KafkaConsumer,
    handler: Arc<HandlerSlot<dyn ConsumerEventHandler>>,
    poll_lock: Mutex<()>,
}

impl PartitionClient {
    fn poll_once(&self) -> bool {
        let _serving = self.poll_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = PollOutcome::from_result(self.consumer.poll(POLL_TIMEOUT));
        deliver(outcome, None, self.handler.get(), PARTITION_COUNT)
    }
}

/// Reads a single partition of a single topic from a fixed starting offset, outside of
/// any consumer group rebalancing.
pub struct SimpleConsumer {
    pool: WorkerPool,
    client: Arc<PartitionClient>,
    topic: String,
    partition: i32,
    offset: Offset,
    assigned: AtomicBool,
}

impl SimpleConsumer {
    pub fn new(options: SimpleConsumerOptions) -> Result<Self> {
        if options.kafka_consumer_topic.trim().is_empty() {
            return Err(Error::InvalidOption {
                name: "kafka_consumer_topic",
                reason: "a topic is required".to_owned(),
            });
        }
        if options.kafka_consumer_partition < 0 {
            return Err(Error::InvalidOption {
                name: "kafka_consumer_partition",
                reason: format!("{} is negative", options.kafka_consumer_partition),
            });
        }

        let handler: Arc<HandlerSlot<dyn ConsumerEventHandler>> = Arc::new(HandlerSlot::new());
        let consumer: KafkaConsumer = options
            .client_config()
            .create_with_context(ConsumerEventContext::new(handler.clone()))
            .map_err(|e| {
                error!("failed to create simple consumer: {}", e);
                e
            })?;

        let client = Arc::new(PartitionClient {
            consumer,
            handler,
            poll_lock: Mutex::new(()),
        });

        let polled = client.clone();
        let pool = WorkerPool::new(
            "kafka-simple-consumer",
            options.kafka_consumer_workers,
            move || polled.poll_once(),
        );

        Ok(Self {
            pool,
            client,
            topic: options.kafka_consumer_topic,
            partition: options.kafka_consumer_partition,
            offset: options.kafka_consumer_offset.into(),
            assigned: AtomicBool::new(false),
        })
    }

    pub fn set_event_handler(&self, handler: Arc<dyn ConsumerEventHandler>) {
        self.client.handler.set(handler);
    }

    /// Assign the partition, on the first call only, then launch the workers.
    pub fn start(&self) -> Result<()> {
        if !self.assigned.swap(true, Ordering::AcqRel) {
            let mut partitions = TopicPartitionList::with_capacity(1);
            partitions.add_partition_offset(&self.topic, self.partition, self.offset)?;

            if let Err(e) = self.client.consumer.assign(&partitions) {
                self.assigned.store(false, Ordering::Release);
                error!(topic = %self.topic, partition = self.partition, "failed to assign: {}", e);
                return Err(Error::Kafka(e));
            }

            info!(
                topic = %self.topic,
                partition = self.partition,
                "consuming from {:?}",
                self.offset
            );
        }

        self.pool.start()?;
        Ok(())
    }

    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn wait_for_stop(&self) {
        self.pool.wait_for_stop();
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}
