use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rdkafka::producer::{BaseProducer, BaseRecord, Producer as _};
use tracing::{debug, error, info};

use crate::config::{ProducerOptions, TargetPartition};
use crate::context::ProducerEventContext;
use crate::error::{Error, Result};
use crate::event::{HandlerSlot, ProducerEventHandler};
use crate::metadata::ClusterMetadata;
use crate::partitioner::{PartitionStrategy, PartitionerKind, StrategyPartitioner};
use crate::worker_pool::WorkerPool;

/// Upper bound on a metadata round trip.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

type KafkaProducer = BaseProducer<ProducerEventContext, StrategyPartitioner>;

struct ProducerClient {
    producer: KafkaProducer,
    // Callbacks run one at a time, whatever the worker count
    poll_lock: Mutex<()>,
}

impl ProducerClient {
    fn poll_once(&self) -> bool {
        let _serving = self.poll_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let before = self.producer.context().served();
        self.producer.poll(Duration::ZERO);
        self.producer.context().served() != before
    }
}

/// Asynchronous producer. Messages are enqueued by [`Producer::produce`] and their delivery
/// reports come back through [`ProducerEventHandler::on_msg_delivered`] once the workers
/// are started.
pub struct Producer {
    // Declared first: dropping the pool joins the workers before the client goes away
    pool: WorkerPool,
    client: Arc<ProducerClient>,
    handler: Arc<HandlerSlot<dyn ProducerEventHandler>>,
    partition: TargetPartition,
}

impl Producer {
    pub fn new(options: ProducerOptions) -> Result<Self> {
        let strategy = options
            .kafka_partitioner
            .map(PartitionerKind::into_strategy);
        Self::build(options, strategy)
    }

    pub fn with_partitioner(options: ProducerOptions, strategy: PartitionStrategy) -> Result<Self> {
        Self::build(options, Some(strategy))
    }

    fn build(options: ProducerOptions, strategy: Option<PartitionStrategy>) -> Result<Self> {
        debug!(?strategy, "creating producer");

        let handler: Arc<HandlerSlot<dyn ProducerEventHandler>> = Arc::new(HandlerSlot::new());
        let context =
            ProducerEventContext::new(handler.clone(), strategy.map(StrategyPartitioner::new));

        let producer: KafkaProducer = options
            .client_config()
            .create_with_context(context)
            .map_err(|e| {
                error!("failed to create producer: {}", e);
                e
            })?;

        let client = Arc::new(ProducerClient {
            producer,
            poll_lock: Mutex::new(()),
        });

        let polled = client.clone();
        let pool = WorkerPool::new(
            "kafka-producer",
            options.kafka_producer_workers,
            move || polled.poll_once(),
        );

        info!(
            hosts = %options.connection.kafka_hosts,
            workers = options.kafka_producer_workers,
            "producer created"
        );

        Ok(Self {
            pool,
            client,
            handler,
            partition: options.kafka_producer_partition,
        })
    }

    pub fn set_event_handler(&self, handler: Arc<dyn ProducerEventHandler>) {
        self.handler.set(handler);
    }

    /// Enqueue `payload` for `topic` on the configured partition, or wherever the
    /// partitioner puts it when that is `any`.
    pub fn produce(&self, topic: &str, payload: &[u8], key: Option<&[u8]>) -> Result<()> {
        self.send(topic, self.partition.partition(), payload, key)
    }

    pub fn produce_to_partition(
        &self,
        topic: &str,
        partition: i32,
        payload: &[u8],
        key: Option<&[u8]>,
    ) -> Result<()> {
        self.send(topic, Some(partition), payload, key)
    }

    fn send(
        &self,
        topic: &str,
        partition: Option<i32>,
        payload: &[u8],
        key: Option<&[u8]>,
    ) -> Result<()> {
        let mut record: BaseRecord<'_, [u8], [u8]> = BaseRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(partition) = partition {
            record = record.partition(partition);
        }

        self.client.producer.send(record).map_err(|(e, _)| {
            error!(topic, "failed to enqueue message: {}", e);
            Error::Kafka(e)
        })
    }

    pub fn get_topic_metadata(&self, topic: &str) -> Result<ClusterMetadata> {
        self.fetch_metadata(Some(topic))
    }

    pub fn get_all_topic_metadata(&self) -> Result<ClusterMetadata> {
        self.fetch_metadata(None)
    }

    fn fetch_metadata(&self, topic: Option<&str>) -> Result<ClusterMetadata> {
        let metadata = self
            .client
            .producer
            .client()
            .fetch_metadata(topic, METADATA_TIMEOUT)
            .map_err(|e| {
                error!(?topic, "failed to fetch metadata: {}", e);
                e
            })?;
        Ok(ClusterMetadata::from(&metadata))
    }

    /// Messages enqueued or in flight that have not had a delivery report yet.
    pub fn out_queue_len(&self) -> i32 {
        self.client.producer.in_flight_count()
    }

    /// Block until every enqueued message has a delivery report or `timeout` passes.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let _serving = self
            .client
            .poll_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.client.producer.flush(timeout)?;
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        self.pool.start()?;
        Ok(())
    }

    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn wait_for_stop(&self) {
        self.pool.wait_for_stop();
    }
}
