use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer as _};
use tracing::{error, info};

use crate::config::ConsumerOptions;
use crate::consume::{deliver, PollOutcome};
use crate::context::ConsumerEventContext;
use crate::error::{Error, Result};
use crate::event::{ConsumerEventHandler, HandlerSlot};
use crate::message::Message;
use crate::rebalance::RebalanceCoordinator;
use crate::registry::{MessageHandler, TopicHandlers};
use crate::worker_pool::WorkerPool;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

type KafkaConsumer = BaseConsumer<ConsumerEventContext>;

struct GroupClient {
    consumer: KafkaConsumer,
    routes: TopicHandlers,
    handler: Arc<HandlerSlot<dyn ConsumerEventHandler>>,
    coordinator: Arc<RebalanceCoordinator>,
    poll_lock: Mutex<()>,
}

impl GroupClient {
    fn poll_once(&self) -> bool {
        let _serving = self.poll_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = PollOutcome::from_result(self.consumer.poll(POLL_TIMEOUT));
        deliver(
            outcome,
            Some(&self.routes),
            self.handler.get(),
            self.coordinator.assigned_partition_count(),
        )
    }
}

/// Consumer group member reading any number of topics.
///
/// Topics subscribed with a handler have their messages delivered to that handler only;
/// everything else goes to [`ConsumerEventHandler::on_msg`].
pub struct Consumer {
    pool: WorkerPool,
    client: Arc<GroupClient>,
    subscriptions: Mutex<BTreeSet<String>>,
}

impl Consumer {
    pub fn new(options: ConsumerOptions) -> Result<Self> {
        if options.kafka_consumer_group.trim().is_empty() {
            return Err(Error::InvalidOption {
                name: "kafka_consumer_group",
                reason: "a group consumer needs a group id".to_owned(),
            });
        }

        let handler: Arc<HandlerSlot<dyn ConsumerEventHandler>> = Arc::new(HandlerSlot::new());
        let coordinator = Arc::new(RebalanceCoordinator::new(options.kafka_consumer_offset));
        let context =
            ConsumerEventContext::new(handler.clone()).with_coordinator(coordinator.clone());

        let consumer: KafkaConsumer = options
            .client_config()
            .create_with_context(context)
            .map_err(|e| {
                error!("failed to create consumer: {}", e);
                e
            })?;

        let client = Arc::new(GroupClient {
            consumer,
            routes: TopicHandlers::new(),
            handler,
            coordinator,
            poll_lock: Mutex::new(()),
        });

        let polled = client.clone();
        let pool = WorkerPool::new(
            "kafka-consumer",
            options.kafka_consumer_workers,
            move || polled.poll_once(),
        );

        info!(
            group = %options.kafka_consumer_group,
            workers = options.kafka_consumer_workers,
            "consumer created"
        );

        Ok(Self {
            pool,
            client,
            subscriptions: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn set_event_handler(&self, handler: Arc<dyn ConsumerEventHandler>) {
        self.client.handler.set(handler);
    }

    /// Route every message of `topic` to `handler` and add the topic to the subscription.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.client.routes.subscribe(topic, handler);
        self.extend_subscription(&[topic])
    }

    /// Like [`Consumer::subscribe`] for several topics at once, pairing topics and handlers by
    /// position.
    pub fn subscribe_all(&self, topics: &[&str], handlers: Vec<Arc<MessageHandler>>) -> Result<()> {
        self.client.routes.subscribe_all(topics, handlers)?;
        self.extend_subscription(topics)
    }

    /// Subscribe to `topics` without handlers of their own.
    pub fn subscribe_topics(&self, topics: &[&str]) -> Result<()> {
        self.extend_subscription(topics)
    }

    fn extend_subscription(&self, topics: &[&str]) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.extend(topics.iter().map(|topic| (*topic).to_owned()));

        let all: Vec<&str> = subscriptions.iter().map(String::as_str).collect();
        info!(topics = ?all, "updating subscription");
        self.client.consumer.subscribe(&all).map_err(|e| {
            error!(topics = ?all, "failed to subscribe: {}", e);
            Error::Kafka(e)
        })
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn assigned_partition_count(&self) -> i32 {
        self.client.coordinator.assigned_partition_count()
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
