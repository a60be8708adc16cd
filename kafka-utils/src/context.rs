use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{DeliveryResult, ProducerContext};
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, error, warn};

use crate::event::{ClientEvent, ConsumerEventHandler, HandlerSlot, ProducerEventHandler};
use crate::message::Message;
use crate::partitioner::StrategyPartitioner;
use crate::rebalance::{RebalanceCoordinator, RebalanceKind};

const CONSUMER_LOG_FACILITY: &str = "kafka_consumer";

fn trace_log(level: RDKafkaLogLevel, fac: &str, log_message: &str) {
    match level {
        RDKafkaLogLevel::Emerg
        | RDKafkaLogLevel::Alert
        | RDKafkaLogLevel::Critical
        | RDKafkaLogLevel::Error => error!(facility = fac, "librdkafka: {}", log_message),
        RDKafkaLogLevel::Warning => warn!(facility = fac, "librdkafka: {}", log_message),
        _ => debug!(facility = fac, "librdkafka: {}", log_message),
    }
}

/// Routes a producer's out of band events and delivery reports to its event handler.
pub struct ProducerEventContext {
    handler: Arc<HandlerSlot<dyn ProducerEventHandler>>,
    partitioner: Option<StrategyPartitioner>,
    served: AtomicU64,
}

impl ProducerEventContext {
    pub fn new(
        handler: Arc<HandlerSlot<dyn ProducerEventHandler>>,
        partitioner: Option<StrategyPartitioner>,
    ) -> Self {
        Self {
            handler,
            partitioner,
            served: AtomicU64::new(0),
        }
    }

    /// Callbacks served so far. A poll that leaves this unchanged found nothing to do.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Acquire)
    }

    fn serve(&self, event: &ClientEvent) {
        self.served.fetch_add(1, Ordering::AcqRel);
        self.handler.dispatch(event);
    }
}

impl ClientContext for ProducerEventContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        trace_log(level, fac, log_message);
        self.serve(&ClientEvent::log(level, fac, log_message));
    }

    fn stats_raw(&self, statistics: &[u8]) {
        for event in ClientEvent::from_stats(statistics) {
            self.serve(&event);
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!("librdkafka: {}: {}", error, reason);
        self.serve(&ClientEvent::from_error(&error, reason));
    }
}

impl ProducerContext<StrategyPartitioner> for ProducerEventContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        self.served.fetch_add(1, Ordering::AcqRel);

        let message = match delivery_result {
            Ok(delivered) => Message::from_kafka(delivered),
            Err((e, undelivered)) => {
                warn!(
                    topic = undelivered.topic(),
                    "failed to deliver message: {}", e
                );
                Message::from_failed_delivery(e, undelivered)
            }
        };

        if let Some(handler) = self.handler.get() {
            handler.on_msg_delivered(&message);
        }
    }

    fn get_custom_partitioner(&self) -> Option<&StrategyPartitioner> {
        self.partitioner.as_ref()
    }
}

/// Routes a consumer's out of band events to its event handler and applies rebalances.
///
/// Messages, end-of-partition and fetch errors come back from `poll` itself and are
/// delivered by the consumer, not here.
pub struct ConsumerEventContext {
    handler: Arc<HandlerSlot<dyn ConsumerEventHandler>>,
    coordinator: Option<Arc<RebalanceCoordinator>>,
}

impl ConsumerEventContext {
    pub fn new(handler: Arc<HandlerSlot<dyn ConsumerEventHandler>>) -> Self {
        Self {
            handler,
            coordinator: None,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<RebalanceCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }
}

impl ClientContext for ConsumerEventContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        trace_log(level, fac, log_message);
        self.handler
            .dispatch(&ClientEvent::log(level, fac, log_message));
    }

    fn stats_raw(&self, statistics: &[u8]) {
        for event in ClientEvent::from_stats(statistics) {
            self.handler.dispatch(&event);
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!("librdkafka: {}: {}", error, reason);
        self.handler
            .dispatch(&ClientEvent::from_error(&error, reason));
    }
}

impl ConsumerContext for ConsumerEventContext {
    fn rebalance(
        &self,
        base_consumer: &BaseConsumer<Self>,
        err: RDKafkaRespErr,
        tpl: &mut TopicPartitionList,
    ) {
        // Simple consumers assign themselves and never join a group
        let Some(coordinator) = self.coordinator.as_ref() else {
            warn!("unexpected rebalance on a consumer without a group");
            return;
        };

        let kind = RebalanceKind::from(err);
        let summary = match coordinator.handle(base_consumer, &kind, tpl) {
            Ok(assignments) => match kind {
                RebalanceKind::Assign => format!("assigned {} partitions", assignments.len()),
                RebalanceKind::Revoke => "revoked all partitions".to_owned(),
                RebalanceKind::Error(e) => format!("rebalance failed: {}", e),
            },
            Err(e) => {
                error!("failed to apply rebalance {:?}: {}", kind, e);
                format!("failed to apply rebalance: {}", e)
            }
        };

        self.handler.dispatch(&ClientEvent::log(
            RDKafkaLogLevel::Info,
            CONSUMER_LOG_FACILITY,
            &summary,
        ));
    }
}
