use std::sync::Arc;

use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message as KafkaMessage;
use tracing::{debug, warn};

use crate::event::ConsumerEventHandler;
use crate::message::Message;
use crate::registry::TopicHandlers;

/// What a single consumer poll produced.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing arrived before the poll timed out.
    Idle,
    Message(Message),
    PartitionEof(i32),
    Failed(String),
}

impl PollOutcome {
    pub fn from_result<M: KafkaMessage>(polled: Option<KafkaResult<M>>) -> Self {
        match polled {
            None => PollOutcome::Idle,
            Some(Ok(message)) => PollOutcome::Message(Message::from_kafka(&message)),
            Some(Err(KafkaError::PartitionEOF(partition))) => PollOutcome::PartitionEof(partition),
            Some(Err(e)) => PollOutcome::Failed(e.to_string()),
        }
    }
}

/// Hand a poll outcome to its single callback: the topic's own handler when `routes` has
/// one, the event handler otherwise. Returns whether work was done: false for an idle poll
/// and for a failed one, so the worker backs off instead of retrying at once.
pub fn deliver(
    outcome: PollOutcome,
    routes: Option<&TopicHandlers>,
    handler: Option<Arc<dyn ConsumerEventHandler>>,
    partition_count: i32,
) -> bool {
    match outcome {
        PollOutcome::Idle => false,
        PollOutcome::Message(message) => {
            if routes.is_some_and(|routes| routes.route(&message)) {
                return true;
            }
            match handler {
                Some(handler) => handler.on_msg(&message),
                None => debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "no handler for message, dropping it"
                ),
            }
            true
        }
        PollOutcome::PartitionEof(partition) => {
            debug!(partition, "reached end of partition");
            if let Some(handler) = handler {
                handler.on_partition_eof(partition, partition_count);
            }
            true
        }
        PollOutcome::Failed(description) => {
            warn!("consumer poll failed: {}", description);
            if let Some(handler) = handler {
                handler.on_failed(&description);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::RecordingHandler;
    use crate::worker_pool::WorkerPool;
    use rdkafka::error::RDKafkaErrorCode;
    use rdkafka::message::{OwnedMessage, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn owned(topic: &str, payload: &str) -> OwnedMessage {
        OwnedMessage::new(
            Some(payload.as_bytes().to_vec()),
            None,
            topic.to_string(),
            Timestamp::NotAvailable,
            0,
            10,
            None,
        )
    }

    #[test]
    fn test_outcome_from_poll_result() {
        assert!(matches!(
            PollOutcome::from_result::<OwnedMessage>(None),
            PollOutcome::Idle
        ));
        assert!(matches!(
            PollOutcome::from_result(Some(Ok(owned("events", "x")))),
            PollOutcome::Message(m) if m.topic == "events"
        ));
        assert!(matches!(
            PollOutcome::from_result::<OwnedMessage>(Some(Err(KafkaError::PartitionEOF(3)))),
            PollOutcome::PartitionEof(3)
        ));
        assert!(matches!(
            PollOutcome::from_result::<OwnedMessage>(Some(Err(KafkaError::MessageConsumption(
                RDKafkaErrorCode::UnknownTopicOrPartition
            )))),
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_routed_topics_bypass_on_msg() {
        let recorder = Arc::new(RecordingHandler::default());
        let routes = TopicHandlers::new();
        let routed = recorder.clone();
        routes.subscribe("orders", move |message| {
            routed
                .calls
                .lock()
                .unwrap()
                .push(format!("orders:{}", message.payload_str().unwrap()));
        });

        for (topic, payload) in [("orders", "1"), ("payments", "2"), ("orders", "3")] {
            let outcome = PollOutcome::from_result(Some(Ok(owned(topic, payload))));
            assert!(deliver(outcome, Some(&routes), Some(recorder.clone()), 0));
        }

        assert_eq!(
            recorder.calls(),
            vec![
                "orders:1".to_string(),
                "msg:payments:2".to_string(),
                "orders:3".to_string(),
            ]
        );
    }

    #[test]
    fn test_eof_and_failures_go_to_event_handler() {
        let recorder = Arc::new(RecordingHandler::default());

        assert!(deliver(
            PollOutcome::PartitionEof(1),
            None,
            Some(recorder.clone()),
            4
        ));
        assert!(!deliver(
            PollOutcome::Failed("Broker: Unknown topic or partition".to_string()),
            None,
            Some(recorder.clone()),
            4
        ));
        assert!(!deliver(PollOutcome::Idle, None, Some(recorder.clone()), 4));

        assert_eq!(
            recorder.calls(),
            vec![
                "eof:1:4".to_string(),
                "failed:Broker: Unknown topic or partition".to_string(),
            ]
        );
    }

    #[test]
    fn test_failing_polls_back_off() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let pool = WorkerPool::new("failing", 1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            deliver(
                PollOutcome::Failed("Local: Broker transport failure".to_string()),
                None,
                None,
                0,
            )
        });

        pool.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        pool.stop();
        pool.wait_for_stop();

        let total = ticks.load(Ordering::SeqCst);
        assert!(total >= 1);
        assert!(total < 50, "failing poll ticked {} times", total);
    }

    #[test]
    fn test_no_handler_drops_quietly() {
        let outcome = PollOutcome::from_result(Some(Ok(owned("events", "x"))));
        assert!(deliver(outcome, None, None, 0));
    }
}
