use std::sync::atomic::{AtomicI32, Ordering};

use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::error::{KafkaResult, RDKafkaErrorCode};
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{error, info};

use crate::config::StartOffset;

/// What the group coordinator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceKind {
    Assign,
    Revoke,
    Error(String),
}

impl From<RDKafkaRespErr> for RebalanceKind {
    fn from(err: RDKafkaRespErr) -> Self {
        match err {
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__ASSIGN_PARTITIONS => RebalanceKind::Assign,
            RDKafkaRespErr::RD_KAFKA_RESP_ERR__REVOKE_PARTITIONS => RebalanceKind::Revoke,
            other => RebalanceKind::Error(RDKafkaErrorCode::from(other).to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
}

/// The part of a consumer the coordinator drives.
pub trait PartitionAssigner {
    fn assign(&self, partitions: &TopicPartitionList) -> KafkaResult<()>;
    fn unassign(&self) -> KafkaResult<()>;
}

impl<C: ConsumerContext> PartitionAssigner for BaseConsumer<C> {
    fn assign(&self, partitions: &TopicPartitionList) -> KafkaResult<()> {
        Consumer::assign(self, partitions)
    }

    fn unassign(&self) -> KafkaResult<()> {
        Consumer::unassign(self)
    }
}

/// Decides the starting offsets of a group consumer's partitions on every rebalance.
///
/// Newly assigned partitions resume from the group's committed offset unless the consumer
/// was configured with an explicit starting offset. The only state kept between rebalances
/// is the number of partitions currently assigned, reported alongside end-of-partition
/// events.
#[derive(Debug)]
pub struct RebalanceCoordinator {
    start_offset: Option<StartOffset>,
    assigned_partitions: AtomicI32,
}

impl RebalanceCoordinator {
    pub fn new(start_offset: Option<StartOffset>) -> Self {
        Self {
            start_offset,
            assigned_partitions: AtomicI32::new(0),
        }
    }

    pub fn starting_offset(&self) -> Offset {
        self.start_offset.map(Offset::from).unwrap_or(Offset::Stored)
    }

    pub fn plan_assignment(&self, partitions: &TopicPartitionList) -> Vec<PartitionAssignment> {
        let offset = self.starting_offset();
        partitions
            .elements()
            .iter()
            .map(|elem| PartitionAssignment {
                topic: elem.topic().to_owned(),
                partition: elem.partition(),
                offset,
            })
            .collect()
    }

    /// Apply a rebalance to `assigner`, returning the assignments made (empty on revoke).
    pub fn handle<A>(
        &self,
        assigner: &A,
        kind: &RebalanceKind,
        partitions: &TopicPartitionList,
    ) -> KafkaResult<Vec<PartitionAssignment>>
    where
        A: PartitionAssigner + ?Sized,
    {
        info!(
            "rebalance {:?}, {} partitions",
            kind,
            partitions.count()
        );

        match kind {
            RebalanceKind::Assign => {
                let assignments = self.plan_assignment(partitions);

                let mut assigned = TopicPartitionList::with_capacity(assignments.len());
                for assignment in &assignments {
                    info!(
                        topic = %assignment.topic,
                        partition = assignment.partition,
                        "starting partition at {:?}",
                        assignment.offset
                    );
                    assigned.add_partition_offset(
                        &assignment.topic,
                        assignment.partition,
                        assignment.offset,
                    )?;
                }

                assigner.assign(&assigned)?;
                self.assigned_partitions.store(
                    i32::try_from(assignments.len()).unwrap_or(i32::MAX),
                    Ordering::Release,
                );
                Ok(assignments)
            }
            RebalanceKind::Revoke | RebalanceKind::Error(_) => {
                if let RebalanceKind::Error(e) = kind {
                    error!("rebalance error, dropping all partitions: {}", e);
                }
                self.assigned_partitions.store(0, Ordering::Release);
                assigner.unassign()?;
                Ok(Vec::new())
            }
        }
    }

    pub fn assigned_partition_count(&self) -> i32 {
        self.assigned_partitions.load(Ordering::Acquire)
    }
}
