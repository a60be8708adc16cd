use rdkafka::error::RDKafkaErrorCode;
use rdkafka::metadata::{Metadata, MetadataBroker, MetadataPartition, MetadataTopic};
use serde::Serialize;

/// Owned snapshot of the cluster as seen by one broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterMetadata {
    pub orig_broker_id: i32,
    pub orig_broker_name: String,
    pub brokers: Vec<BrokerInfo>,
    pub topics: Vec<TopicInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicInfo> {
        self.topics.iter().find(|topic| topic.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl TopicInfo {
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

impl From<&Metadata> for ClusterMetadata {
    fn from(metadata: &Metadata) -> Self {
        Self {
            orig_broker_id: metadata.orig_broker_id(),
            orig_broker_name: metadata.orig_broker_name().to_owned(),
            brokers: metadata.brokers().iter().map(BrokerInfo::from).collect(),
            topics: metadata.topics().iter().map(TopicInfo::from).collect(),
        }
    }
}

impl From<&MetadataBroker> for BrokerInfo {
    fn from(broker: &MetadataBroker) -> Self {
        Self {
            id: broker.id(),
            host: broker.host().to_owned(),
            port: broker.port(),
        }
    }
}

impl From<&MetadataTopic> for TopicInfo {
    fn from(topic: &MetadataTopic) -> Self {
        Self {
            name: topic.name().to_owned(),
            partitions: topic.partitions().iter().map(PartitionInfo::from).collect(),
            error: topic
                .error()
                .map(|e| RDKafkaErrorCode::from(e).to_string()),
        }
    }
}

impl From<&MetadataPartition> for PartitionInfo {
    fn from(partition: &MetadataPartition) -> Self {
        Self {
            id: partition.id(),
            leader: partition.leader(),
            replicas: partition.replicas().to_vec(),
            isr: partition.isr().to_vec(),
            error: partition
                .error()
                .map(|e| RDKafkaErrorCode::from(e).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn snapshot() -> ClusterMetadata {
        ClusterMetadata {
            orig_broker_id: 1,
            orig_broker_name: "localhost:9092/1".to_string(),
            brokers: vec![BrokerInfo {
                id: 1,
                host: "localhost".to_string(),
                port: 9092,
            }],
            topics: vec![
                TopicInfo {
                    name: "events".to_string(),
                    partitions: (0..2)
                        .map(|id| PartitionInfo {
                            id,
                            leader: 1,
                            replicas: vec![1],
                            isr: vec![1],
                            error: None,
                        })
                        .collect(),
                    error: None,
                },
                TopicInfo {
                    name: "missing".to_string(),
                    partitions: vec![],
                    error: Some("Broker: Unknown topic or partition".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_metadata_json_shape() {
        let serialized: serde_json::Value =
            serde_json::from_str(&snapshot().to_json().unwrap()).unwrap();

        assert_json_eq!(
            serialized,
            json!({
                "orig_broker_id": 1,
                "orig_broker_name": "localhost:9092/1",
                "brokers": [{"id": 1, "host": "localhost", "port": 9092}],
                "topics": [
                    {
                        "name": "events",
                        "partitions": [
                            {"id": 0, "leader": 1, "replicas": [1], "isr": [1]},
                            {"id": 1, "leader": 1, "replicas": [1], "isr": [1]}
                        ]
                    },
                    {
                        "name": "missing",
                        "partitions": [],
                        "error": "Broker: Unknown topic or partition"
                    }
                ]
            })
        );
    }

    #[test]
    fn test_topic_lookup() {
        let metadata = snapshot();
        assert_eq!(metadata.topic("events").map(TopicInfo::partition_count), Some(2));
        assert!(metadata.topic("nope").is_none());
    }
}
