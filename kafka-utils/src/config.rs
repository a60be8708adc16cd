use std::fmt;
use std::str::FromStr;

use envconfig::Envconfig;
use rdkafka::{ClientConfig, Offset};
use tracing::debug;

use crate::partitioner::PartitionerKind;
use crate::resolve::{expand_broker_list, SystemResolver};

#[derive(Envconfig, Clone)]
pub struct ConnectionOptions {
    /// Comma separated host:port list, host names are resolved to IPv4 addresses
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_sasl: bool,

    pub kafka_sasl_username: Option<String>,

    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    pub kafka_debug: Option<String>, // librdkafka debug contexts, e.g. "broker,topic,msg"

    #[envconfig(default = "10000")]
    pub kafka_statistics_interval_ms: u32, // 0 disables statistics, and with them throttle events
}

impl ConnectionOptions {
    pub fn new(kafka_hosts: impl Into<String>) -> Self {
        Self {
            kafka_hosts: kafka_hosts.into(),
            kafka_sasl: false,
            kafka_sasl_username: None,
            kafka_sasl_password: None,
            kafka_tls: false,
            kafka_debug: None,
            kafka_statistics_interval_ms: 10000,
        }
    }

    pub fn with_sasl(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.kafka_sasl = true;
        self.kafka_sasl_username = Some(username.into());
        self.kafka_sasl_password = Some(password.into());
        self
    }

    /// Base librdkafka configuration shared by producers and consumers.
    pub fn client_config(&self) -> ClientConfig {
        let brokers = expand_broker_list(&self.kafka_hosts, &SystemResolver);

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &brokers).set(
            "statistics.interval.ms",
            self.kafka_statistics_interval_ms.to_string(),
        );

        match (self.kafka_sasl, self.kafka_tls) {
            (true, tls) => {
                client_config
                    .set(
                        "security.protocol",
                        if tls { "sasl_ssl" } else { "sasl_plaintext" },
                    )
                    .set("sasl.mechanisms", "PLAIN")
                    .set(
                        "sasl.username",
                        self.kafka_sasl_username.as_deref().unwrap_or_default(),
                    )
                    .set(
                        "sasl.password",
                        self.kafka_sasl_password.as_deref().unwrap_or_default(),
                    );
            }
            (false, true) => {
                client_config
                    .set("security.protocol", "ssl")
                    .set("enable.ssl.certificate.verification", "false");
            }
            (false, false) => {}
        }

        if let Some(debug) = self.kafka_debug.as_deref().filter(|d| !d.is_empty()) {
            client_config.set("debug", debug);
        }

        debug!("rdkafka configuration: {:?}", redacted(&client_config));
        client_config
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("kafka_hosts", &self.kafka_hosts)
            .field("kafka_sasl", &self.kafka_sasl)
            .field("kafka_sasl_username", &self.kafka_sasl_username)
            .field("kafka_tls", &self.kafka_tls)
            .field("kafka_debug", &self.kafka_debug)
            .finish_non_exhaustive()
    }
}

fn redacted(config: &ClientConfig) -> ClientConfig {
    let mut copy = config.clone();
    if copy.get("sasl.password").is_some() {
        copy.set("sasl.password", "********");
    }
    copy
}

#[derive(Envconfig, Clone, Debug)]
pub struct ProducerOptions {
    #[envconfig(nested = true)]
    pub connection: ConnectionOptions,

    #[envconfig(default = "1")]
    pub kafka_producer_workers: usize,

    #[envconfig(default = "any")]
    pub kafka_producer_partition: TargetPartition,

    pub kafka_partitioner: Option<PartitionerKind>, // librdkafka's own partitioner when unset

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
}

impl ProducerOptions {
    pub fn new(connection: ConnectionOptions) -> Self {
        Self {
            connection,
            kafka_producer_workers: 1,
            kafka_producer_partition: TargetPartition::Any,
            kafka_partitioner: None,
            kafka_message_timeout_ms: 20000,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = self.connection.client_config();
        client_config.set(
            "message.timeout.ms",
            self.kafka_message_timeout_ms.to_string(),
        );
        client_config
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerOptions {
    #[envconfig(nested = true)]
    pub connection: ConnectionOptions,

    pub kafka_consumer_group: String,

    // Unset means resume from the committed offset of each assigned partition
    pub kafka_consumer_offset: Option<StartOffset>,

    #[envconfig(default = "1")]
    pub kafka_consumer_workers: usize,
}

impl ConsumerOptions {
    pub fn new(connection: ConnectionOptions, group: impl Into<String>) -> Self {
        Self {
            connection,
            kafka_consumer_group: group.into(),
            kafka_consumer_offset: None,
            kafka_consumer_workers: 1,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = self.connection.client_config();
        client_config
            .set("group.id", &self.kafka_consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "true");
        client_config
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct SimpleConsumerOptions {
    #[envconfig(nested = true)]
    pub connection: ConnectionOptions,

    // librdkafka refuses assignments without a group; unset derives one that never commits
    pub kafka_consumer_group: Option<String>,

    pub kafka_consumer_topic: String,

    #[envconfig(default = "0")]
    pub kafka_consumer_partition: i32,

    #[envconfig(default = "stored")]
    pub kafka_consumer_offset: StartOffset,

    #[envconfig(default = "1")]
    pub kafka_consumer_workers: usize,
}

impl SimpleConsumerOptions {
    pub fn new(connection: ConnectionOptions, topic: impl Into<String>, partition: i32) -> Self {
        Self {
            connection,
            kafka_consumer_group: None,
            kafka_consumer_topic: topic.into(),
            kafka_consumer_partition: partition,
            kafka_consumer_offset: StartOffset::Stored,
            kafka_consumer_workers: 1,
        }
    }

    /// The configured group, or `kafka-utils-simple-<topic>-<partition>`.
    pub fn group_id(&self) -> String {
        match self.kafka_consumer_group.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => group.to_owned(),
            _ => format!(
                "kafka-utils-simple-{}-{}",
                self.kafka_consumer_topic, self.kafka_consumer_partition
            ),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = self.connection.client_config();
        client_config
            .set("group.id", self.group_id())
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "true");
        if self.kafka_consumer_group.is_none() {
            client_config.set("enable.auto.commit", "false");
        }
        client_config
    }
}

/// Where a consumer starts reading a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    Beginning,
    End,
    /// The group's committed offset
    Stored,
    Explicit(i64),
}

impl From<StartOffset> for Offset {
    fn from(value: StartOffset) -> Self {
        match value {
            StartOffset::Beginning => Offset::Beginning,
            StartOffset::End => Offset::End,
            StartOffset::Stored => Offset::Stored,
            StartOffset::Explicit(offset) => Offset::Offset(offset),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStartOffsetError(pub String);

impl fmt::Display for ParseStartOffsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid start offset {:?}, expected beginning, end, stored or a non-negative offset",
            self.0
        )
    }
}

impl std::error::Error for ParseStartOffsetError {}

impl FromStr for StartOffset {
    type Err = ParseStartOffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginning" | "earliest" | "smallest" => Ok(StartOffset::Beginning),
            "end" | "latest" | "largest" => Ok(StartOffset::End),
            "stored" => Ok(StartOffset::Stored),
            other => other
                .parse::<i64>()
                .ok()
                .filter(|offset| *offset >= 0)
                .map(StartOffset::Explicit)
                .ok_or_else(|| ParseStartOffsetError(s.to_owned())),
        }
    }
}

/// Partition a producer writes to: a fixed one, or whatever the partitioner picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetPartition {
    #[default]
    Any,
    Fixed(i32),
}

impl TargetPartition {
    pub fn partition(&self) -> Option<i32> {
        match self {
            TargetPartition::Any => None,
            TargetPartition::Fixed(partition) => Some(*partition),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseTargetPartitionError(pub String);

impl fmt::Display for ParseTargetPartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid partition {:?}, expected any or a non-negative partition",
            self.0
        )
    }
}

impl std::error::Error for ParseTargetPartitionError {}

impl FromStr for TargetPartition {
    type Err = ParseTargetPartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("any") {
            return Ok(TargetPartition::Any);
        }
        trimmed
            .parse::<i32>()
            .ok()
            .filter(|partition| *partition >= 0)
            .map(TargetPartition::Fixed)
            .ok_or_else(|| ParseTargetPartitionError(s.to_owned()))
    }
}
