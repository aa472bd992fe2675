//! Integration tests for k2k-core.
//!
//! The pipeline tests drive the engine through the in-memory source and
//! sinks. The Kafka round-trip requires Docker and is marked #[ignore].
//!
//! Run with: cargo test --test integration_tests -- --ignored

use k2k_core::engine::{PipelineEngine, PipelineEngineBuilder, PipelineSettings};
use k2k_core::kafka::memory::{InMemorySink, InMemorySource};
use k2k_core::kafka::{KafkaMessage, PollResult};
use k2k_core::processing::{TimestampNormalizer, Zone};
use k2k_core::router::{DLQ_DETAIL_HEADER, DLQ_REASON_HEADER};
use k2k_core::{Error, KafkaError, ProcessingOutcome, RecordError, Schema};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const USER_LOGIN_SCHEMA: &str = r#"{
    "type": "record",
    "name": "UserLogin",
    "fields": [
        {"name": "user_id", "type": "string"},
        {"name": "app_version", "type": "string"},
        {"name": "ip", "type": "string"},
        {"name": "locale", "type": "string"},
        {"name": "device_id", "type": "string"},
        {"name": "timestamp", "type": "long"},
        {"name": "device_type", "type": "string"}
    ]
}"#;

const LOGIN: &str = r#"{"user_id":"123","app_version":"1.0.0","ip":"1.2.3.4","locale":"NE","device_id":"d1","timestamp":1742331926,"device_type":"android"}"#;

const INPUT_TOPIC: &str = "user-login";
const OUTPUT_TOPIC: &str = "user-login-processed";
const DLQ_TOPIC: &str = "user-login-dlq";

fn schema() -> Schema {
    Schema::from_json_str(USER_LOGIN_SCHEMA).expect("schema parses")
}

struct Pipeline {
    source: Arc<InMemorySource>,
    output: Arc<InMemorySink>,
    dlq: Arc<InMemorySink>,
    engine: PipelineEngine,
}

fn pipeline(source: InMemorySource) -> Pipeline {
    let source = Arc::new(source);
    let output = Arc::new(InMemorySink::new());
    let dlq = Arc::new(InMemorySink::new());

    let engine = PipelineEngineBuilder::new(schema())
        .source(source.clone())
        .sinks(output.clone(), dlq.clone())
        .topics(OUTPUT_TOPIC, DLQ_TOPIC)
        .transform(Box::new(TimestampNormalizer::new(
            "timestamp",
            Zone::parse(Some("America/Los_Angeles")).expect("known zone"),
        )))
        .settings(PipelineSettings {
            poll_timeout: Duration::from_millis(5),
            shutdown_timeout: Duration::from_secs(1),
            ..PipelineSettings::default()
        })
        .build()
        .expect("pipeline builds");

    Pipeline {
        source,
        output,
        dlq,
        engine,
    }
}

fn payload_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("payload is JSON")
}

mod pipeline_scenarios {
    use super::*;

    #[tokio::test]
    async fn test_valid_login_is_forwarded_with_formatted_timestamp() {
        let mut p = pipeline(InMemorySource::new());
        let message = KafkaMessage::with_value(INPUT_TOPIC, 0, 0, LOGIN.as_bytes());

        let outcome = p.engine.handle_message(&message).await;
        assert_eq!(outcome, ProcessingOutcome::Forwarded);

        let sent = p.output.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, OUTPUT_TOPIC);
        assert_eq!(
            payload_json(&sent[0].payload),
            json!({
                "user_id": "123",
                "app_version": "1.0.0",
                "ip": "1.2.3.4",
                "locale": "NE",
                "device_id": "d1",
                "timestamp": "2025-03-18 14:05:26",
                "device_type": "android"
            })
        );
        assert!(p.dlq.is_empty());
        assert_eq!(p.engine.stats().forwarded(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_login_is_dead_lettered() {
        let mut p = pipeline(InMemorySource::new());
        let raw = br#"{"user_id":"123"}"#;
        let message = KafkaMessage::with_value(INPUT_TOPIC, 0, 0, raw);

        let outcome = p.engine.handle_message(&message).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::DeadLettered(RecordError::MissingFields(_))
        ));

        assert!(p.output.is_empty());
        let sent = p.dlq.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, DLQ_TOPIC);
        assert_eq!(sent[0].payload, raw.to_vec());
        assert_eq!(
            sent[0].header(DLQ_REASON_HEADER),
            Some("missing required fields")
        );
        let detail = sent[0].header(DLQ_DETAIL_HEADER).unwrap_or_default();
        for field in ["app_version", "ip", "locale", "device_id", "timestamp", "device_type"] {
            assert!(detail.contains(field), "detail {detail:?} should name {field}");
        }
        assert_eq!(p.engine.stats().forwarded(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_payload_is_dead_lettered() {
        let mut p = pipeline(InMemorySource::new());
        let raw = b"not json at all";
        let message = KafkaMessage::with_value(INPUT_TOPIC, 0, 0, raw);

        let outcome = p.engine.handle_message(&message).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::DeadLettered(RecordError::Deserialization(_))
        ));

        assert!(p.output.is_empty());
        let sent = p.dlq.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, raw.to_vec());
        assert_eq!(
            sent[0].header(DLQ_REASON_HEADER),
            Some("deserialization error")
        );
    }

    #[tokio::test]
    async fn test_wrong_type_is_dead_lettered_as_validation_failure() {
        let mut p = pipeline(InMemorySource::new());
        let raw = LOGIN.replace(r#""user_id":"123""#, r#""user_id":123"#);
        let message = KafkaMessage::with_value(INPUT_TOPIC, 0, 0, raw.as_bytes());

        let outcome = p.engine.handle_message(&message).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::DeadLettered(RecordError::Validation(_))
        ));
        assert_eq!(
            p.dlq.sent()[0].header(DLQ_REASON_HEADER),
            Some("schema validation failed")
        );
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_uses_sentinel() {
        let mut p = pipeline(InMemorySource::new());
        let raw = LOGIN.replace("1742331926", "9223372036854775807");
        let message = KafkaMessage::with_value(INPUT_TOPIC, 0, 0, raw.as_bytes());

        let outcome = p.engine.handle_message(&message).await;
        assert_eq!(outcome, ProcessingOutcome::Forwarded);
        assert_eq!(
            payload_json(&p.output.sent()[0].payload)["timestamp"],
            "1970-01-01 00:00:00"
        );
    }
}

mod pipeline_loop {
    use super::*;

    /// Every message lands on exactly one channel and every offset is committed.
    #[tokio::test]
    async fn test_mixed_stream_routes_each_message_once() {
        let payloads: Vec<String> = (0..25)
            .map(|i| match i % 5 {
                0 => r#"{"user_id":"only"}"#.to_string(),
                1 => "{broken".to_string(),
                _ => LOGIN.replace(r#""device_id":"d1""#, &format!(r#""device_id":"d{i}""#)),
            })
            .collect();

        let mut p = pipeline(InMemorySource::from_payloads(INPUT_TOPIC, &payloads));

        let result = p.engine.run().await;
        assert!(matches!(
            result,
            Err(Error::Kafka(KafkaError::ConsumerClosed))
        ));

        assert_eq!(p.output.len(), 15);
        assert_eq!(p.dlq.len(), 10);
        assert_eq!(p.engine.stats().forwarded(), 15);

        let committed = p.source.committed();
        assert_eq!(committed.len(), 25);
        assert_eq!(committed.last(), Some(&(INPUT_TOPIC.to_string(), 0, 24)));

        let metrics = p.engine.metrics();
        assert_eq!(metrics.messages_consumed(), 25);
        assert_eq!(metrics.records_forwarded(), 15);
        assert_eq!(metrics.records_dead_lettered("missing required fields"), 5);
        assert_eq!(metrics.records_dead_lettered("deserialization error"), 5);

        assert!(p.source.is_closed());
        assert_eq!(p.output.flush_count(), 1);
        assert_eq!(p.dlq.flush_count(), 1);
        assert!(!p.engine.health().is_pipeline_running());
    }

    #[tokio::test]
    async fn test_transport_events_do_not_stop_the_loop() {
        let source = InMemorySource::new().idle_when_drained();
        source.push(PollResult::PartitionEof { partition: 0 });
        source.push(PollResult::Error {
            error: Error::Kafka(KafkaError::ConsumerGroup("rebalance".into())),
            backoff: Duration::from_millis(1),
            should_retry: true,
        });
        source.push_message(KafkaMessage::with_value(INPUT_TOPIC, 0, 7, LOGIN.as_bytes()));

        let mut p = pipeline(source);
        let shutdown = p.engine.shutdown_signal();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown.send(());
        });

        p.engine.run().await.expect("clean shutdown");
        stopper.await.expect("stopper task");

        assert_eq!(p.output.len(), 1);
        assert_eq!(p.engine.metrics().partition_eofs(), 1);
        assert_eq!(p.engine.metrics().poll_errors(), 1);
        assert_eq!(p.source.committed(), vec![(INPUT_TOPIC.to_string(), 0, 7)]);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_commits_and_counts() {
        let source = Arc::new(InMemorySource::new());
        let output = Arc::new(InMemorySink::failing());
        let dlq = Arc::new(InMemorySink::new());

        let mut engine = PipelineEngineBuilder::new(schema())
            .source(source.clone())
            .sinks(output, dlq.clone())
            .build()
            .expect("pipeline builds");

        let message = KafkaMessage::with_value(INPUT_TOPIC, 2, 40, LOGIN.as_bytes());
        let outcome = engine.handle_message(&message).await;

        assert_eq!(outcome, ProcessingOutcome::Forwarded);
        assert_eq!(engine.stats().forwarded(), 1);
        assert!(dlq.is_empty());
        assert_eq!(source.committed(), vec![(INPUT_TOPIC.to_string(), 2, 40)]);
    }
}

mod schema_file {
    use super::*;
    use k2k_core::schema::{FileSchemaProvider, SchemaProvider};

    #[tokio::test]
    async fn test_file_provider_feeds_the_pipeline() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("user-login.avsc");
        std::fs::write(&path, USER_LOGIN_SCHEMA).expect("write schema");

        let provider = FileSchemaProvider::new(path);
        let loaded = provider
            .latest_schema("user-login-value")
            .await
            .expect("schema loads");
        assert_eq!(loaded, schema());
        assert_eq!(loaded.len(), 7);
    }

    #[tokio::test]
    async fn test_missing_schema_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let provider = FileSchemaProvider::new(dir.path().join("absent.avsc"));
        assert!(provider.latest_schema("user-login-value").await.is_err());
    }
}

mod kafka_integration {
    use super::*;
    use k2k_core::Config;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::client::DefaultClientContext;
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::message::{Headers, Message};
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::kafka::Kafka;

    async fn next_payload(consumer: &StreamConsumer) -> (Vec<u8>, Option<String>) {
        let message = tokio::time::timeout(Duration::from_secs(30), consumer.recv())
            .await
            .expect("message within timeout")
            .expect("consume succeeds");

        let reason = message.headers().and_then(|headers| {
            (0..headers.count())
                .map(|i| headers.get(i))
                .find(|header| header.key == DLQ_REASON_HEADER)
                .and_then(|header| header.value)
                .map(|value| String::from_utf8_lossy(value).into_owned())
        });
        (message.payload().unwrap_or_default().to_vec(), reason)
    }

    fn reader(bootstrap_servers: &str, topic: &str) -> StreamConsumer {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", format!("reader-{topic}"))
            .set("auto.offset.reset", "earliest")
            .create()
            .expect("Failed to create reader");
        consumer.subscribe(&[topic]).expect("Failed to subscribe");
        consumer
    }

    /// Produce one valid and one incomplete login and read both back.
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_round_trip_through_kafka() {
        let kafka = Kafka::default()
            .start()
            .await
            .expect("Failed to start Kafka container");
        let bootstrap_servers = format!(
            "127.0.0.1:{}",
            kafka
                .get_host_port_ipv4(9093)
                .await
                .expect("Failed to get Kafka port")
        );

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .create()
            .expect("Failed to create admin client");
        let topics: Vec<NewTopic> = [INPUT_TOPIC, OUTPUT_TOPIC, DLQ_TOPIC]
            .iter()
            .map(|name| NewTopic::new(name, 1, TopicReplication::Fixed(1)))
            .collect();
        admin
            .create_topics(&topics, &AdminOptions::new())
            .await
            .expect("Failed to create topics");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .expect("Failed to create producer");
        for payload in [LOGIN, r#"{"user_id":"123"}"#] {
            producer
                .send(
                    FutureRecord::<(), _>::to(INPUT_TOPIC).payload(payload),
                    Duration::from_secs(5),
                )
                .await
                .expect("Failed to produce message");
        }

        let dir = tempfile::tempdir().expect("temp dir");
        let schema_path = dir.path().join("user-login.avsc");
        std::fs::write(&schema_path, USER_LOGIN_SCHEMA).expect("write schema");

        let mut config = Config::default();
        config.kafka.bootstrap_servers = vec![bootstrap_servers.clone()];
        config.kafka.input_topic = INPUT_TOPIC.into();
        config.kafka.output_topic = OUTPUT_TOPIC.into();
        config.kafka.dlq_topic = DLQ_TOPIC.into();
        config.schema_registry.schema_file = Some(schema_path);
        config.pipeline.timezone = Some("America/Los_Angeles".into());

        let mut engine = PipelineEngine::connect(config)
            .await
            .expect("Failed to connect pipeline");
        let shutdown = engine.shutdown_signal();
        let running = tokio::spawn(async move { engine.run().await });

        let output = reader(&bootstrap_servers, OUTPUT_TOPIC);
        let (payload, _) = next_payload(&output).await;
        assert_eq!(payload_json(&payload)["timestamp"], "2025-03-18 14:05:26");

        let dlq = reader(&bootstrap_servers, DLQ_TOPIC);
        let (payload, reason) = next_payload(&dlq).await;
        assert_eq!(payload, br#"{"user_id":"123"}"#.to_vec());
        assert_eq!(reason.as_deref(), Some("missing required fields"));

        let _ = shutdown.send(());
        running
            .await
            .expect("pipeline task")
            .expect("clean shutdown");
    }
}
