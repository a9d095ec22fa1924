//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "tests"
//! tb_type: "source"
//! tb_scope: "test"
//! tb_description: "Context fields handlers observe under each broker flavour."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use testbus_msg::{
    handler_fn, BrokerFields, BrokerFlavor, BrokerSettings, ChannelSpec, CodecKind,
    DeliveryContext, Exchange, HandlerDeclaration, PublishOptions, TestBroker,
};

/// Handler that keeps every context it receives.
fn capturing(
    name: &str,
    spec: impl Into<ChannelSpec>,
) -> (HandlerDeclaration, Arc<Mutex<Vec<DeliveryContext>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let declaration = HandlerDeclaration::new(
        name,
        spec,
        handler_fn(move |_, context| {
            let sink = sink.clone();
            async move {
                sink.lock().push(context);
                Ok(None)
            }
        }),
    );
    (declaration, seen)
}

#[tokio::test]
async fn kafka_handler_reads_record_fields() {
    let (declaration, seen) = capturing("handle", "test-topic");
    let broker = TestBroker::builder(BrokerFlavor::Kafka)
        .declare(declaration)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    scope.publish("test-topic", "Hi!").await.unwrap();
    scope
        .publish_with(
            "test-topic",
            "Again",
            PublishOptions::new()
                .with_key("user-1")
                .with_partition(2)
                .with_header("trace-id", "abc"),
        )
        .await
        .unwrap();

    scope
        .mock("handle")
        .unwrap()
        .assert_any_call("Hi!")
        .unwrap();

    let seen = seen.lock();
    let first = &seen[0];
    assert_eq!(first.topic(), Some("test-topic"));
    assert_eq!(first.partition(), Some(0));
    assert_eq!(first.offset(), Some(0));
    assert_eq!(first.key, None);
    assert!(first.headers.is_empty());
    assert_eq!(first.correlation_id, first.message_id.to_string());
    assert_eq!(first.content_type, "application/json");

    let second = &seen[1];
    assert_eq!(second.partition(), Some(2));
    assert_eq!(second.offset(), Some(1));
    assert_eq!(second.key.as_deref(), Some("user-1"));
    assert_eq!(second.header("trace-id"), Some("abc"));
    assert_ne!(first.message_id, second.message_id);
    assert_eq!(second.exchange(), None);
}

#[tokio::test]
async fn rabbit_default_exchange_routes_by_queue_name() {
    let (declaration, seen) = capturing("handle", "test-queue");
    let broker = TestBroker::builder(BrokerFlavor::Rabbit)
        .declare(declaration)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    scope.publish("test-queue", "Hi!").await.unwrap();
    // Wildcards are literal characters on the default exchange.
    scope.publish("test-*", "nope").await.unwrap();

    scope
        .mock("handle")
        .unwrap()
        .assert_called_once_with("Hi!")
        .unwrap();
    let seen = seen.lock();
    let context = &seen[0];
    assert_eq!(
        context.broker,
        BrokerFields::Rabbit {
            exchange: String::new(),
            routing_key: "test-queue".into(),
            queue: "test-queue".into(),
        }
    );
}

#[tokio::test]
async fn rabbit_exchange_kinds() {
    let (direct, direct_seen) = capturing(
        "billing",
        ChannelSpec::new("billing-q")
            .bound_to(Exchange::direct("orders"))
            .with_binding_key("order.paid"),
    );
    let (topic, topic_seen) = capturing(
        "audit",
        ChannelSpec::new("audit-q")
            .bound_to(Exchange::topic("events"))
            .with_binding_key("order.#"),
    );
    let (fanout, fanout_seen) = capturing(
        "mirror",
        ChannelSpec::new("mirror-q").bound_to(Exchange::fanout("broadcast")),
    );
    let broker = TestBroker::builder(BrokerFlavor::Rabbit)
        .declare(direct)
        .declare(topic)
        .declare(fanout)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    let via = |exchange: &str| PublishOptions::new().with_exchange(exchange);
    scope.publish_with("order.paid", "p", via("orders")).await.unwrap();
    scope.publish_with("order.created", "c", via("orders")).await.unwrap();
    scope.publish_with("order.eu.shipped", "s", via("events")).await.unwrap();
    scope.publish_with("anything", "a", via("broadcast")).await.unwrap();
    // Same routing key on the default exchange reaches none of them.
    scope.publish("order.paid", "d").await.unwrap();

    assert_eq!(scope.mock("billing").unwrap().call_args(), vec![json!("p")]);
    assert_eq!(scope.mock("audit").unwrap().call_args(), vec![json!("s")]);
    assert_eq!(scope.mock("mirror").unwrap().call_args(), vec![json!("a")]);

    assert_eq!(direct_seen.lock()[0].exchange(), Some("orders"));
    assert_eq!(direct_seen.lock()[0].queue(), Some("billing-q"));
    assert_eq!(topic_seen.lock()[0].routing_key(), Some("order.eu.shipped"));
    assert_eq!(fanout_seen.lock()[0].routing_key(), Some("anything"));
}

#[tokio::test]
async fn nats_subjects_and_reply_to() {
    let (declaration, seen) = capturing("handle", "greet.*");
    let broker = TestBroker::builder(BrokerFlavor::Nats)
        .declare(declaration)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    scope
        .publish_with(
            "greet.joe",
            "Hi!",
            PublishOptions::new().with_reply_to("_INBOX.1"),
        )
        .await
        .unwrap();
    scope.publish("greet.joe.smith", "too deep").await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].subject(), Some("greet.joe"));
    assert_eq!(seen[0].binding, "greet.*");
    assert_eq!(
        seen[0].broker,
        BrokerFields::Nats {
            subject: "greet.joe".into(),
            reply_to: Some("_INBOX.1".into()),
        }
    );
}

#[tokio::test]
async fn memory_flavor_exposes_only_common_fields() {
    let (declaration, seen) = capturing("handle", "jobs");
    let broker = TestBroker::builder(BrokerFlavor::Memory)
        .declare(declaration)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();
    scope.publish("jobs", &json!({"id": 1})).await.unwrap();

    let seen = seen.lock();
    let context = &seen[0];
    assert_eq!(context.broker, BrokerFields::Memory);
    assert_eq!(context.topic(), None);
    assert_eq!(context.handler, "handle");
    assert_eq!(context.channel, "jobs");
}

#[tokio::test]
async fn cbor_codec_round_trips_payloads() {
    let settings = BrokerSettings {
        codec: CodecKind::Cbor,
        ..BrokerSettings::for_flavor(BrokerFlavor::Kafka)
    };
    let (declaration, seen) = capturing("handle", "test-topic");
    let broker = TestBroker::from_settings(settings)
        .declare(declaration)
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    let payload = json!({"user": "alice", "tags": ["a", "b"], "amount": 12.5});
    scope.publish("test-topic", &payload).await.unwrap();

    scope
        .mock("handle")
        .unwrap()
        .assert_called_once_with(&payload)
        .unwrap();
    assert_eq!(seen.lock()[0].content_type, "application/cbor");
    let published = scope.published_to("test-topic");
    assert_eq!(published[0].envelope.body, serde_cbor::to_vec(&payload).unwrap());
}

#[tokio::test]
async fn custom_segment_delimiter() {
    let settings = BrokerSettings {
        segment_delimiter: '/',
        ..BrokerSettings::for_flavor(BrokerFlavor::Memory)
    };
    let broker = TestBroker::from_settings(settings)
        .declare(HandlerDeclaration::new(
            "sensors",
            "site/*/temp",
            handler_fn(|_, _| async { Ok(None) }),
        ))
        .build()
        .unwrap();
    let scope = broker.open().unwrap();

    scope.publish("site/a/temp", &1).await.unwrap();
    scope.publish("site.a.temp", &2).await.unwrap();
    assert_eq!(scope.mock("sensors").unwrap().call_args(), vec![json!(1)]);
}
