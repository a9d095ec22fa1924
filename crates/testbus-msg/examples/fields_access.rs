//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "example"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Handlers reading broker context fields under Kafka and RabbitMQ."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use testbus_common::{init_tracing, LoggingConfig};
use testbus_msg::{handler_fn, BrokerFlavor, TestBroker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&LoggingConfig::default())?;

    // Kafka: the handler reads the topic and offset of the consumed record.
    let kafka = TestBroker::builder(BrokerFlavor::Kafka)
        .subscriber(
            "handle",
            "test-topic",
            handler_fn(|payload, context| async move {
                println!(
                    "kafka  topic={} offset={} payload={}",
                    context.topic().unwrap_or_default(),
                    context.offset().unwrap_or_default(),
                    payload
                );
                Ok(None)
            }),
        )
        .build()?;

    kafka
        .run(|scope| async move {
            scope.publish("test-topic", "Hi!").await?;
            scope.mock("handle")?.assert_called_once_with("Hi!")?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    // RabbitMQ: the handler reads the queue and routing key of the delivery.
    let rabbit = TestBroker::builder(BrokerFlavor::Rabbit)
        .subscriber(
            "handle",
            "test-queue",
            handler_fn(|payload, context| async move {
                println!(
                    "rabbit queue={} routing_key={} payload={}",
                    context.queue().unwrap_or_default(),
                    context.routing_key().unwrap_or_default(),
                    payload
                );
                Ok(None)
            }),
        )
        .build()?;

    rabbit
        .run(|scope| async move {
            scope.publish("test-queue", "Hi!").await?;
            scope.mock("handle")?.assert_called_once_with("Hi!")?;
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    println!("both handlers were called once with \"Hi!\"");
    Ok(())
}
