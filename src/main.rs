use std::path::PathBuf;

use amqp_resilient::config;
use amqp_resilient::shutdown::{exit_process, setup_signal_handlers};
use amqp_resilient::{AmqpClient, ConsumeOptions, ConsumeOutcome, DeliveryContext};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Resilient AMQP client
#[derive(Debug, Parser)]
#[command(name = "amqp-resilient")]
#[command(about = "Declare, publish, fetch and consume against a RabbitMQ broker")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to amqp-resilient.json lookup, then the environment)
    #[arg(short, long, value_name = "FILE", env = "AMQP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Declare a queue
    Declare {
        queue: String,
        /// Survive broker restarts
        #[arg(long)]
        durable: bool,
    },
    /// Publish one message
    Publish {
        routing_key: String,
        message: String,
        /// Target exchange; the default exchange when omitted
        #[arg(default_value = "")]
        exchange: String,
    },
    /// Fetch and acknowledge a single message
    Get { queue: String },
    /// Consume until interrupted
    Consume {
        queue: String,
        /// Overrides the configured prefetch count
        #[arg(long)]
        prefetch: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path),
        None => config::load(),
    }
    .context("Failed to load AMQP configuration")?;
    let mut client = AmqpClient::from_config(config);

    match cli.command {
        Commands::Declare { queue, durable } => {
            client.queue_declare(&queue, durable).await?;
        }
        Commands::Publish {
            routing_key,
            message,
            exchange,
        } => {
            client
                .send_message(&routing_key, message.as_bytes(), &exchange)
                .await?;
        }
        Commands::Get { queue } => match client.get_message(&queue).await? {
            Some(message) => println!("{}", String::from_utf8_lossy(&message.body)),
            None => info!("Queue is empty"),
        },
        Commands::Consume { queue, prefetch } => {
            setup_signal_handlers(client.handle(), exit_process);

            let options = ConsumeOptions {
                qos_count: prefetch.unwrap_or(client.config().prefetch_count),
                ..ConsumeOptions::default()
            };
            let outcome = client.consume(&queue, print_and_ack, options).await;
            if let ConsumeOutcome::Failed(err) = outcome {
                error!("Consumer stopped: {}", err);
                client.close().await;
                return Err(err.into());
            }
        }
    }

    client.close().await;
    Ok(())
}

async fn print_and_ack(delivery: DeliveryContext) {
    println!(
        "[{}] {}",
        delivery.delivery_tag(),
        String::from_utf8_lossy(&delivery.body)
    );
    if let Err(err) = delivery.ack() {
        error!("Failed to acknowledge message: {}", err);
    }
}
