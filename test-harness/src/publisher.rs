// Test harness publisher: generates random e-commerce events and
// publishes them to a broker at a configured rate.
use anyhow::{Context, Result};
use clap::Parser;
use souk_client::{EventGenerator, Publisher};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(about = "Test harness publisher for the souk event overlay")]
struct Args {
    /// Broker publisher-ingress address (host:port)
    #[arg(long, default_value = "127.0.0.1:5557")]
    broker: String,

    /// Events per second (0 = unthrottled)
    #[arg(long, default_value = "100")]
    rate: u64,

    /// Total number of events to publish (0 = unlimited)
    #[arg(long, default_value = "0")]
    count: u64,

    /// RNG seed for a reproducible event stream
    #[arg(long)]
    seed: Option<u64>,

    /// Publisher ID for logging
    #[arg(long, default_value = "pub-1")]
    id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        id = %args.id,
        broker = %args.broker,
        rate = args.rate,
        count = args.count,
        "starting publisher"
    );

    let mut publisher = Publisher::connect(&args.broker)
        .await
        .context("connect to broker")?;
    let mut generator = EventGenerator::new(args.seed);

    let delay = (args.rate > 0).then(|| Duration::from_micros(1_000_000 / args.rate));
    let start_time = Instant::now();
    let mut published = 0u64;
    let mut errors = 0u64;

    loop {
        if args.count > 0 && published >= args.count {
            break;
        }

        match publisher.publish(generator.random_event()).await {
            Ok(()) => {
                published += 1;
                if published % 1000 == 0 {
                    let elapsed = start_time.elapsed();
                    let rate = published as f64 / elapsed.as_secs_f64();
                    info!(
                        id = %args.id,
                        published,
                        errors,
                        rate = format!("{rate:.2}"),
                        "publishing progress"
                    );
                }
            }
            Err(err) => {
                // No retries: the event is dropped and counted.
                errors += 1;
                if errors % 100 == 1 {
                    error!(id = %args.id, error = %err, errors, "publish error");
                }
            }
        }

        if let Some(delay) = delay {
            sleep(delay).await;
        }
    }

    let elapsed = start_time.elapsed();
    let rate = published as f64 / elapsed.as_secs_f64();
    let stats = publisher.stats();
    info!(
        id = %args.id,
        published = stats.published,
        send_errors = stats.send_errors,
        elapsed = format!("{:.2}s", elapsed.as_secs_f64()),
        rate = format!("{rate:.2} events/s"),
        "publisher completed"
    );

    Ok(())
}
