// Test harness subscriber: registers generated subscriptions, consumes
// notifications and reports delivery latency.
use anyhow::{Context, Result};
use clap::Parser;
use souk_client::Subscriber;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "subscriber")]
#[command(about = "Test harness subscriber for the souk event overlay")]
struct Args {
    /// Subscriber ID
    #[arg(long, default_value = "sub-1")]
    id: String,

    /// Broker management address (host:port)
    #[arg(long, default_value = "127.0.0.1:6554")]
    management: String,

    /// Broker subscriber-egress address (host:port)
    #[arg(long, default_value = "127.0.0.1:5554")]
    egress: String,

    /// Number of simple subscriptions to register
    #[arg(long, default_value = "5")]
    simple: usize,

    /// Number of complex (windowed) subscriptions to register
    #[arg(long, default_value = "2")]
    complex: usize,

    /// Matcher-throughput mode: register this many subscriptions with the
    /// given equality ratio instead of the normal mix
    #[arg(long, default_value = "0")]
    test_equality: usize,

    /// Fraction of conditions using EQ in matcher-throughput mode (0-1)
    #[arg(long, default_value = "1.0")]
    equality_ratio: f64,

    /// Run duration in seconds (0 = until interrupted)
    #[arg(long, default_value = "0")]
    duration: u64,
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
        management = %args.management,
        egress = %args.egress,
        "starting subscriber"
    );

    let mut subscriber = Subscriber::connect(args.id.clone(), args.management, args.egress)
        .await
        .context("connect to broker")?;

    if args.test_equality > 0 {
        let ids = subscriber
            .subscribe_with_equality_ratio(args.test_equality, args.equality_ratio)
            .await
            .context("register equality-ratio subscriptions")?;
        info!(
            id = %args.id,
            registered = ids.len(),
            equality_ratio = args.equality_ratio,
            "matcher-throughput subscriptions registered"
        );
    } else {
        subscriber
            .subscribe_simple(args.simple)
            .await
            .context("register simple subscriptions")?;
        subscriber
            .subscribe_complex(args.complex)
            .await
            .context("register complex subscriptions")?;
        info!(
            id = %args.id,
            simple = args.simple,
            complex = args.complex,
            "subscriptions registered"
        );
    }

    let stats = subscriber.stats();
    let reporter = {
        let stats = std::sync::Arc::clone(&stats);
        let id = args.id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    id = %id,
                    received = stats.received(),
                    simple = stats.simple(),
                    complex = stats.complex(),
                    avg_latency_ms = stats.average_latency_ms().unwrap_or(0.0),
                    "subscriber stats"
                );
            }
        })
    };

    let consume = async {
        while let Some(notification) = subscriber.next_notification().await {
            tracing::debug!(
                notification_id = %notification.notification_id,
                subscription_id = %notification.subscription_id,
                "notification received"
            );
        }
    };

    if args.duration > 0 {
        let _ = tokio::time::timeout(Duration::from_secs(args.duration), consume).await;
    } else {
        tokio::select! {
            _ = consume => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    reporter.abort();

    info!(
        id = %args.id,
        received = stats.received(),
        simple = stats.simple(),
        complex = stats.complex(),
        avg_latency_ms = stats.average_latency_ms().unwrap_or(0.0),
        "subscriber completed"
    );
    Ok(())
}
