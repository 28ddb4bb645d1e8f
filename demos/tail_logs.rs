//! Tails a log stream and prints each entry.
//!
//! ```text
//! cargo run --example tail_logs -- ws://localhost:5002/ws/logs
//! ```

use std::error::Error;
use std::time::Duration;

use logstream_sdk::stream::client::DEFAULT_LOG_STREAM_ENDPOINT;
use logstream_sdk::{EventKind, LogStreamClient, StreamConfig, StreamEvent};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_LOG_STREAM_ENDPOINT.to_string());
    let config = StreamConfig::new(url).with_reconnect_delay(Duration::from_secs(3));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tail(config))
}

async fn tail(config: StreamConfig) -> Result<(), Box<dyn Error>> {
    let client = LogStreamClient::builder(config).build()?;
    client.subscribe(EventKind::Message, |event| {
        let StreamEvent::Message(entry) = event else {
            return;
        };
        match entry.as_log_record() {
            Some(record) => {
                let timestamp = match record.timestamp.as_str() {
                    Some(text) => text.to_string(),
                    None => record.timestamp.to_string(),
                };
                println!(
                    "{timestamp} [{}] {}",
                    record.module.to_uppercase(),
                    record.message
                );
            }
            None => match entry.as_raw() {
                Some(text) => println!("{text}"),
                None => println!("{}", entry.as_value().map(ToString::to_string).unwrap_or_default()),
            },
        }
    });
    client.subscribe(EventKind::Error, |event| {
        if let StreamEvent::Error(error) = event {
            eprintln!("stream error: {error}");
        }
    });
    client.connect();

    tokio::signal::ctrl_c().await?;
    client.disconnect();
    Ok(())
}
