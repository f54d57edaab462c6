use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use events::Event;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stream_client::resolver::{ResolverConfig, RunContext};
use stream_client::{
    connect_with, ClientConfig, EndpointResolver, EventDispatcher, EventSourceConnector, WILDCARD,
};
use tokio::sync::broadcast::error::RecvError;

mod output;

#[derive(Parser)]
#[command(name = "stream-listen")]
#[command(about = "Subscribe to or publish on a stream relay")]
struct Cli {
    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect with endpoint discovery and print every event received
    Listen(ListenArgs),
    /// Broadcast one event through a relay
    Publish(PublishArgs),
}

#[derive(Args)]
struct ListenArgs {
    /// Primary stream endpoint (e.g., https://relay.example.com/events)
    #[arg(long, env = "STREAM_PRIMARY_URL")]
    primary: Option<String>,

    /// Extra endpoints tried after every other candidate
    #[arg(long = "fallback", env = "STREAM_FALLBACK_URLS", value_delimiter = ',')]
    fallbacks: Vec<String>,

    /// Path of the stream endpoint on the relay
    #[arg(long, default_value = "/events")]
    stream_path: String,

    /// The client's own origin, used to pick the endpoint order
    #[arg(long, env = "STREAM_ORIGIN")]
    origin: Option<String>,

    /// Relay port when reached over loopback
    #[arg(long, default_value_t = 4000)]
    loopback_port: u16,

    /// Extra request header as NAME:VALUE (e.g., an auth token)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Only print these event types (default: all)
    #[arg(long = "only")]
    only: Vec<String>,

    #[arg(long, default_value_t = 3)]
    max_retry_cycles: u32,

    /// Seconds of silence before an open stream is considered dead (0 disables)
    #[arg(long, default_value_t = 30)]
    liveness_secs: u64,
}

#[derive(Args)]
struct PublishArgs {
    /// Base URL of the relay
    #[arg(long, env = "STREAM_SERVER", default_value = "http://localhost:4000")]
    server: String,

    /// Event type
    #[arg(long = "type")]
    event_type: String,

    /// JSON payload
    #[arg(long, default_value = "null")]
    data: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    data: Delivery,
}

#[derive(Deserialize)]
struct Delivery {
    delivered: u64,
    failed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Command::Listen(args) => listen(args).await,
        Command::Publish(args) => publish(args).await,
    }
}

async fn listen(args: ListenArgs) -> Result<()> {
    let context = match args.origin {
        Some(origin) => RunContext::with_origin(origin),
        None => RunContext::default(),
    };
    let resolver_config = ResolverConfig {
        primary: args.primary,
        fallbacks: args.fallbacks,
        loopback_port: args.loopback_port,
        stream_path: args.stream_path,
        ..ResolverConfig::default()
    };
    resolver_config.validate()?;
    let resolver = EndpointResolver::new(context, resolver_config);

    let connector = args
        .headers
        .into_iter()
        .fold(EventSourceConnector::new(), |connector, (name, value)| {
            connector.with_header(name, value)
        });

    let liveness = (args.liveness_secs > 0).then(|| Duration::from_secs(args.liveness_secs));
    let config = ClientConfig::default()
        .with_max_retry_cycles(args.max_retry_cycles)
        .with_liveness_timeout(liveness);

    let (dispatcher, mut diagnostics) = EventDispatcher::with_diagnostics();
    let print = |event: &Event| -> Result<()> {
        output::print_event(event);
        Ok(())
    };
    if args.only.is_empty() {
        dispatcher.subscribe(WILDCARD, print);
    } else {
        for event_type in args.only {
            dispatcher.subscribe(event_type, print);
        }
    }

    println!("{}", "=== LISTENING ===".bright_white().bold());
    let subscription = connect_with(resolver, connector, config, Arc::new(dispatcher));
    let mut transitions = subscription.transitions();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            transition = transitions.recv() => match transition {
                Ok(state) => output::print_transition(&state),
                Err(RecvError::Lagged(skipped)) => log::warn!("Missed {skipped} transitions"),
                Err(RecvError::Closed) => break,
            },
            Some(diagnostic) = diagnostics.recv() => {
                println!("{} {}", "!".red().bold(), diagnostic.to_string().dimmed());
            }
        }
    }

    subscription.close();
    subscription.join().await;
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header {raw:?} is not NAME:VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header {raw:?} has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

async fn publish(args: PublishArgs) -> Result<()> {
    let data: Value = serde_json::from_str(&args.data).context("--data is not valid JSON")?;
    let url = format!("{}/events", args.server.trim_end_matches('/'));

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "type": args.event_type, "data": data }))
        .send()
        .await
        .context("Failed to reach relay")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to publish event: {}", response.status());
    }

    let body: PublishResponse = response.json().await.context("Failed to parse response")?;
    output::print_report(body.data.delivered, body.data.failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_flags() {
        let cli = Cli::try_parse_from([
            "stream-listen",
            "listen",
            "--primary",
            "https://relay.example.com/events",
            "--fallback",
            "https://a.example.com/events,https://b.example.com/events",
            "--stream-path",
            "/stream",
            "--header",
            "Authorization: Bearer abc",
        ])
        .unwrap();

        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.primary.as_deref(), Some("https://relay.example.com/events"));
        assert_eq!(args.fallbacks.len(), 2);
        assert_eq!(args.stream_path, "/stream");
        assert_eq!(
            args.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn test_header_without_separator_is_rejected() {
        assert!(parse_header("Authorization").is_err());
        assert!(parse_header(": value").is_err());
    }
}
