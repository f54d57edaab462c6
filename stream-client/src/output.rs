use colored::*;
use events::{reserved, Event};
use stream_client::ConnectionState;

pub fn print_event(event: &Event) {
    let event_type = if reserved::is_quiet(event.event_type()) {
        event.event_type().dimmed()
    } else {
        event.event_type().yellow()
    };

    println!(
        "\n[{}] {} event received",
        event.timestamp().format("%H:%M:%S").to_string().bright_blue(),
        event_type
    );

    if let Ok(pretty) = serde_json::to_string_pretty(event.data()) {
        println!("   {}", pretty.dimmed());
    }
}

pub fn print_transition(state: &ConnectionState) {
    let line = match state {
        ConnectionState::Idle => "idle".normal(),
        ConnectionState::Connecting {
            endpoint,
            retry_cycle,
            ..
        } => format!("connecting to {endpoint} (cycle {retry_cycle})").blue(),
        ConnectionState::Open { endpoint } => format!("connected to {endpoint}").green().bold(),
        ConnectionState::EndpointFailed {
            endpoint, reason, ..
        } => format!("{endpoint} failed: {reason}").red(),
        ConnectionState::CycleExhausted { retry_cycle } => {
            format!("all endpoints failed ({retry_cycle} cycle(s))").red()
        }
        ConnectionState::Backoff { .. } => "backing off".magenta(),
        ConnectionState::Stopped => "stopped".normal(),
    };
    println!("{} {}", "→".blue(), line);
}

pub fn print_report(delivered: u64, failed: u64) {
    println!(
        "{}: {} delivered, {} failed",
        "Broadcast".bold(),
        delivered.to_string().green(),
        failed.to_string().red()
    );
}
