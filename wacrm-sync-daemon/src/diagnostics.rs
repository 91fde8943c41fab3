//! Diagnostics and Debug Logging
//!
//! Command-line interface, logging setup and the one-shot diagnostic commands
//! used to inspect a gateway session without running the daemon.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};
use wacrm_sync_core::{Conversation, DeliveryState, Direction, Message, StatusResponse};

/// WhatsApp CRM sync daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "wacrm-syncd")]
#[command(about = "Keeps a WhatsApp CRM gateway session and its conversations in sync", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Omit timestamps from log lines (e.g. when journald adds its own)
    #[arg(long = "no-timestamps", action = ArgAction::SetFalse)]
    pub timestamps: bool,

    /// Configuration file (defaults to ~/.config/wacrm-sync/daemon.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// Diagnostic commands for troubleshooting
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show the gateway session status
    Status,

    /// List conversations
    Conversations {
        /// Include archived conversations
        #[arg(long)]
        all: bool,
    },

    /// Print the history of a conversation
    History {
        /// Conversation ID
        conversation_id: String,

        /// Number of pages to load, the most recent one included
        #[arg(short, long, default_value = "1")]
        pages: usize,
    },

    /// Send a text message
    Send {
        /// Conversation ID
        conversation_id: String,

        /// Message text
        body: String,
    },

    /// Stop the gateway session
    Stop {
        /// Stop even if the session is paired to a phone
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    DumpConfig {
        /// Show the API token
        #[arg(long)]
        show_sensitive: bool,
    },
}

/// Crates whose chatter is capped at `warn` below trace level
const QUIET_TARGETS: [&str; 4] = ["hyper", "reqwest", "tungstenite", "tokio_tungstenite"];

/// Filter directives for `level`: our crates at `level`, HTTP and WebSocket
/// plumbing capped at `warn` unless tracing
fn log_directives(level: Level) -> String {
    let mut directives = vec![
        "warn".to_string(),
        format!("wacrm_sync_core={}", level),
        format!("wacrm_syncd={}", level),
    ];
    if level == Level::TRACE {
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=trace", target)));
    }
    directives.join(",")
}

/// Initialize logging based on CLI configuration
///
/// `RUST_LOG` overrides the directives derived from `--log-level`.
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_directives(log_level))
            .context("Failed to create log filter")?,
    };

    // Source locations only help when debugging
    let verbose = log_level >= Level::DEBUG;
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging at {} (json: {}, timestamps: {})",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Print the gateway session status
pub fn display_status(instance_id: &str, status: &StatusResponse) {
    println!("\n=== Session ===");
    println!("Instance: {}", instance_id);
    println!("State: {}", status.state);
    if let Some(phone) = &status.phone_number {
        println!("Phone: {}", phone);
    }
    if let Some(payload) = &status.qr_payload {
        println!("QR payload: {}", payload);
    }
    println!();
}

/// Print a conversation list
pub fn display_conversations(conversations: &[Conversation]) {
    println!("\n=== Conversations ===");
    if conversations.is_empty() {
        println!("No conversations found.");
        return;
    }

    for conversation in conversations {
        let mut flags = Vec::new();
        if conversation.pinned {
            flags.push("pinned");
        }
        if conversation.archived {
            flags.push("archived");
        }
        if conversation.muted {
            flags.push("muted");
        }
        if conversation.blocked {
            flags.push("blocked");
        }

        print!("{} ({})", conversation.display_name, conversation.id);
        if conversation.unread_count > 0 {
            print!(" - {} unread", conversation.unread_count);
        }
        if !flags.is_empty() {
            print!(" [{}]", flags.join(", "));
        }
        println!();

        if !conversation.last_message_summary.is_empty() {
            println!("  {}", conversation.last_message_summary);
        }
    }
    println!("\nTotal: {} conversations", conversations.len());
}

/// Print messages oldest first
pub fn display_messages(messages: &[Message]) {
    for message in messages {
        println!("{}", format_message(message));
    }
}

fn format_message(message: &Message) -> String {
    let arrow = match message.direction {
        Direction::In => "<",
        Direction::Out => ">",
    };
    let state = match message.delivery_state {
        DeliveryState::Pending => " (sending)",
        DeliveryState::Failed => " (failed)",
        _ => "",
    };
    format!(
        "[{}] {} {}{}",
        format_timestamp(message.timestamp_ms),
        arrow,
        message.body,
        state
    )
}

/// Format a millisecond Unix timestamp in local time
fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| timestamp_ms.to_string())
}

/// Hide all but the last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let visible: String = secret.chars().skip(count - 4).collect();
    format!("****{}", visible)
}
