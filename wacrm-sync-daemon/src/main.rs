mod config;
mod diagnostics;
mod http;
mod push;

use anyhow::{bail, Context, Result};
use clap::Parser;
use diagnostics::{Cli, DiagnosticCommand};
use http::HttpGateway;
use push::PushListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use wacrm_sync_core::{
    Gateway, LoadOutcome, PageOutcome, SendOutcome, SessionState, StopOutcome, SyncEvent,
    SyncService,
};

use config::Config;

/// Grace period for the cleanup stop on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main daemon state
struct Daemon {
    config: Config,
    gateway: Arc<HttpGateway>,
    service: SyncService,
}

impl Daemon {
    fn new(config: Config) -> Result<Self> {
        let gateway =
            Arc::new(HttpGateway::new(&config.gateway).context("Failed to create gateway client")?);
        let service = SyncService::new(
            gateway.clone(),
            config.sync.clone(),
            config.gateway.instance_id.clone(),
        );

        Ok(Self {
            config,
            gateway,
            service,
        })
    }

    /// Start or resume the gateway session and require it to be paired
    async fn attach(&self) -> Result<()> {
        let state = self
            .service
            .session()
            .start()
            .await
            .context("Failed to start gateway session")?;

        if state != SessionState::Connected {
            bail!(
                "Session is not paired (state: {}). Run the daemon and scan the QR code first.",
                state
            );
        }
        Ok(())
    }

    /// Pick up whatever session the gateway holds, paired or not
    async fn attach_for_stop(&self) -> Result<()> {
        let status = self
            .gateway
            .status()
            .await
            .context("Failed to query session status")?;
        if status.state == SessionState::Disconnected {
            return Ok(());
        }

        self.service
            .session()
            .start()
            .await
            .context("Failed to attach to gateway session")?;
        Ok(())
    }

    /// Run until Ctrl-C
    async fn run(&self) -> Result<()> {
        info!("WhatsApp CRM sync daemon running");
        info!("Gateway: {}", self.config.gateway.base_url);
        info!("Instance: {}", self.config.gateway.instance_id);

        let events = tokio::spawn(log_events(self.service.subscribe()));

        let push = match &self.config.gateway.push_url {
            Some(url) => {
                let listener = PushListener::new(
                    url.clone(),
                    self.config.gateway.api_token.clone(),
                    self.service.clone(),
                );
                Some(tokio::spawn(listener.run()))
            }
            None => {
                info!("No push_url configured, relying on polling");
                None
            }
        };

        match self.service.session().start().await {
            Ok(state) => info!("Session is {}", state),
            Err(e) => error!("Failed to start session: {}", e),
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Received shutdown signal");

        if let Some(push) = push {
            push.abort();
        }

        if let Some(cleanup) = self.service.session().on_page_exit().await {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, cleanup).await {
                Ok(Ok(())) => info!("Unpaired session stopped"),
                Ok(Err(e)) => warn!("Session cleanup task failed: {}", e),
                Err(_) => warn!("Session cleanup timed out"),
            }
        }

        events.abort();
        Ok(())
    }
}

/// Log sync events for the operator
async fn log_events(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::QrUpdated { payload }) => {
                info!("Scan this QR payload with WhatsApp: {}", payload);
            }
            Ok(SyncEvent::SessionStateChanged { from, to }) => {
                info!("Session state: {} -> {}", from, to);
            }
            Ok(SyncEvent::SendConfirmed {
                conversation_id,
                message_id,
                ..
            }) => {
                info!("Message {} sent to {}", message_id, conversation_id);
            }
            Ok(SyncEvent::SendFailed {
                conversation_id,
                reason,
                ..
            }) => {
                warn!("Send to {} failed: {}", conversation_id, reason);
            }
            Ok(SyncEvent::Error {
                conversation_id,
                message,
            }) => {
                warn!("Sync error ({:?}): {}", conversation_id, message);
            }
            Ok(event) => debug!("Sync event: {:?}", event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Handle diagnostic commands
async fn handle_diagnostic_command(command: &DiagnosticCommand, config: Config) -> Result<()> {
    if let DiagnosticCommand::DumpConfig { show_sensitive } = command {
        let mut shown = config;
        if !show_sensitive {
            shown.gateway.api_token = shown
                .gateway
                .api_token
                .as_deref()
                .map(diagnostics::mask_secret);
        }
        println!("\n=== Configuration ===");
        println!("File: {}", shown.config_path().display());
        println!();
        print!(
            "{}",
            toml::to_string_pretty(&shown).context("Failed to serialize config")?
        );
        return Ok(());
    }

    let daemon = Daemon::new(config)?;
    let service = &daemon.service;

    match command {
        DiagnosticCommand::Status => {
            let status = daemon
                .gateway
                .status()
                .await
                .context("Failed to query session status")?;
            diagnostics::display_status(&daemon.config.gateway.instance_id, &status);
        }
        DiagnosticCommand::Conversations { all } => {
            daemon.attach().await?;
            diagnostics::display_conversations(&service.conversations().await);
            if *all {
                println!("\n--- Archived ---");
                diagnostics::display_conversations(&service.archived_conversations().await);
            }
        }
        DiagnosticCommand::History {
            conversation_id,
            pages,
        } => {
            daemon.attach().await?;
            match service.open_conversation(conversation_id).await {
                Some(LoadOutcome::Loaded(_)) => {}
                Some(LoadOutcome::Stale) | None => {
                    bail!("Failed to load conversation {}", conversation_id)
                }
            }

            for _ in 1..*pages {
                match service.load_earlier(conversation_id).await {
                    Some(PageOutcome::Loaded { count }) => debug!("Loaded {} older messages", count),
                    Some(PageOutcome::Exhausted) | Some(PageOutcome::NoMoreHistory) => {
                        println!("(start of conversation)");
                        break;
                    }
                    other => {
                        warn!("Stopped paging: {:?}", other);
                        break;
                    }
                }
            }

            diagnostics::display_messages(&service.messages(conversation_id).await);
        }
        DiagnosticCommand::Send {
            conversation_id,
            body,
        } => {
            daemon.attach().await?;
            let receipt = service
                .send(conversation_id, body)
                .await
                .context("Failed to send message")?;

            match receipt.outcome {
                SendOutcome::Confirmed { message_id } => println!("Sent as {}", message_id),
                SendOutcome::Unmatched => {
                    println!("Accepted by the gateway; server id not known yet")
                }
                SendOutcome::Failed { reason } => bail!("Send failed: {}", reason),
            }
        }
        DiagnosticCommand::Stop { force } => {
            daemon.attach_for_stop().await?;
            match service
                .session()
                .stop(*force)
                .await
                .context("Failed to stop session")?
            {
                StopOutcome::Stopped => println!("Session stopped"),
                StopOutcome::AlreadyStopped => println!("No session running"),
                StopOutcome::ConfirmationRequired => {
                    println!("Session is paired to a phone. Pass --force to stop it.")
                }
            }
        }
        DiagnosticCommand::DumpConfig { .. } => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create configuration directories")?;

    if let Some(command) = &cli.command {
        return handle_diagnostic_command(command, config).await;
    }

    info!("Starting WhatsApp CRM sync daemon...");

    let daemon = Daemon::new(config).context("Failed to create daemon")?;
    daemon.run().await
}
