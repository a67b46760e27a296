use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use inviteroles::config::BotConfig;
use inviteroles::db::pool::{create_pool, run_migrations};
use inviteroles::db::queries;
use inviteroles::db::store::SqliteSettingsStore;
use inviteroles::engine::bot::InviteRolesEngine;
use inviteroles::engine::commands::{Command, CommandResponse};
use inviteroles::engine::events::{CommunityId, PlatformEvent};
use inviteroles::engine::rest::DiscordRestClient;

#[derive(Parser)]
#[command(name = "inviteroles-bot", version, about = "Grants roles based on the invite a member joined with")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "inviteroles.toml")]
    config: String,
}

/// One line of input: a platform event or an admin command.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Event {
        event: PlatformEvent,
    },
    Command {
        #[serde(default)]
        id: Option<u64>,
        community: CommunityId,
        command: Command,
    },
}

#[derive(Serialize)]
struct Outbound {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    community: CommunityId,
    #[serde(flatten)]
    response: CommandResponse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BotConfig::load(&cli.config)?;
    if config.discord.token.is_empty() {
        bail!("no Discord bot token configured (set DISCORD_TOKEN or [discord].token)");
    }

    // Initialize database
    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    let stored = queries::settings::list_community_ids(&pool)
        .await
        .context("failed to read stored communities")?;
    info!(communities = stored.len(), "database ready");

    let platform = DiscordRestClient::new(
        &config.discord.api_base,
        &config.discord.token,
        config.request_timeout(),
    )
    .context("failed to build Discord client")?;
    let store = SqliteSettingsStore::new(pool.clone());
    let engine = Arc::new(InviteRolesEngine::new(
        Arc::new(platform),
        Arc::new(store),
        config.flush_interval(),
    ));

    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(engine.scheduler().clone().run(cancel.clone()));

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_responses(out_rx));

    info!("InviteRoles bot starting, reading events from stdin");

    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&line, &engine, &out_tx, &mut tasks),
                Ok(None) => {
                    info!("input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to read input, shutting down");
                    break;
                }
            },
        }
        while tasks.try_join_next().is_some() {}
    }

    // Let in-flight events finish before the final flush.
    while tasks.join_next().await.is_some() {}
    cancel.cancel();
    if let Err(e) = scheduler.await {
        error!(error = %e, "flush scheduler task failed");
    }
    let report = engine.shutdown().await;
    if report.failed > 0 {
        warn!(failed = report.failed, "some settings could not be saved on shutdown");
    }

    drop(out_tx);
    if let Err(e) = writer.await {
        error!(error = %e, "response writer task failed");
    }
    pool.close().await;
    info!("InviteRoles bot stopped");
    Ok(())
}

/// Parse one input line and handle it on its own task.
fn dispatch(
    line: &str,
    engine: &Arc<InviteRolesEngine>,
    out_tx: &mpsc::UnboundedSender<String>,
    tasks: &mut JoinSet<()>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let inbound: Inbound = match serde_json::from_str(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, "ignoring malformed input line");
            return;
        }
    };

    let engine = engine.clone();
    match inbound {
        Inbound::Event { event } => {
            tasks.spawn(async move { engine.handle_event(event).await });
        }
        Inbound::Command {
            id,
            community,
            command,
        } => {
            let out_tx = out_tx.clone();
            tasks.spawn(async move {
                let response = engine.execute_command(community, command).await;
                let outbound = Outbound {
                    id,
                    community,
                    response,
                };
                match serde_json::to_string(&outbound) {
                    Ok(json) => {
                        let _ = out_tx.send(json);
                    }
                    Err(e) => error!(error = %e, "failed to encode command response"),
                }
            });
        }
    }
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        let result = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        }
        .await;
        if let Err(e) = result {
            error!(error = %e, "failed to write command response");
            break;
        }
    }
}
