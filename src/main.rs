use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use jobscout::backend::HttpBackend;
use jobscout::config;
use jobscout::coordinator::Coordinator;
use jobscout::protocol::{Ack, Envelope};
use jobscout::store;
use jobscout::tabs::Tabs;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

/// Tab facilities for the stdio host: `open` becomes an outbound event the
/// browser-side shim applies; snapshots arrive inline with extraction
/// requests, so there is no snapshot channel.
struct HostTabs {
    out: mpsc::Sender<String>,
}

#[async_trait]
impl Tabs for HostTabs {
    async fn active_url(&self) -> Option<String> {
        None
    }

    async fn open(&self, url: &str) -> Result<()> {
        let event = json!({ "action": "open_url", "payload": { "url": url } });
        self.out
            .send(event.to_string())
            .await
            .map_err(|_| anyhow::anyhow!("output channel closed"))
    }

    async fn snapshot(&self) -> Result<String> {
        anyhow::bail!("page snapshots arrive inline with extraction requests")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout is the protocol channel; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/jobscout.db", cfg.app.data_dir));

    let pool = store::init_pool(&database_url).await?;
    store::run_migrations(&pool).await?;

    // Writer task: responses and tab events share one ordered stdout stream.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let backend = Arc::new(HttpBackend::from_config(&cfg)?);
    let tabs = Arc::new(HostTabs {
        out: out_tx.clone(),
    });
    let port = Coordinator::new(pool, backend, tabs, cfg).spawn();

    info!("jobscout host ready; reading envelopes from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => match port.request(envelope).await {
                Ok(response) => response,
                Err(err) => {
                    error!(?err, "coordinator request failed");
                    serde_json::to_value(Ack::err(format!("internal error: {err:#}")))
                        .unwrap_or_else(|_| json!({ "success": false }))
                }
            },
            Err(err) => {
                warn!(%err, "malformed envelope");
                serde_json::to_value(Ack::err(format!("malformed envelope: {err}")))
                    .unwrap_or_else(|_| json!({ "success": false }))
            }
        };
        if out_tx.send(response.to_string()).await.is_err() {
            break;
        }
    }

    info!("stdin closed; shutting down");
    Ok(())
}
