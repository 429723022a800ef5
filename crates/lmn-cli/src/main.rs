use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lmn_engine::{NotifierPipeline, RunConfig};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "lmn")]
#[command(about = "Watches live matches and posts webhook notifications")]
struct Cli {
    /// Upstream API auth token. Falls back to LMN_AUTH_TOKEN.
    #[arg(long)]
    token: Option<String>,

    /// Webhook destination URL, repeatable. Falls back to LMN_WEBHOOK_URLS.
    #[arg(long = "webhook")]
    webhooks: Vec<String>,

    /// Seconds to wait after each upstream request.
    #[arg(long)]
    politeness_secs: Option<u64>,

    /// Minutes to hold each notification before posting it.
    #[arg(long)]
    notify_delay_mins: Option<i64>,

    /// Path of the state document.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Compute and print the final document without saving or posting.
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Environment settings first, explicit flags on top.
    fn into_config(self) -> RunConfig {
        let mut config = RunConfig::from_env();
        if let Some(token) = self.token {
            config.auth_token = Some(token);
        }
        if !self.webhooks.is_empty() {
            config.destinations = self.webhooks;
        }
        if let Some(secs) = self.politeness_secs {
            config.politeness_secs = secs;
        }
        if let Some(mins) = self.notify_delay_mins {
            config.notify_delay_mins = mins;
        }
        if let Some(path) = self.db_path {
            config.db_path = path;
        }
        config.dry_run = self.dry_run;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = Cli::parse().into_config();
    let dry_run = config.dry_run;

    let outcome = NotifierPipeline::new(config)?.run_once().await?;
    if dry_run {
        println!("{}", serde_json::to_string_pretty(&outcome.document)?);
    }

    Ok(())
}
