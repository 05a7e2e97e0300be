//! AI Prediction Battle CLI.
//!
//! ```bash
//! # Full battle: independent predictions, then debate
//! battle-agents run 74949
//!
//! # Predictions only
//! battle-agents predict https://polymarket.com/event/gpt-6-launch-2026
//!
//! # Discover trending events
//! battle-agents discover --limit 5
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use arena::TranscriptSink;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use battle_agents::{
    BattleConfig, BattleService, CredentialProbe, EventSource, GammaClient, JsonFileSink,
    NoResearch, ResearchClient, TavilySearch,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "AI prediction battle: independent forecasts, then structured debate", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full battle: predictions + debate.
    Run {
        /// Event id, slug, or full URL.
        event: String,
        /// Maximum debate rounds (overrides BATTLE_MAX_ROUNDS).
        #[arg(long)]
        rounds: Option<u32>,
        /// Write the final transcript JSON here.
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
    /// Run predictions only, no debate.
    Predict {
        /// Event id, slug, or full URL.
        event: String,
    },
    /// Discover trending events.
    Discover {
        /// Number of events to list.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn research_client() -> Arc<dyn ResearchClient> {
    match std::env::var("TAVILY_API_KEY") {
        Ok(key) if key.len() > 20 => Arc::new(TavilySearch::new(&key, 3)),
        _ => {
            warn!("TAVILY_API_KEY not set; agents research from model knowledge only");
            Arc::new(NoResearch)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let source = GammaClient::new();

    match args.command {
        Command::Run {
            event,
            rounds,
            output,
        } => {
            let mut config = BattleConfig::from_env();
            if let Some(rounds) = rounds {
                config.scheduler.max_rounds = rounds;
            }
            let service =
                BattleService::new(config, CredentialProbe::from_env(), research_client())?;

            let event = source.resolve(&event).await?;
            info!(event = %event, "battle starting");
            let report = service.run(event).await?;

            for exclusion in &report.exclusions {
                warn!(
                    agent = %exclusion.agent,
                    phase = %exclusion.phase,
                    reason = %exclusion.reason,
                    "agent excluded"
                );
            }
            println!("{}", report.summary_line());
            for prediction in report.predictions.values() {
                println!("  {}", prediction.summary_line());
            }

            if let Some(outcome) = &report.outcome {
                for turn in &outcome.turns {
                    println!(
                        "  [round {}] {} ({}): {}",
                        turn.round, turn.agent_id, turn.action, turn.content
                    );
                }
                if let Some(path) = output {
                    JsonFileSink::new(&path).publish(outcome)?;
                    info!(path = %path.display(), "transcript written");
                }
            } else if report.no_quorum {
                bail!("fewer than two agents locked predictions; debate skipped");
            }
        }
        Command::Predict { event } => {
            let config = BattleConfig::from_env();
            let service =
                BattleService::new(config, CredentialProbe::from_env(), research_client())?;
            let event = source.resolve(&event).await?;
            let report = service.predict_only(event).await?;
            for prediction in report.predictions.values() {
                println!("{}", prediction.summary_line());
            }
        }
        Command::Discover { limit } => {
            let events = source.discover(limit).await?;
            for event in events {
                let liquidity = event
                    .liquidity
                    .map(|l| format!(" (liquidity {:.0})", l))
                    .unwrap_or_default();
                println!("{}{}", event, liquidity);
            }
        }
    }

    Ok(())
}
