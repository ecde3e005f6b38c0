// ── Aria CLI ─────────────────────────────────────────────────────────────
// Administrative surface over the engine: start/stop, status dump,
// force-close a session, terminate an agent, reset a circuit breaker.
// Exit codes: 0 success, 1 operational failure, 2 invalid arguments/config.

use std::process::ExitCode;

use aria_engine::config::RuntimeConfig;
use aria_engine::error::EngineError;
use aria_engine::EngineState;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aria", version, about = "Administrative CLI for the Aria runtime control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the engine and run the scheduler until interrupted.
    Start,
    /// Print a JSON status dump: session stats, live agents, today's spend.
    Status,
    /// Force-close a session by id.
    CloseSession {
        session_id: String,
        #[arg(long, default_value = "manual_cli")]
        reason: String,
    },
    /// Terminate a live agent by id.
    TerminateAgent {
        agent_id: String,
        #[arg(long, default_value = "manual_cli")]
        reason: String,
    },
    /// Reset a model's circuit breaker back to closed.
    ResetBreaker { model: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config_file = std::env::var("ARIA_CONFIG_FILE")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| aria_engine::config::default_config_file_path());
    match aria_engine::config::bootstrap_config_file(&config_file) {
        Ok(true) => log::info!(
            "wrote a starter config with a generated bearer-token placeholder to {}; \
             edit it and export its variables before production use",
            config_file.display()
        ),
        Ok(false) => {}
        Err(e) => log::warn!("config bootstrap check failed for {}: {e}", config_file.display()),
    }

    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Command, config: RuntimeConfig) -> Result<(), EngineError> {
    let engine = EngineState::bootstrap(config)?;

    match command {
        Command::Start => {
            log::info!("aria starting, scheduler_enabled={}", engine.config.scheduler_enabled);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::select! {
                _ = engine.clone().run(shutdown_rx) => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("received ctrl-c, shutting down");
                    let _ = shutdown_tx.send(true);
                }
            }
            Ok(())
        }
        Command::Status => {
            let stats = engine.sessions.get_stats()?;
            let (input_tokens, output_tokens, cost) = engine.tracker.spend();
            let report = serde_json::json!({
                "sessions": {
                    "total": stats.total_sessions,
                    "active": stats.active_sessions,
                    "by_agent": stats.by_agent,
                    "by_type": stats.by_type,
                },
                "agents_live": engine.pool.list_live().len(),
                "today_spend": {
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens,
                    "cost_usd": cost,
                },
                "scheduler_enabled": engine.config.scheduler_enabled,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::CloseSession { session_id, reason } => {
            engine.sessions.close_session(&session_id, &reason)?;
            println!("closed session {session_id}");
            Ok(())
        }
        Command::TerminateAgent { agent_id, reason } => {
            engine.pool.terminate_agent(&agent_id, &reason)?;
            println!("terminated agent {agent_id}");
            Ok(())
        }
        Command::ResetBreaker { model } => {
            engine.llm.breaker(&model).record_success();
            println!("reset circuit breaker for {model}");
            Ok(())
        }
    }
}
