//! Command-line entry point for the cricket oracle.
//!
//! Each subcommand builds an orchestrator from the configuration file,
//! performs one operation against the ledger and prints its result as JSON.
//! Ctrl-C stops a running sequence before its next ball.

use clap::{Parser, Subcommand};
use oracle_config::Config;
use oracle_core::{
	FixedOutcomes, MatchOrchestrator, OutcomeSource, RandomOutcomes, SequenceSummary,
	TransitionResult,
};
use oracle_types::{
	format_ether, Address, BallOutcome, OracleEvent, UnknownOutcome, MAX_BALLS, U256,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

mod factory_registry;

use factory_registry::build_orchestrator_from_config;

/// Command-line arguments for the oracle.
#[derive(Parser, Debug)]
#[command(name = "oracle", author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, global = true, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, global = true, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Deploy a game contract for a new match through the factory
	CreateMatch {
		#[arg(long)]
		team_a: String,
		#[arg(long)]
		team_b: String,
		#[arg(long)]
		match_id: u64,
	},
	/// Open betting on a ball
	Open { match_id: u64, ball: u32 },
	/// Close betting on a ball
	Close { match_id: u64, ball: u32 },
	/// Report the outcome of a closed ball
	Report {
		match_id: u64,
		ball: u32,
		outcome: BallOutcome,
	},
	/// Close a ball, wait the settle delay, then report its outcome
	CloseReport {
		match_id: u64,
		ball: u32,
		outcome: BallOutcome,
	},
	/// Cancel a ball and refund its bets
	Cancel {
		match_id: u64,
		ball: u32,
		#[arg(long, default_value = "cancelled by oracle")]
		reason: String,
	},
	/// Halt all betting on a match
	Pause { match_id: u64 },
	/// Run the ball sequence over a range
	Run {
		match_id: u64,
		#[arg(long, default_value_t = 1)]
		start: u32,
		#[arg(long, default_value_t = MAX_BALLS)]
		end: u32,
		#[command(flatten)]
		outcomes: OutcomeArgs,
	},
	/// Open consecutive balls without closing them
	OpenBatch {
		match_id: u64,
		#[arg(long, default_value_t = 1)]
		start: u32,
		#[arg(long)]
		count: u32,
	},
	/// Reconcile an interrupted sequence and continue it
	Resume {
		match_id: u64,
		#[command(flatten)]
		outcomes: OutcomeArgs,
	},
	/// Read teams and progress of a match
	MatchInfo { match_id: u64 },
	/// Read phase, outcome and pools of a ball
	BallInfo { match_id: u64, ball: u32 },
	/// List game contracts the factory considers active
	ActiveGames,
	/// Remove a game contract from the factory
	RemoveGame { game: Address },
	/// Transfer native currency from the oracle account
	Fund {
		to: Address,
		/// Amount in wei
		#[arg(value_parser = parse_wei)]
		amount: U256,
	},
	/// Native balance of an address, a match contract or the oracle account
	Balance {
		address: Option<Address>,
		#[arg(long, conflicts_with = "address")]
		match_id: Option<u64>,
	},
}

/// Where a sequence gets its outcomes from.
#[derive(clap::Args, Debug)]
struct OutcomeArgs {
	/// Comma-separated outcomes replayed in order, e.g. boundary,wicket,1
	#[arg(long, value_delimiter = ',')]
	outcomes: Vec<String>,

	/// Seed for random outcomes
	#[arg(long, conflicts_with = "outcomes")]
	seed: Option<u64>,
}

impl OutcomeArgs {
	fn source(&self) -> Result<Box<dyn OutcomeSource>, UnknownOutcome> {
		if self.outcomes.is_empty() {
			Ok(Box::new(RandomOutcomes::new(self.seed)))
		} else {
			Ok(Box::new(FixedOutcomes::from_names(&self.outcomes)?))
		}
	}
}

fn parse_wei(value: &str) -> Result<U256, String> {
	U256::from_str_radix(value, 10).map_err(|e| format!("invalid wei amount '{}': {}", value, e))
}

#[derive(Serialize)]
struct BalanceRecord {
	address: Address,
	wei: String,
	ether: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	// Logs go to stderr so stdout carries only JSON results
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.with_writer(std::io::stderr)
		.init();

	let config_path = args.config.to_string_lossy();
	let config = Config::from_file(&config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.oracle.id);

	let orchestrator = Arc::new(build_orchestrator_from_config(config).await?);
	spawn_event_logger(&orchestrator);

	let stopper = orchestrator.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::info!("Received shutdown signal");
			stopper.stop();
		}
	});

	execute(&orchestrator, args.command).await
}

/// Logs every published event at debug level.
fn spawn_event_logger(orchestrator: &MatchOrchestrator) {
	let mut events = orchestrator.context().events.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => log_event(&event),
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Event logger fell behind");
				},
				Err(RecvError::Closed) => break,
			}
		}
	});
}

fn log_event(event: &OracleEvent) {
	match serde_json::to_string(event) {
		Ok(json) => tracing::debug!(event = %json, "Oracle event"),
		Err(e) => tracing::warn!(error = %e, "Unserializable event"),
	}
}

async fn execute(
	orchestrator: &MatchOrchestrator,
	command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
	match command {
		Command::CreateMatch {
			team_a,
			team_b,
			match_id,
		} => {
			let handle = orchestrator.create_match(&team_a, &team_b, match_id).await?;
			print_json(&handle)
		},
		Command::Open { match_id, ball } => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			transition(lifecycle.open(ball).await?)
		},
		Command::Close { match_id, ball } => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			transition(lifecycle.close(ball).await?)
		},
		Command::Report {
			match_id,
			ball,
			outcome,
		} => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			transition(lifecycle.report(ball, outcome).await?)
		},
		Command::CloseReport {
			match_id,
			ball,
			outcome,
		} => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			transition(lifecycle.close_then_report(ball, outcome).await?)
		},
		Command::Cancel {
			match_id,
			ball,
			reason,
		} => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			transition(lifecycle.cancel(ball, &reason).await?)
		},
		Command::Pause { match_id } => {
			let lifecycle = orchestrator.lifecycle(&orchestrator.handle(match_id).await?);
			let result = lifecycle.emergency_pause().await;
			print_json(&result)?;
			require(result.is_confirmed(), "emergencyPause did not confirm")
		},
		Command::Run {
			match_id,
			start,
			end,
			outcomes,
		} => {
			let mut source = outcomes.source()?;
			let mut handle = orchestrator.handle(match_id).await?;
			let summary = orchestrator
				.run_sequence(&mut handle, start..=end, source.as_mut())
				.await?;
			print_json(&summary)?;
			settled(&summary)
		},
		Command::OpenBatch {
			match_id,
			start,
			count,
		} => {
			let handle = orchestrator.handle(match_id).await?;
			let results = orchestrator.open_batch(&handle, start, count).await?;
			print_json(&results)?;
			require(
				results.iter().all(TransitionResult::is_confirmed),
				"batch stopped before its last ball",
			)
		},
		Command::Resume { match_id, outcomes } => {
			let mut source = outcomes.source()?;
			let (report, summary) = orchestrator.resume(match_id, source.as_mut()).await?;
			print_json(&serde_json::json!({ "recovery": report, "sequence": summary }))?;
			settled(&summary)
		},
		Command::MatchInfo { match_id } => {
			let handle = orchestrator.handle(match_id).await?;
			print_json(&orchestrator.match_info(handle.contract_address).await?)
		},
		Command::BallInfo { match_id, ball } => {
			let handle = orchestrator.handle(match_id).await?;
			print_json(&orchestrator.ball_info(&handle, ball).await?)
		},
		Command::ActiveGames => print_json(&orchestrator.active_games().await?),
		Command::RemoveGame { game } => {
			let result = orchestrator.remove_game(game).await;
			print_json(&result)?;
			require(result.is_confirmed(), "removeGame did not confirm")
		},
		Command::Fund { to, amount } => {
			let result = orchestrator.fund(to, amount).await;
			print_json(&result)?;
			require(result.is_confirmed(), "transfer did not confirm")
		},
		Command::Balance { address, match_id } => {
			let address = match (address, match_id) {
				(Some(address), _) => address,
				(None, Some(match_id)) => orchestrator.handle(match_id).await?.contract_address,
				(None, None) => orchestrator.oracle_address().await?,
			};
			let wei = orchestrator.balance(address).await?;
			print_json(&BalanceRecord {
				address,
				wei: wei.to_string(),
				ether: format_ether(wei),
			})
		},
	}
}

/// Prints a transition result and fails unless it confirmed.
fn transition(result: TransitionResult) -> Result<(), Box<dyn std::error::Error>> {
	print_json(&result)?;
	require(
		result.is_confirmed(),
		&format!("ball {} {}", result.ball(), result.label()),
	)
}

/// A run may stop early, but must not leave failed, owed or unknown balls.
fn settled(summary: &SequenceSummary) -> Result<(), Box<dyn std::error::Error>> {
	require(
		summary.is_settled(),
		&format!(
			"sequence left {} owed and {} ambiguous balls{}",
			summary.partial.len(),
			summary.ambiguous.len(),
			if summary.failed.is_some() { ", and failed" } else { "" }
		),
	)
}

fn require(ok: bool, message: &str) -> Result<(), Box<dyn std::error::Error>> {
	if ok {
		Ok(())
	} else {
		Err(message.into())
	}
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
