mod config;
mod watcher;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use relaunch::{JsonLines, Session, SessionConfig};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Overrides;
use watcher::FileWatcher;

#[derive(Parser)]
#[command(name = "relaunch", version, about = "Rebuild and restart a dev server on every change")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
	#[command(subcommand)]
	command: Option<Command>,
	#[command(flatten)]
	overrides: Overrides,
}

#[derive(Subcommand)]
enum Command {
	/// Watch, rebuild and run (default)
	Run {
		#[command(flatten)]
		overrides: Overrides,
	},
	/// Validate the configuration and print the resolved commands
	Check {
		#[command(flatten)]
		overrides: Overrides,
	},
}

fn init_tracing() {
	let filter = EnvFilter::try_from_env("RELAUNCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::registry()
		.with(fmt::layer().with_writer(std::io::stderr).with_target(false))
		.with(filter)
		.init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	init_tracing();
	let cli = Cli::parse();

	match cli.command {
		Some(Command::Run { overrides }) => cmd_run(&overrides).await,
		Some(Command::Check { overrides }) => cmd_check(&overrides),
		None => cmd_run(&cli.overrides).await,
	}
}

fn print_banner(config: &SessionConfig) {
	eprintln!("{} {}", "relaunch".bold(), env!("CARGO_PKG_VERSION").dimmed());
	eprintln!("  {}   {}", "build".cyan(), config.build_command());
	if config.dont_run {
		eprintln!("  {}     {}", "run".cyan(), "(disabled)".dimmed());
	} else {
		eprintln!("  {}     {}", "run".cyan(), config.run_command(&config.artifact_path()));
	}
	for root in config.watch_roots() {
		eprintln!("  {}   {}", "watch".cyan(), root.display());
	}
	for root in config.skip_roots() {
		eprintln!("  {}    {} {}", "skip".cyan(), root.display(), "(pre-commands only)".dimmed());
	}
	if let Some(pattern) = &config.ready_pattern {
		eprintln!(
			"  {}   /{}/ within {}ms",
			"ready".cyan(),
			pattern,
			config.ready_timeout_ms
		);
	}
	eprintln!("  {}     {}", "log".cyan(), config.log_path().display());
}

fn cmd_check(overrides: &Overrides) -> Result<()> {
	let config = config::load(overrides)?;
	print_banner(&config);
	for cmd in config.pre_command_specs() {
		eprintln!("  {}     {}", "pre".cyan(), cmd);
	}
	for root in config.watch_roots() {
		if !root.exists() {
			eprintln!("  {} {} does not exist", "warning:".yellow().bold(), root.display());
		}
	}
	eprintln!("{}", "config ok".green());
	Ok(())
}

async fn cmd_run(overrides: &Overrides) -> Result<()> {
	let config = config::load(overrides)?;
	print_banner(&config);

	let roots = config.watch_roots();
	let notifier = Arc::new(JsonLines::new(std::io::stdout()));
	let session = Session::new(config, notifier).context("failed to set up session")?;

	let (events_tx, events_rx) = mpsc::channel(256);
	let _watcher = FileWatcher::start(roots, events_tx)?;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		wait_for_signal().await;
		tracing::info!("shutting down");
		let _ = shutdown_tx.send(true);
	});

	session.run(events_rx, shutdown_rx).await;
	Ok(())
}

async fn wait_for_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut term = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			tracing::warn!("cannot listen for SIGTERM: {}", e);
			let _ = tokio::signal::ctrl_c().await;
			return;
		}
	};
	tokio::select! {
		_ = tokio::signal::ctrl_c() => {}
		_ = term.recv() => {}
	}
}
