use anyhow::{Context, Result};
use clap::Args;
use relaunch::{ReadyTimeoutPolicy, SessionConfig};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "relaunch.toml";

/// Flags shared by `run` and `check`. Anything set here wins over the file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
	/// Config file [default: ./relaunch.toml if present]
	#[arg(short, long)]
	pub config: Option<PathBuf>,
	/// Build input passed last to the build command
	#[arg(long)]
	pub source: Option<String>,
	/// Artifact path
	#[arg(short, long)]
	pub output: Option<PathBuf>,
	/// Watch root (repeatable; replaces the configured list)
	#[arg(short, long = "watch", value_name = "PATH")]
	pub watch: Vec<PathBuf>,
	/// Only run pre-commands for changes under this path (repeatable)
	#[arg(long = "skip", value_name = "PATH")]
	pub skip: Vec<PathBuf>,
	/// Pre-build command, split on whitespace (repeatable)
	#[arg(long = "pre", value_name = "COMMAND")]
	pub pre: Vec<String>,
	/// Extra argument for the build command (repeatable)
	#[arg(long = "build-arg", value_name = "ARG", allow_hyphen_values = true)]
	pub build_args: Vec<String>,
	#[arg(long, value_name = "MS")]
	pub debounce_ms: Option<u64>,
	/// Regex matched against child output to detect readiness
	#[arg(long, value_name = "REGEX")]
	pub ready_pattern: Option<String>,
	#[arg(long, value_name = "MS")]
	pub ready_timeout_ms: Option<u64>,
	/// Fail the pipeline instead of proceeding when readiness times out
	#[arg(long)]
	pub strict_ready: bool,
	/// Wait for a change before the first build
	#[arg(long)]
	pub no_initial_build: bool,
	/// Run the artifact under the debugger
	#[arg(long)]
	pub debug: bool,
	#[arg(long, value_name = "PORT")]
	pub debug_port: Option<u16>,
	/// Build only, never start the artifact
	#[arg(long)]
	pub dont_run: bool,
	/// Where captured child output goes [default: <output>.log]
	#[arg(long, value_name = "PATH")]
	pub log_file: Option<PathBuf>,
	/// Arguments for the artifact
	#[arg(last = true, value_name = "RUN_ARGS")]
	pub run_args: Vec<String>,
}

/// Reads the config file (explicit, or `relaunch.toml` if it exists) and
/// applies the command line on top.
pub fn load(overrides: &Overrides) -> Result<SessionConfig> {
	let mut config = match &overrides.config {
		Some(path) => SessionConfig::load(path)
			.with_context(|| format!("loading {}", path.display()))?,
		None if Path::new(DEFAULT_CONFIG).is_file() => SessionConfig::load(Path::new(DEFAULT_CONFIG))
			.with_context(|| format!("loading {}", DEFAULT_CONFIG))?,
		None => SessionConfig::default(),
	};
	overrides.apply(&mut config);
	config.validate().context("invalid configuration")?;
	Ok(config)
}

impl Overrides {
	pub fn apply(&self, config: &mut SessionConfig) {
		if let Some(source) = &self.source {
			config.source = source.clone();
		}
		if let Some(output) = &self.output {
			config.output = output.clone();
		}
		if !self.watch.is_empty() {
			config.watch = self.watch.clone();
		}
		config.skip.extend(self.skip.iter().cloned());
		config.pre_commands.extend(
			self.pre
				.iter()
				.map(|cmd| cmd.split_whitespace().map(String::from).collect::<Vec<_>>())
				.filter(|argv| !argv.is_empty()),
		);
		config.build_args.extend(self.build_args.iter().cloned());
		if let Some(ms) = self.debounce_ms {
			config.debounce_ms = ms;
		}
		if let Some(pattern) = &self.ready_pattern {
			config.ready_pattern = Some(pattern.clone());
		}
		if let Some(ms) = self.ready_timeout_ms {
			config.ready_timeout_ms = ms;
		}
		if self.strict_ready {
			config.ready_timeout_policy = ReadyTimeoutPolicy::Fail;
		}
		if self.no_initial_build {
			config.initial_build = false;
		}
		if self.debug {
			config.debug = true;
		}
		if let Some(port) = self.debug_port {
			config.debug_port = port;
		}
		if self.dont_run {
			config.dont_run = true;
		}
		if let Some(path) = &self.log_file {
			config.log_file = Some(path.clone());
		}
		if !self.run_args.is_empty() {
			config.run_args = self.run_args.clone();
		}
	}
}
