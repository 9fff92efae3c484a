use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::paths;
use crate::types::CommandSpec;

// ── relaunch.toml ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
	/// Build input, passed last to the build command.
	#[serde(default = "default_source")]
	pub source: String,
	#[serde(default = "default_output")]
	pub output: PathBuf,
	#[serde(default = "default_watch")]
	pub watch: Vec<PathBuf>,
	/// Changes under these paths run pre-commands only.
	#[serde(default)]
	pub skip: Vec<PathBuf>,
	#[serde(default)]
	pub run_args: Vec<String>,
	#[serde(default)]
	pub build_args: Vec<String>,
	#[serde(default = "default_debounce_ms")]
	pub debounce_ms: u64,
	#[serde(default = "default_true")]
	pub initial_build: bool,
	pub ready_pattern: Option<String>,
	#[serde(default = "default_ready_timeout_ms")]
	pub ready_timeout_ms: u64,
	#[serde(default)]
	pub ready_timeout_policy: ReadyTimeoutPolicy,
	/// Each entry is an argv list: `["go", "generate", "./..."]`.
	#[serde(default)]
	pub pre_commands: Vec<Vec<String>>,
	#[serde(default)]
	pub debug: bool,
	#[serde(default = "default_debug_port")]
	pub debug_port: u16,
	#[serde(default)]
	pub dont_run: bool,
	pub log_file: Option<PathBuf>,
	#[serde(default)]
	pub build: BuildConfig,
	#[serde(default)]
	pub debugger: DebuggerConfig,
	#[serde(default)]
	pub timings: Timings,
	/// Directory relative paths resolve against.
	#[serde(skip, default = "default_root")]
	pub root: PathBuf,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			source: default_source(),
			output: default_output(),
			watch: default_watch(),
			skip: Vec::new(),
			run_args: Vec::new(),
			build_args: Vec::new(),
			debounce_ms: default_debounce_ms(),
			initial_build: true,
			ready_pattern: None,
			ready_timeout_ms: default_ready_timeout_ms(),
			ready_timeout_policy: ReadyTimeoutPolicy::default(),
			pre_commands: Vec::new(),
			debug: false,
			debug_port: default_debug_port(),
			dont_run: false,
			log_file: None,
			build: BuildConfig::default(),
			debugger: DebuggerConfig::default(),
			timings: Timings::default(),
			root: default_root(),
		}
	}
}

fn default_source() -> String { ".".into() }
fn default_output() -> PathBuf { PathBuf::from("tmp/app") }
fn default_watch() -> Vec<PathBuf> { vec![PathBuf::from(".")] }
fn default_debounce_ms() -> u64 { 500 }
fn default_true() -> bool { true }
fn default_ready_timeout_ms() -> u64 { 10_000 }
fn default_debug_port() -> u16 { 2345 }
fn default_root() -> PathBuf { std::env::current_dir().unwrap_or_default() }

/// What to do when a readiness pattern never shows up.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadyTimeoutPolicy {
	/// Treat the child as ready and carry on (logged as a timeout).
	#[default]
	Proceed,
	/// Fail the pipeline.
	Fail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
	#[serde(default = "default_build_program")]
	pub program: String,
	#[serde(default = "default_build_subcommand")]
	pub subcommand: Vec<String>,
	/// Appended to the build arguments in debug mode.
	#[serde(default = "default_debug_flags")]
	pub debug_flags: Vec<String>,
}

impl Default for BuildConfig {
	fn default() -> Self {
		Self {
			program: default_build_program(),
			subcommand: default_build_subcommand(),
			debug_flags: default_debug_flags(),
		}
	}
}

fn default_build_program() -> String { "go".into() }
fn default_build_subcommand() -> Vec<String> { vec!["build".into()] }
fn default_debug_flags() -> Vec<String> { vec!["-gcflags=all=-N -l".into()] }

/// Command template used to launch the artifact in debug mode.
/// `{port}` and `{binary}` are substituted; run arguments follow.
#[derive(Debug, Clone, Deserialize)]
pub struct DebuggerConfig {
	#[serde(default = "default_debugger_program")]
	pub program: String,
	#[serde(default = "default_debugger_args")]
	pub args: Vec<String>,
}

impl Default for DebuggerConfig {
	fn default() -> Self {
		Self {
			program: default_debugger_program(),
			args: default_debugger_args(),
		}
	}
}

fn default_debugger_program() -> String { "dlv".into() }
fn default_debugger_args() -> Vec<String> {
	[
		"exec",
		"--headless",
		"--listen=:{port}",
		"--api-version=2",
		"--accept-multiclient",
		"--continue",
		"{binary}",
		"--",
	]
	.iter()
	.map(|s| s.to_string())
	.collect()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Timings {
	/// SIGTERM → SIGKILL escalation window.
	#[serde(default = "default_grace_ms")]
	pub grace_ms: u64,
	/// Delay between a post-ready crash and the first rebuild.
	#[serde(default = "default_crash_delay_ms")]
	pub crash_delay_ms: u64,
	/// Delay between failed crash-recovery attempts.
	#[serde(default = "default_retry_delay_ms")]
	pub retry_delay_ms: u64,
}

impl Default for Timings {
	fn default() -> Self {
		Self {
			grace_ms: default_grace_ms(),
			crash_delay_ms: default_crash_delay_ms(),
			retry_delay_ms: default_retry_delay_ms(),
		}
	}
}

fn default_grace_ms() -> u64 { 3000 }
fn default_crash_delay_ms() -> u64 { 1000 }
fn default_retry_delay_ms() -> u64 { 5000 }

impl Timings {
	pub fn grace(&self) -> Duration {
		Duration::from_millis(self.grace_ms)
	}

	pub fn crash_delay(&self) -> Duration {
		Duration::from_millis(self.crash_delay_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}
}

impl SessionConfig {
	/// Reads a TOML file. Relative paths inside it resolve against its directory.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let root = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.map(|p| paths::resolve(&default_root(), p))
			.unwrap_or_else(default_root);
		Self::from_toml(&content, root).map_err(|e| match e {
			ConfigError::Parse { source, .. } => ConfigError::Parse {
				path: path.to_path_buf(),
				source,
			},
			other => other,
		})
	}

	pub fn from_toml(content: &str, root: PathBuf) -> Result<Self, ConfigError> {
		let mut config: SessionConfig =
			toml::from_str(content).map_err(|source| ConfigError::Parse {
				path: PathBuf::new(),
				source,
			})?;
		config.root = root;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.build.program.trim().is_empty() {
			return Err(ConfigError::Invalid("build.program must not be empty".into()));
		}
		if let Some(i) = self.pre_commands.iter().position(|argv| argv.is_empty()) {
			return Err(ConfigError::Invalid(format!("pre_commands[{}] is empty", i)));
		}
		if self.watch.is_empty() {
			return Err(ConfigError::Invalid("at least one watch path is required".into()));
		}
		self.readiness_pattern()?;
		Ok(())
	}

	pub fn resolve(&self, path: &Path) -> PathBuf {
		paths::resolve(&self.root, path)
	}

	pub fn artifact_path(&self) -> PathBuf {
		self.resolve(&self.output)
	}

	pub fn log_path(&self) -> PathBuf {
		match &self.log_file {
			Some(path) => self.resolve(path),
			None => paths::default_log_path(&self.artifact_path()),
		}
	}

	pub fn watch_roots(&self) -> Vec<PathBuf> {
		self.watch.iter().map(|p| self.resolve(p)).collect()
	}

	pub fn skip_roots(&self) -> Vec<PathBuf> {
		self.skip.iter().map(|p| self.resolve(p)).collect()
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn ready_timeout(&self) -> Duration {
		Duration::from_millis(self.ready_timeout_ms)
	}

	pub fn readiness_pattern(&self) -> Result<Option<Regex>, ConfigError> {
		match self.ready_pattern.as_deref() {
			Some(p) if !p.is_empty() => Ok(Some(Regex::new(p)?)),
			_ => Ok(None),
		}
	}

	pub fn pre_command_specs(&self) -> Vec<CommandSpec> {
		self.pre_commands
			.iter()
			.filter_map(|argv| CommandSpec::from_argv(argv))
			.collect()
	}

	/// `<program> <subcommand…> -o <artifact> <build_args…> [debug flags] <source>`
	pub fn build_command(&self) -> CommandSpec {
		let mut args = self.build.subcommand.clone();
		args.push("-o".into());
		args.push(self.artifact_path().display().to_string());
		args.extend(self.build_args.iter().cloned());
		if self.debug {
			args.extend(self.build.debug_flags.iter().cloned());
		}
		args.push(self.source.clone());
		CommandSpec::new(self.build.program.clone(), args)
	}

	pub fn run_command(&self, artifact: &Path) -> CommandSpec {
		if !self.debug {
			return CommandSpec::new(artifact.display().to_string(), self.run_args.clone());
		}
		let binary = artifact.display().to_string();
		let port = self.debug_port.to_string();
		let mut args: Vec<String> = self
			.debugger
			.args
			.iter()
			.map(|a| a.replace("{port}", &port).replace("{binary}", &binary))
			.collect();
		args.extend(self.run_args.iter().cloned());
		CommandSpec::new(self.debugger.program.clone(), args)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(toml: &str) -> SessionConfig {
		SessionConfig::from_toml(toml, PathBuf::from("/work/app")).unwrap()
	}

	#[test]
	fn defaults_from_empty_file() {
		let c = config("");
		assert_eq!(c.debounce(), Duration::from_millis(500));
		assert!(c.initial_build);
		assert!(!c.dont_run);
		assert_eq!(c.timings.grace(), Duration::from_secs(3));
		assert_eq!(c.timings.crash_delay(), Duration::from_secs(1));
		assert_eq!(c.timings.retry_delay(), Duration::from_secs(5));
		assert_eq!(c.ready_timeout_policy, ReadyTimeoutPolicy::Proceed);
		assert_eq!(c.artifact_path(), PathBuf::from("/work/app/tmp/app"));
		assert_eq!(c.log_path(), PathBuf::from("/work/app/tmp/app.log"));
	}

	#[test]
	fn build_command_layout() {
		let c = config(
			r#"
			source = "./cmd/server"
			output = "bin/server"
			build_args = ["-tags", "dev"]
			"#,
		);
		let cmd = c.build_command();
		assert_eq!(cmd.program, "go");
		assert_eq!(
			cmd.args,
			vec!["build", "-o", "/work/app/bin/server", "-tags", "dev", "./cmd/server"]
		);
	}

	#[test]
	fn debug_mode_adds_flags_and_wraps_run() {
		let c = config(
			r#"
			debug = true
			debug_port = 4000
			run_args = ["--port", "8080"]
			"#,
		);
		assert!(c.build_command().args.contains(&"-gcflags=all=-N -l".to_string()));

		let run = c.run_command(Path::new("/work/app/tmp/app"));
		assert_eq!(run.program, "dlv");
		assert!(run.args.contains(&"--listen=:4000".to_string()));
		assert!(run.args.contains(&"/work/app/tmp/app".to_string()));
		assert_eq!(&run.args[run.args.len() - 2..], &["--port", "8080"]);
	}

	#[test]
	fn plain_run_command() {
		let c = config(r#"run_args = ["-v"]"#);
		let run = c.run_command(Path::new("/work/app/tmp/app"));
		assert_eq!(run.program, "/work/app/tmp/app");
		assert_eq!(run.args, vec!["-v"]);
	}

	#[test]
	fn rejects_bad_pattern_and_empty_pre_command() {
		let err = SessionConfig::from_toml(r#"ready_pattern = "(""#, PathBuf::from("/"));
		assert!(matches!(err, Err(ConfigError::Pattern(_))));

		let err = SessionConfig::from_toml("pre_commands = [[]]", PathBuf::from("/"));
		assert!(matches!(err, Err(ConfigError::Invalid(_))));
	}

	#[test]
	fn fail_policy_parses() {
		let c = config(r#"ready_timeout_policy = "fail""#);
		assert_eq!(c.ready_timeout_policy, ReadyTimeoutPolicy::Fail);
	}

	#[test]
	fn skip_roots_resolve() {
		let c = config(r#"skip = ["web", "./assets/../static"]"#);
		assert_eq!(
			c.skip_roots(),
			vec![PathBuf::from("/work/app/web"), PathBuf::from("/work/app/static")]
		);
	}
}
