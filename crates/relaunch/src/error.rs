use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ChildExit, CommandOutput};

/// Failures inside one pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
	#[error("failed to create output directory {}: {source}", path.display())]
	CreateDir {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to spawn `{command}`: {source}")]
	Spawn {
		command: String,
		#[source]
		source: io::Error,
	},

	#[error("pre-command `{command}` failed ({status})")]
	PreCommand {
		command: String,
		status: String,
		output: CommandOutput,
	},

	#[error("build failed ({status})")]
	Build {
		command: String,
		status: String,
		output: CommandOutput,
	},

	#[error("process exited before becoming ready: {exit}")]
	PreReadyExit { exit: ChildExit },

	#[error("readiness pattern not seen within {}ms", timeout.as_millis())]
	ReadyTimeout { timeout: Duration },

	/// The child was killed on purpose while the pipeline waited for it.
	#[error("superseded by a newer change")]
	Superseded,
}

impl PipelineError {
	/// Captured output or command line to show next to the message.
	pub fn detail(&self) -> String {
		match self {
			PipelineError::PreCommand { command, output, .. }
			| PipelineError::Build { command, output, .. } => {
				let captured = output.combined();
				if captured.is_empty() {
					command.clone()
				} else {
					format!("{}\n{}", command, captured)
				}
			}
			PipelineError::Spawn { command, .. } => command.clone(),
			PipelineError::CreateDir { path, .. } => path.display().to_string(),
			PipelineError::PreReadyExit { exit } => exit.to_string(),
			PipelineError::ReadyTimeout { .. } | PipelineError::Superseded => String::new(),
		}
	}

	pub fn is_superseded(&self) -> bool {
		matches!(self, PipelineError::Superseded)
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid readiness pattern: {0}")]
	Pattern(#[from] regex::Error),

	#[error("{0}")]
	Invalid(String),
}
