use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	Added,
	Changed,
	Removed,
}

impl fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChangeKind::Added => write!(f, "added"),
			ChangeKind::Changed => write!(f, "changed"),
			ChangeKind::Removed => write!(f, "removed"),
		}
	}
}

/// A raw filesystem notification, as delivered by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
	pub path: PathBuf,
	pub kind: ChangeKind,
}

impl ChangeEvent {
	pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), kind }
	}
}

/// Why a pipeline run was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReason {
	Change { path: PathBuf, kind: ChangeKind },
	InitialBuild,
	CrashRecovery,
}

impl fmt::Display for BuildReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BuildReason::Change { path, kind } => write!(f, "{} {}", path.display(), kind),
			BuildReason::InitialBuild => write!(f, "initial build"),
			BuildReason::CrashRecovery => write!(f, "crash recovery"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
	pub reason: BuildReason,
}

impl BuildRequest {
	pub fn new(reason: BuildReason) -> Self {
		Self { reason }
	}
}

impl From<ChangeEvent> for BuildRequest {
	fn from(event: ChangeEvent) -> Self {
		Self::new(BuildReason::Change {
			path: event.path,
			kind: event.kind,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
	Starting,
	Ready,
	Terminated,
}

/// How the supervisor classified a child's exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
	/// A termination was requested for this child.
	Expected,
	/// The child exited on its own after becoming ready.
	Crash,
	/// The child exited on its own before becoming ready.
	StartupFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
	pub pid: u32,
	pub code: Option<i32>,
	pub signal: Option<i32>,
	pub kind: ExitKind,
}

impl fmt::Display for ChildExit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "pid {} exited with code {}", self.pid, code),
			(None, Some(sig)) => write!(f, "pid {} killed by signal {}", self.pid, sig),
			(None, None) => write!(f, "pid {} exited", self.pid),
		}
	}
}

/// Program plus arguments, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub program: String,
	pub args: Vec<String>,
}

impl CommandSpec {
	pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
		Self {
			program: program.into(),
			args,
		}
	}

	/// Splits an argv list into program and arguments. `None` for an empty list.
	pub fn from_argv(argv: &[String]) -> Option<Self> {
		let (program, args) = argv.split_first()?;
		Some(Self::new(program.clone(), args.to_vec()))
	}
}

impl fmt::Display for CommandSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.program)?;
		for arg in &self.args {
			if arg.is_empty() || arg.contains(char::is_whitespace) {
				write!(f, " {:?}", arg)?;
			} else {
				write!(f, " {}", arg)?;
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
	pub stdout: String,
	pub stderr: String,
}

impl CommandOutput {
	pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
		Self {
			stdout: String::from_utf8_lossy(stdout).into_owned(),
			stderr: String::from_utf8_lossy(stderr).into_owned(),
		}
	}

	/// Both streams joined for display, stderr first.
	pub fn combined(&self) -> String {
		match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
			(false, false) => format!("{}\n{}", self.stderr.trim_end(), self.stdout.trim_end()),
			(false, true) => self.stderr.trim_end().to_string(),
			(true, false) => self.stdout.trim_end().to_string(),
			(true, true) => String::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
	/// No pattern configured; ready once spawned.
	Spawned,
	/// The readiness pattern matched the child's output.
	Matched,
	/// The pattern never matched within the timeout.
	TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
	/// Pre-commands only.
	Reduced,
	/// Artifact built, nothing spawned.
	Built { artifact: PathBuf },
	Running {
		artifact: PathBuf,
		pid: u32,
		readiness: Readiness,
	},
}
