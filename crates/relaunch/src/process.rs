use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::output::{pipe_output, OutputCapture};
use crate::types::{ChildExit, CommandSpec, ExitKind};

/// One spawned child. The OS handle itself lives in the supervisor's exit-watch
/// task; this is the identity, output feed and exit notification.
pub struct ProcessHandle {
	id: u64,
	pid: u32,
	exit: watch::Receiver<Option<ChildExit>>,
	output: Option<broadcast::Receiver<Vec<u8>>>,
}

impl ProcessHandle {
	pub(crate) fn new(
		id: u64,
		pid: u32,
		exit: watch::Receiver<Option<ChildExit>>,
		output: Option<broadcast::Receiver<Vec<u8>>>,
	) -> Self {
		Self { id, pid, exit, output }
	}

	/// Generation number, unique per supervisor.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	/// Captured output feed. `None` when output is inherited or already taken.
	pub fn take_output(&mut self) -> Option<broadcast::Receiver<Vec<u8>>> {
		self.output.take()
	}

	pub fn exit_status(&self) -> Option<ChildExit> {
		*self.exit.borrow()
	}

	pub fn exit_watch(&self) -> watch::Receiver<Option<ChildExit>> {
		self.exit.clone()
	}

	/// Resolves once the exit has been observed and classified.
	pub async fn wait(&mut self) -> ChildExit {
		wait_exit(&mut self.exit, self.pid).await
	}
}

pub(crate) async fn wait_exit(exit: &mut watch::Receiver<Option<ChildExit>>, pid: u32) -> ChildExit {
	loop {
		if let Some(status) = *exit.borrow_and_update() {
			return status;
		}
		if exit.changed().await.is_err() {
			return exit.borrow().unwrap_or(ChildExit {
				pid,
				code: None,
				signal: None,
				kind: ExitKind::Expected,
			});
		}
	}
}

pub(crate) struct Spawned {
	pub child: Child,
	pub pid: u32,
	pub capture: Option<OutputCapture>,
	/// Subscribed before the readers start, so no chunk is missed.
	pub feed: Option<broadcast::Receiver<Vec<u8>>>,
	pub readers: Vec<JoinHandle<()>>,
}

/// Spawns `command` in its own process group. With `log_path`, stdout and
/// stderr are piped into a fresh [`OutputCapture`]; otherwise both are inherited.
pub(crate) fn spawn(command: &CommandSpec, log_path: Option<&Path>) -> std::io::Result<Spawned> {
	let mut cmd = Command::new(&command.program);
	cmd.args(&command.args).stdin(Stdio::null()).process_group(0);

	if log_path.is_some() {
		cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
	} else {
		cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
	}

	let mut child = cmd.spawn()?;
	let pid = child.id().unwrap_or(0);

	let capture = log_path
		.map(|path| OutputCapture::open(path, &format!("--- {} (pid {}) ---", command, pid)));
	let feed = capture.as_ref().map(|c| c.subscribe());

	let mut readers = Vec::new();
	if let Some(ref capture) = capture {
		if let Some(stdout) = child.stdout.take() {
			let out = capture.clone();
			readers.push(tokio::spawn(async move {
				pipe_output(stdout, out).await;
			}));
		}
		if let Some(stderr) = child.stderr.take() {
			let out = capture.clone();
			readers.push(tokio::spawn(async move {
				pipe_output(stderr, out).await;
			}));
		}
	}

	Ok(Spawned {
		child,
		pid,
		capture,
		feed,
		readers,
	})
}

pub fn terminate(pid: u32) -> nix::Result<()> {
	signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

pub fn force_kill(pid: u32) -> nix::Result<()> {
	signal_group(pid, nix::sys::signal::Signal::SIGKILL)
}

fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	if pid == 0 {
		return Err(nix::errno::Errno::ESRCH);
	}
	killpg(Pid::from_raw(pid as i32), signal)
}
