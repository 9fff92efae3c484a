use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::output::OutputCapture;
use crate::process::{self, wait_exit, ProcessHandle};
use crate::types::*;

/// How long output readers may keep draining after the child is reaped.
/// Grandchildren that inherited the pipes can hold them open indefinitely.
const READER_DRAIN: Duration = Duration::from_millis(500);

pub struct SupervisorConfig {
	/// Captured child output is appended here.
	pub log_path: PathBuf,
	/// SIGTERM → SIGKILL escalation window.
	pub grace: Duration,
}

/// Owns the single tracked child of a session.
pub struct Supervisor {
	state: Arc<Mutex<SupervisorState>>,
	config: SupervisorConfig,
	crashes: mpsc::UnboundedSender<CrashReport>,
	next_id: AtomicU64,
}

#[derive(Default)]
struct SupervisorState {
	active: Option<TrackedChild>,
}

struct TrackedChild {
	id: u64,
	pid: u32,
	command: CommandSpec,
	phase: ProcessPhase,
	kill_in_progress: bool,
	exit: watch::Receiver<Option<ChildExit>>,
	started_at: Instant,
}

/// Sent when a ready child exits without being asked to.
#[derive(Debug, Clone)]
pub struct CrashReport {
	pub exit: ChildExit,
	pub uptime: Duration,
}

/// Point-in-time view of the tracked child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChild {
	pub id: u64,
	pub pid: u32,
	pub phase: ProcessPhase,
	pub kill_in_progress: bool,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<CrashReport>) {
		let (crashes, crash_rx) = mpsc::unbounded_channel();
		let sup = Arc::new(Self {
			state: Arc::new(Mutex::new(SupervisorState::default())),
			config,
			crashes,
			next_id: AtomicU64::new(0),
		});
		(sup, crash_rx)
	}

	pub async fn active(&self) -> Option<ActiveChild> {
		let state = self.state.lock().await;
		state.active.as_ref().map(|t| ActiveChild {
			id: t.id,
			pid: t.pid,
			phase: t.phase,
			kill_in_progress: t.kill_in_progress,
		})
	}

	/// Phase of `handle`'s child; anything no longer tracked has terminated.
	pub async fn phase(&self, handle: &ProcessHandle) -> ProcessPhase {
		let state = self.state.lock().await;
		match state.active.as_ref() {
			Some(t) if t.id == handle.id() => t.phase,
			_ => ProcessPhase::Terminated,
		}
	}

	/// Spawns `command` and makes it the tracked child. With `capture_output`
	/// both streams go to the log file and the handle's output feed.
	pub async fn start(
		&self,
		command: &CommandSpec,
		capture_output: bool,
	) -> Result<ProcessHandle, PipelineError> {
		let log_path = capture_output.then_some(self.config.log_path.as_path());
		let spawned = process::spawn(command, log_path).map_err(|source| PipelineError::Spawn {
			command: command.to_string(),
			source,
		})?;

		let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		let pid = spawned.pid;
		let (exit_tx, exit_rx) = watch::channel(None);

		{
			let mut state = self.state.lock().await;
			if let Some(prev) = state.active.take() {
				tracing::warn!(
					"starting pid {} while pid {} ({}) is still tracked",
					pid,
					prev.pid,
					prev.command
				);
			}
			state.active = Some(TrackedChild {
				id,
				pid,
				command: command.clone(),
				phase: ProcessPhase::Starting,
				kill_in_progress: false,
				exit: exit_rx.clone(),
				started_at: Instant::now(),
			});
		}

		tokio::spawn(watch_exit(
			Arc::clone(&self.state),
			self.crashes.clone(),
			id,
			pid,
			spawned.child,
			spawned.capture,
			spawned.readers,
			exit_tx,
		));

		tracing::info!("started {} (pid {})", command, pid);
		Ok(ProcessHandle::new(id, pid, exit_rx, spawned.feed))
	}

	/// Marks the child ready. False if it is no longer the tracked child
	/// (it exited or was replaced); the caller treats that as a pre-ready exit.
	pub async fn mark_ready(&self, handle: &ProcessHandle) -> bool {
		let mut state = self.state.lock().await;
		match state.active.as_mut() {
			Some(t) if t.id == handle.id() && t.phase == ProcessPhase::Starting => {
				t.phase = ProcessPhase::Ready;
				true
			}
			Some(t) if t.id == handle.id() => t.phase == ProcessPhase::Ready,
			_ => false,
		}
	}

	/// Terminates the tracked child, if any: SIGTERM, then SIGKILL after the
	/// grace window. Resolves once the exit has actually been observed.
	/// The escalation runs in its own task and outlives a dropped caller.
	pub async fn stop(&self) {
		let (id, pid, mut exit, first) = {
			let mut state = self.state.lock().await;
			let Some(t) = state.active.as_mut() else {
				return;
			};
			let first = !t.kill_in_progress;
			t.kill_in_progress = true;
			(t.id, t.pid, t.exit.clone(), first)
		};

		if first {
			tracing::info!("stopping pid {}", pid);
			if let Err(e) = process::terminate(pid) {
				tracing::debug!("SIGTERM to pid {} failed ({}), treating as exited", pid, e);
				self.release(id).await;
				return;
			}
			tokio::spawn(escalate(pid, self.config.grace, exit.clone()));
		}

		let status = wait_exit(&mut exit, pid).await;
		tracing::debug!("{}", status);
	}

	async fn release(&self, id: u64) {
		let mut state = self.state.lock().await;
		if state.active.as_ref().is_some_and(|t| t.id == id) {
			state.active = None;
		}
	}
}

/// SIGKILL once if the child outlives the grace window after SIGTERM.
async fn escalate(pid: u32, grace: Duration, mut exit: watch::Receiver<Option<ChildExit>>) {
	tokio::select! {
		_ = wait_exit(&mut exit, pid) => return,
		_ = tokio::time::sleep(grace) => {}
	}
	tracing::warn!(
		"pid {} still running after {}ms, sending SIGKILL",
		pid,
		grace.as_millis()
	);
	if let Err(e) = process::force_kill(pid) {
		tracing::debug!("SIGKILL to pid {} failed: {}", pid, e);
	}
}

/// Reaps one child, closes its log and classifies the exit.
#[allow(clippy::too_many_arguments)]
async fn watch_exit(
	state: Arc<Mutex<SupervisorState>>,
	crashes: mpsc::UnboundedSender<CrashReport>,
	id: u64,
	pid: u32,
	mut child: Child,
	capture: Option<OutputCapture>,
	readers: Vec<JoinHandle<()>>,
	exit_tx: watch::Sender<Option<ChildExit>>,
) {
	let status = child.wait().await;

	for reader in readers {
		let abort = reader.abort_handle();
		if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
			abort.abort();
		}
	}
	if let Some(capture) = capture {
		capture.close().await;
	}

	let (code, signal) = match status {
		Ok(s) => (s.code(), s.signal()),
		Err(e) => {
			tracing::warn!("failed to wait on pid {}: {}", pid, e);
			(None, None)
		}
	};

	let (kind, uptime) = {
		let mut state = state.lock().await;
		match state.active.as_ref() {
			Some(t) if t.id == id => {
				let kind = if t.kill_in_progress {
					ExitKind::Expected
				} else if t.phase == ProcessPhase::Ready {
					ExitKind::Crash
				} else {
					ExitKind::StartupFailure
				};
				let uptime = t.started_at.elapsed();
				state.active = None;
				(kind, uptime)
			}
			_ => (ExitKind::Expected, Duration::ZERO),
		}
	};

	let exit = ChildExit {
		pid,
		code,
		signal,
		kind,
	};
	let _ = exit_tx.send(Some(exit));

	match kind {
		ExitKind::Crash => {
			tracing::warn!("process crashed: {} after {:.1}s", exit, uptime.as_secs_f64());
			let _ = crashes.send(CrashReport { exit, uptime });
		}
		ExitKind::StartupFailure => tracing::warn!("process exited during startup: {}", exit),
		ExitKind::Expected => tracing::debug!("process stopped: {}", exit),
	}
}
