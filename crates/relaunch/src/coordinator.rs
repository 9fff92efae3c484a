use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;

use crate::config::Timings;
use crate::error::PipelineError;
use crate::host::{HostEvent, HostNotifier};
use crate::paths;
use crate::restart::RestartLoop;
use crate::runner::Pipeline;
use crate::supervisor::CrashReport;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
	/// Kill, pre-commands, build, run.
	Full,
	/// Pre-commands only.
	Reduced,
	/// Written by the session itself.
	Ignore,
}

/// Decides which pipeline a changed path triggers.
#[derive(Debug, Clone, Default)]
pub struct Router {
	skip: Vec<PathBuf>,
	ignore: Vec<PathBuf>,
}

impl Router {
	/// All paths must already be absolute and normalised.
	pub fn new(skip: Vec<PathBuf>, ignore: Vec<PathBuf>) -> Self {
		Self { skip, ignore }
	}

	pub fn route(&self, path: &Path) -> Route {
		let path = paths::normalize(path);
		if self.ignore.iter().any(|p| *p == path) {
			Route::Ignore
		} else if self.skip.iter().any(|root| paths::is_under(&path, root)) {
			Route::Reduced
		} else {
			Route::Full
		}
	}
}

/// One trigger class' debounce window. Only the latest request survives.
struct Debounce {
	delay: Duration,
	timer: Option<Pin<Box<Sleep>>>,
	request: Option<BuildRequest>,
}

impl Debounce {
	fn new(delay: Duration) -> Self {
		Self {
			delay,
			timer: None,
			request: None,
		}
	}

	/// Replaces the pending request and restarts the window.
	fn trigger(&mut self, request: BuildRequest) {
		self.request = Some(request);
		self.rearm();
	}

	/// Keeps the request but waits for [`Debounce::rearm`] to start the window.
	fn hold(&mut self, request: BuildRequest) {
		self.request = Some(request);
		self.timer = None;
	}

	fn rearm(&mut self) {
		if self.request.is_some() {
			self.timer = Some(Box::pin(tokio::time::sleep(self.delay)));
		}
	}

	fn is_pending(&self) -> bool {
		self.request.is_some()
	}

	#[cfg(test)]
	fn is_armed(&self) -> bool {
		self.timer.is_some()
	}

	fn clear(&mut self) {
		self.timer = None;
		self.request = None;
	}

	async fn fired(&mut self) -> BuildRequest {
		let Some(timer) = self.timer.as_mut() else {
			return std::future::pending().await;
		};
		timer.as_mut().await;
		self.timer = None;
		match self.request.take() {
			Some(request) => request,
			None => std::future::pending().await,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
	Full,
	Reduced,
}

struct Running {
	class: Class,
	request: BuildRequest,
	task: JoinHandle<Result<PipelineOutcome, PipelineError>>,
}

/// Turns change events and crash reports into pipeline runs, one at a time.
pub struct TriggerCoordinator<P: Pipeline> {
	pipeline: Arc<P>,
	notifier: Arc<dyn HostNotifier>,
	router: Router,
	host_id: String,
	full: Debounce,
	reduced: Debounce,
	queued_full: Option<BuildRequest>,
	queued_reduced: Option<BuildRequest>,
	running: Option<Running>,
	killing: Option<JoinHandle<()>>,
	/// Crash seen while a full run was in flight; judged once it settles.
	crash_in_flight: Option<CrashReport>,
	restart: RestartLoop,
}

impl<P: Pipeline> TriggerCoordinator<P> {
	pub fn new(
		pipeline: Arc<P>,
		notifier: Arc<dyn HostNotifier>,
		router: Router,
		debounce: Duration,
		timings: &Timings,
		host_id: impl Into<String>,
	) -> Self {
		Self {
			pipeline,
			notifier,
			router,
			host_id: host_id.into(),
			full: Debounce::new(debounce),
			reduced: Debounce::new(debounce),
			queued_full: None,
			queued_reduced: None,
			running: None,
			killing: None,
			crash_in_flight: None,
			restart: RestartLoop::new(timings),
		}
	}

	/// Arms one full run, as if a change had just arrived.
	pub fn schedule_initial(&mut self) {
		self.full.trigger(BuildRequest::new(BuildReason::InitialBuild));
	}

	/// Runs until the change stream closes or `shutdown` flips, then stops
	/// whatever child is left.
	pub async fn run(
		mut self,
		mut events: mpsc::Receiver<ChangeEvent>,
		mut crashes: mpsc::UnboundedReceiver<CrashReport>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			tokio::select! {
				event = events.recv() => match event {
					Some(event) => self.on_change(event),
					None => {
						tracing::debug!("change stream closed");
						break;
					}
				},
				Some(report) = crashes.recv() => self.on_crash(report),
				request = self.full.fired() => self.fire(Class::Full, request),
				request = self.reduced.fired() => self.fire(Class::Reduced, request),
				request = self.restart.fired() => self.fire(Class::Full, request),
				_ = join_kill(&mut self.killing) => {
					self.killing = None;
					self.full.rearm();
				}
				result = join_running(&mut self.running) => self.on_finished(result),
				_ = shutdown.changed() => break,
			}
		}

		self.restart.cancel();
		if let Some(running) = self.running.take() {
			running.task.abort();
		}
		if let Some(killing) = self.killing.take() {
			let _ = killing.await;
		}
		self.pipeline.kill().await;
	}

	fn on_change(&mut self, event: ChangeEvent) {
		match self.router.route(&event.path) {
			Route::Ignore => {
				tracing::trace!("ignoring own write to {}", event.path.display());
			}
			Route::Reduced => {
				tracing::debug!("{} {} (pre-commands only)", event.path.display(), event.kind);
				self.reduced.trigger(event.into());
			}
			Route::Full => {
				tracing::debug!("{} {}", event.path.display(), event.kind);
				self.restart.cancel();
				let request = BuildRequest::from(event);
				if self.running.is_some() {
					self.full.hold(request);
					self.kill_active();
				} else if self.killing.is_some() {
					self.full.hold(request);
				} else {
					self.full.trigger(request);
				}
			}
		}
	}

	/// Stops the child right away; the held request is re-armed once it is gone.
	fn kill_active(&mut self) {
		if self.killing.is_some() {
			return;
		}
		tracing::info!("change during rebuild, stopping current process");
		let pipeline = Arc::clone(&self.pipeline);
		self.killing = Some(tokio::spawn(async move { pipeline.kill().await }));
	}

	fn rebuild_pending(&self) -> bool {
		self.full.is_pending() || self.queued_full.is_some()
	}

	fn on_crash(&mut self, report: CrashReport) {
		if self.rebuild_pending() {
			tracing::info!("{}; a rebuild is already scheduled", report.exit);
			return;
		}
		if self.running.as_ref().is_some_and(|r| r.class == Class::Full) {
			// Either the child this run replaces, or the one it just started.
			self.crash_in_flight = Some(report);
			return;
		}
		self.restart.on_crash(&report);
	}

	fn fire(&mut self, class: Class, request: BuildRequest) {
		if class == Class::Reduced && (self.full.is_pending() || self.queued_full.is_some()) {
			tracing::debug!("pre-command run folded into pending rebuild");
			return;
		}
		if class == Class::Full {
			// pre-commands are part of the full run
			self.reduced.clear();
			self.queued_reduced = None;
		}
		if self.running.is_some() {
			tracing::debug!("pipeline busy, queueing {}", request.reason);
			match class {
				Class::Full => self.queued_full = Some(request),
				Class::Reduced => self.queued_reduced = Some(request),
			}
			return;
		}
		self.start(class, request);
	}

	fn start(&mut self, class: Class, request: BuildRequest) {
		let pipeline = Arc::clone(&self.pipeline);
		let req = request.clone();
		let task = match class {
			Class::Full => tokio::spawn(async move { pipeline.full(req).await }),
			Class::Reduced => tokio::spawn(async move { pipeline.reduced(req).await }),
		};
		self.running = Some(Running {
			class,
			request,
			task,
		});
	}

	fn on_finished(&mut self, result: Result<Result<PipelineOutcome, PipelineError>, JoinError>) {
		let Some(running) = self.running.take() else {
			return;
		};
		let recovering = running.request.reason == BuildReason::CrashRecovery;
		let crash = self.crash_in_flight.take();

		match result {
			Ok(Ok(outcome)) => {
				match &outcome {
					PipelineOutcome::Running { pid, readiness, .. } => {
						tracing::info!("pid {} up ({:?}), reloading", pid, readiness)
					}
					PipelineOutcome::Built { artifact } => {
						tracing::info!("built {} (not running)", artifact.display())
					}
					PipelineOutcome::Reduced => tracing::info!("pre-commands done, reloading"),
				}
				if recovering {
					self.restart.on_success();
				}
				self.notifier.notify(HostEvent::reload());

				if let (PipelineOutcome::Running { pid, .. }, Some(report)) = (&outcome, crash) {
					if *pid == report.exit.pid && !self.rebuild_pending() {
						self.restart.on_crash(&report);
					}
				}
			}
			Ok(Err(e)) if e.is_superseded() => {
				tracing::debug!("{} superseded", running.request.reason);
			}
			Ok(Err(e)) if recovering => self.restart.on_failure(&e),
			Ok(Err(e)) => {
				tracing::error!("{} ({})", e, running.request.reason);
				self.notifier.notify(HostEvent::error(&e, self.error_id(&running.request)));
			}
			Err(e) if e.is_cancelled() => {}
			Err(e) => {
				tracing::error!("pipeline task failed: {}", e);
				self.notifier.notify(HostEvent::Error {
					message: format!("pipeline task failed: {}", e),
					stack: String::new(),
					id: self.error_id(&running.request),
				});
			}
		}

		self.start_queued();
	}

	fn start_queued(&mut self) {
		if let Some(request) = self.queued_full.take() {
			self.queued_reduced = None;
			self.start(Class::Full, request);
		} else if let Some(request) = self.queued_reduced.take() {
			self.start(Class::Reduced, request);
		}
	}

	fn error_id(&self, request: &BuildRequest) -> String {
		match &request.reason {
			BuildReason::Change { path, .. } => path.display().to_string(),
			_ => self.host_id.clone(),
		}
	}
}

async fn join_running(
	running: &mut Option<Running>,
) -> Result<Result<PipelineOutcome, PipelineError>, JoinError> {
	match running {
		Some(r) => (&mut r.task).await,
		None => std::future::pending().await,
	}
}

async fn join_kill(killing: &mut Option<JoinHandle<()>>) {
	match killing {
		Some(k) => {
			let _ = k.await;
		}
		None => std::future::pending().await,
	}
}
