//! # Crash recovery.
//!
//! After a post-ready crash the full pipeline is re-run following a short
//! delay. Failed attempts are retried at a fixed interval with no ceiling:
//!
//! ```text
//! crash ──► wait crash_delay ──► full pipeline ──► Ok  ──► done
//!                                      │
//!                                      └──► Err ──► wait retry_delay ──► full pipeline …
//! ```
//!
//! The loop ends on success, when a change-triggered rebuild supersedes it,
//! or when the session shuts down. It never notifies the host of failures.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::Sleep;

use crate::config::Timings;
use crate::error::PipelineError;
use crate::supervisor::CrashReport;
use crate::types::{BuildReason, BuildRequest};

pub struct RestartLoop {
	crash_delay: Duration,
	retry_delay: Duration,
	timer: Option<Pin<Box<Sleep>>>,
	active: bool,
	attempts: u32,
}

impl RestartLoop {
	pub fn new(timings: &Timings) -> Self {
		Self {
			crash_delay: timings.crash_delay(),
			retry_delay: timings.retry_delay(),
			timer: None,
			active: false,
			attempts: 0,
		}
	}

	/// Recovery in progress: an attempt is scheduled or running.
	pub fn is_active(&self) -> bool {
		self.active
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn on_crash(&mut self, report: &CrashReport) {
		tracing::warn!(
			"{}; rebuilding in {}ms",
			report.exit,
			self.crash_delay.as_millis()
		);
		self.active = true;
		self.attempts = 0;
		self.arm(self.crash_delay);
	}

	pub fn on_failure(&mut self, err: &PipelineError) {
		if !self.active {
			return;
		}
		tracing::error!(
			"crash recovery attempt {} failed: {}; retrying in {}ms",
			self.attempts,
			err,
			self.retry_delay.as_millis()
		);
		let detail = err.detail();
		if !detail.is_empty() {
			tracing::error!("{}", detail);
		}
		self.arm(self.retry_delay);
	}

	pub fn on_success(&mut self) {
		if self.active {
			tracing::info!("recovered after {} attempt(s)", self.attempts);
		}
		self.reset();
	}

	/// A newer rebuild took over.
	pub fn cancel(&mut self) {
		if self.active {
			tracing::debug!("crash recovery superseded");
		}
		self.reset();
	}

	/// Resolves when the next attempt is due; pending while nothing is scheduled.
	pub async fn fired(&mut self) -> BuildRequest {
		let Some(timer) = self.timer.as_mut() else {
			return std::future::pending().await;
		};
		timer.as_mut().await;
		self.timer = None;
		self.attempts += 1;
		BuildRequest::new(BuildReason::CrashRecovery)
	}

	fn arm(&mut self, delay: Duration) {
		self.timer = Some(Box::pin(tokio::time::sleep(delay)));
	}

	fn reset(&mut self) {
		self.timer = None;
		self.active = false;
		self.attempts = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ChildExit, ExitKind};
	use std::time::Instant;

	fn timings(crash: u64, retry: u64) -> Timings {
		Timings {
			grace_ms: 100,
			crash_delay_ms: crash,
			retry_delay_ms: retry,
		}
	}

	fn crash() -> CrashReport {
		CrashReport {
			exit: ChildExit {
				pid: 42,
				code: Some(2),
				signal: None,
				kind: ExitKind::Crash,
			},
			uptime: Duration::from_secs(3),
		}
	}

	#[tokio::test]
	async fn idle_loop_never_fires() {
		let mut restart = RestartLoop::new(&timings(10, 10));
		let fired = tokio::time::timeout(Duration::from_millis(50), restart.fired()).await;
		assert!(fired.is_err());
		assert!(!restart.is_active());
	}

	#[tokio::test]
	async fn crash_then_fixed_retries() {
		let mut restart = RestartLoop::new(&timings(30, 60));
		restart.on_crash(&crash());
		assert!(restart.is_active());

		let t = Instant::now();
		let req = restart.fired().await;
		assert_eq!(req.reason, BuildReason::CrashRecovery);
		assert!(t.elapsed() >= Duration::from_millis(30));
		assert_eq!(restart.attempts(), 1);

		let err = PipelineError::Superseded;
		for attempt in 2..=4 {
			restart.on_failure(&err);
			let t = Instant::now();
			restart.fired().await;
			assert!(t.elapsed() >= Duration::from_millis(60));
			assert_eq!(restart.attempts(), attempt);
		}

		restart.on_success();
		assert!(!restart.is_active());
		assert_eq!(restart.attempts(), 0);
	}

	#[tokio::test]
	async fn cancel_disarms() {
		let mut restart = RestartLoop::new(&timings(10, 10));
		restart.on_crash(&crash());
		restart.cancel();
		let fired = tokio::time::timeout(Duration::from_millis(50), restart.fired()).await;
		assert!(fired.is_err());

		restart.on_failure(&PipelineError::Superseded);
		let fired = tokio::time::timeout(Duration::from_millis(50), restart.fired()).await;
		assert!(fired.is_err(), "failure after cancel must not re-arm");
	}
}
