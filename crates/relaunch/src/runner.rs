use std::future::Future;
use std::sync::Arc;

use crate::config::{ReadyTimeoutPolicy, SessionConfig};
use crate::error::PipelineError;
use crate::pipeline::BuildPipeline;
use crate::readiness::ReadinessMonitor;
use crate::supervisor::Supervisor;
use crate::types::*;

/// What the coordinator drives. [`Runner`] is the real implementation.
pub trait Pipeline: Send + Sync + 'static {
	/// Kill, pre-commands, build, run, wait for readiness.
	fn full(
		&self,
		request: BuildRequest,
	) -> impl Future<Output = Result<PipelineOutcome, PipelineError>> + Send;

	/// Pre-commands only; the running child is left alone.
	fn reduced(
		&self,
		request: BuildRequest,
	) -> impl Future<Output = Result<PipelineOutcome, PipelineError>> + Send;

	/// Stops the active child, if any.
	fn kill(&self) -> impl Future<Output = ()> + Send;
}

pub struct Runner {
	config: Arc<SessionConfig>,
	build: BuildPipeline,
	supervisor: Arc<Supervisor>,
	readiness: ReadinessMonitor,
}

impl Runner {
	pub fn new(
		config: Arc<SessionConfig>,
		build: BuildPipeline,
		supervisor: Arc<Supervisor>,
		readiness: ReadinessMonitor,
	) -> Self {
		Self {
			config,
			build,
			supervisor,
			readiness,
		}
	}

	pub fn supervisor(&self) -> &Arc<Supervisor> {
		&self.supervisor
	}

	async fn run_full(&self, request: BuildRequest) -> Result<PipelineOutcome, PipelineError> {
		tracing::info!("rebuilding ({})", request.reason);
		self.supervisor.stop().await;

		let artifact = self.build.run().await?;
		if self.config.dont_run {
			return Ok(PipelineOutcome::Built { artifact });
		}

		let command = self.config.run_command(&artifact);
		let mut handle = self
			.supervisor
			.start(&command, self.readiness.captures_output())
			.await?;

		let readiness = match self.readiness.wait(&mut handle).await {
			Ok(readiness) => readiness,
			Err(exit) => return Err(exit_error(exit)),
		};

		if readiness == Readiness::TimedOut
			&& self.config.ready_timeout_policy == ReadyTimeoutPolicy::Fail
		{
			self.supervisor.stop().await;
			return Err(PipelineError::ReadyTimeout {
				timeout: self.readiness.timeout(),
			});
		}

		if !self.supervisor.mark_ready(&handle).await {
			let exit = handle.wait().await;
			return Err(exit_error(exit));
		}

		Ok(PipelineOutcome::Running {
			artifact,
			pid: handle.pid(),
			readiness,
		})
	}

	async fn run_reduced(&self, request: BuildRequest) -> Result<PipelineOutcome, PipelineError> {
		tracing::info!("running pre-commands ({})", request.reason);
		self.build.run_pre_commands().await?;
		Ok(PipelineOutcome::Reduced)
	}
}

fn exit_error(exit: ChildExit) -> PipelineError {
	match exit.kind {
		ExitKind::Expected => PipelineError::Superseded,
		_ => PipelineError::PreReadyExit { exit },
	}
}

impl Pipeline for Runner {
	fn full(
		&self,
		request: BuildRequest,
	) -> impl Future<Output = Result<PipelineOutcome, PipelineError>> + Send {
		self.run_full(request)
	}

	fn reduced(
		&self,
		request: BuildRequest,
	) -> impl Future<Output = Result<PipelineOutcome, PipelineError>> + Send {
		self.run_reduced(request)
	}

	fn kill(&self) -> impl Future<Output = ()> + Send {
		self.supervisor.stop()
	}
}
