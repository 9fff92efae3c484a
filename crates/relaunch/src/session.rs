use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::config::SessionConfig;
use crate::coordinator::{Router, TriggerCoordinator};
use crate::error::ConfigError;
use crate::host::HostNotifier;
use crate::pipeline::BuildPipeline;
use crate::readiness::ReadinessMonitor;
use crate::runner::Runner;
use crate::supervisor::{CrashReport, Supervisor, SupervisorConfig};
use crate::types::ChangeEvent;

/// A configured dev loop: feed it change events, it rebuilds and restarts.
pub struct Session {
	config: Arc<SessionConfig>,
	runner: Arc<Runner>,
	crashes: mpsc::UnboundedReceiver<CrashReport>,
	notifier: Arc<dyn HostNotifier>,
}

impl Session {
	pub fn new(config: SessionConfig, notifier: Arc<dyn HostNotifier>) -> Result<Self, ConfigError> {
		config.validate()?;
		let config = Arc::new(config);

		let (supervisor, crashes) = Supervisor::new(SupervisorConfig {
			log_path: config.log_path(),
			grace: config.timings.grace(),
		});
		let readiness = ReadinessMonitor::new(config.readiness_pattern()?, config.ready_timeout());
		let runner = Runner::new(
			Arc::clone(&config),
			BuildPipeline::from_config(&config),
			supervisor,
			readiness,
		);

		Ok(Self {
			config,
			runner: Arc::new(runner),
			crashes,
			notifier,
		})
	}

	pub fn supervisor(&self) -> &Arc<Supervisor> {
		self.runner.supervisor()
	}

	/// Paths the session writes itself; changes to them never trigger anything.
	fn router(&self) -> Router {
		Router::new(
			self.config.skip_roots(),
			vec![self.config.artifact_path(), self.config.log_path()],
		)
	}

	/// Drives the loop until `events` closes or `shutdown` is set. The child
	/// is stopped before this returns.
	pub async fn run(self, events: mpsc::Receiver<ChangeEvent>, shutdown: watch::Receiver<bool>) {
		let router = self.router();
		let mut coordinator = TriggerCoordinator::new(
			Arc::clone(&self.runner),
			self.notifier,
			router,
			self.config.debounce(),
			&self.config.timings,
			self.config.source.clone(),
		);
		if self.config.initial_build {
			coordinator.schedule_initial();
		}
		tracing::info!(
			"watching {} path(s), output {}",
			self.config.watch.len(),
			self.config.artifact_path().display()
		);
		coordinator.run(events, self.crashes, shutdown).await;
		tracing::info!("session stopped");
	}
}
