use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::SessionConfig;
use crate::error::PipelineError;
use crate::types::{CommandOutput, CommandSpec};

/// Output directory, pre-commands, build. Strictly in that order; the first
/// failure ends the invocation and nothing is retried.
#[derive(Debug, Clone)]
pub struct BuildPipeline {
	artifact: PathBuf,
	pre_commands: Vec<CommandSpec>,
	build: CommandSpec,
	workdir: PathBuf,
}

impl BuildPipeline {
	pub fn new(
		artifact: PathBuf,
		pre_commands: Vec<CommandSpec>,
		build: CommandSpec,
		workdir: PathBuf,
	) -> Self {
		Self {
			artifact,
			pre_commands,
			build,
			workdir,
		}
	}

	pub fn from_config(config: &SessionConfig) -> Self {
		Self::new(
			config.artifact_path(),
			config.pre_command_specs(),
			config.build_command(),
			config.root.clone(),
		)
	}

	/// Runs every step and returns the artifact path.
	pub async fn run(&self) -> Result<PathBuf, PipelineError> {
		self.ensure_output_dir().await?;
		self.run_pre_commands().await?;
		self.build().await
	}

	pub async fn ensure_output_dir(&self) -> Result<(), PipelineError> {
		let Some(dir) = self.artifact.parent().filter(|d| !d.as_os_str().is_empty()) else {
			return Ok(());
		};
		tokio::fs::create_dir_all(dir)
			.await
			.map_err(|source| PipelineError::CreateDir {
				path: dir.to_path_buf(),
				source,
			})
	}

	pub async fn run_pre_commands(&self) -> Result<(), PipelineError> {
		for cmd in &self.pre_commands {
			tracing::info!("running {}", cmd);
			let (status, output) = self.run_captured(cmd).await?;
			if !status.success() {
				tracing::error!("{} failed ({})\n{}", cmd, status, output.combined());
				return Err(PipelineError::PreCommand {
					command: cmd.to_string(),
					status: status.to_string(),
					output,
				});
			}
			if !output.stdout.trim().is_empty() {
				tracing::debug!("{}: {}", cmd.program, output.stdout.trim_end());
			}
		}
		Ok(())
	}

	async fn build(&self) -> Result<PathBuf, PipelineError> {
		tracing::info!("building {}", self.artifact.display());
		let started = std::time::Instant::now();
		let (status, output) = self.run_captured(&self.build).await?;
		if !status.success() {
			tracing::error!("build failed ({})\n{}", status, output.combined());
			return Err(PipelineError::Build {
				command: self.build.to_string(),
				status: status.to_string(),
				output,
			});
		}
		tracing::info!(
			"built {} in {:.2}s",
			self.artifact.display(),
			started.elapsed().as_secs_f64()
		);
		Ok(self.artifact.clone())
	}

	async fn run_captured(
		&self,
		cmd: &CommandSpec,
	) -> Result<(std::process::ExitStatus, CommandOutput), PipelineError> {
		let mut command = Command::new(&cmd.program);
		command
			.args(&cmd.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		if self.workdir.is_dir() {
			command.current_dir(&self.workdir);
		}

		let output = command.output().await.map_err(|source| PipelineError::Spawn {
			command: cmd.to_string(),
			source,
		})?;
		Ok((
			output.status,
			CommandOutput::from_bytes(&output.stdout, &output.stderr),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sh(script: &str) -> CommandSpec {
		CommandSpec::new("sh", vec!["-c".into(), script.into()])
	}

	#[tokio::test]
	async fn creates_output_dir_and_builds() {
		let dir = tempfile::tempdir().unwrap();
		let artifact = dir.path().join("out").join("nested").join("app");
		let build = sh(&format!("echo built > {}", artifact.display()));
		let pipeline = BuildPipeline::new(artifact.clone(), vec![], build, dir.path().to_path_buf());

		let built = pipeline.run().await.unwrap();
		assert_eq!(built, artifact);
		assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "built\n");
	}

	#[tokio::test]
	async fn pre_commands_run_in_order_and_stop_at_first_failure() {
		let dir = tempfile::tempdir().unwrap();
		let trace = dir.path().join("trace");
		let t = trace.display();
		let pre = vec![
			sh(&format!("echo one >> {}", t)),
			sh(&format!("echo two >> {}; echo 'generate: boom' >&2; exit 3", t)),
			sh(&format!("echo three >> {}", t)),
		];
		let build = sh(&format!("echo build >> {}", t));
		let pipeline = BuildPipeline::new(dir.path().join("app"), pre, build, dir.path().to_path_buf());

		let err = pipeline.run().await.unwrap_err();
		match &err {
			PipelineError::PreCommand { output, status, .. } => {
				assert!(output.stderr.contains("generate: boom"));
				assert!(status.contains('3'));
			}
			other => panic!("unexpected error: {:?}", other),
		}
		assert_eq!(std::fs::read_to_string(&trace).unwrap(), "one\ntwo\n");
	}

	#[tokio::test]
	async fn build_failure_carries_both_streams() {
		let dir = tempfile::tempdir().unwrap();
		let build = sh("echo compiling; echo 'main.go:1: syntax error' >&2; exit 1");
		let pipeline = BuildPipeline::new(dir.path().join("app"), vec![], build, dir.path().to_path_buf());

		match pipeline.run().await.unwrap_err() {
			PipelineError::Build { output, .. } => {
				assert_eq!(output.stdout, "compiling\n");
				assert_eq!(output.stderr, "main.go:1: syntax error\n");
			}
			other => panic!("unexpected error: {:?}", other),
		}
	}

	#[tokio::test]
	async fn missing_program_is_a_spawn_error() {
		let dir = tempfile::tempdir().unwrap();
		let build = CommandSpec::new("relaunch-no-such-compiler", vec![]);
		let pipeline = BuildPipeline::new(dir.path().join("app"), vec![], build, dir.path().to_path_buf());
		assert!(matches!(pipeline.run().await, Err(PipelineError::Spawn { .. })));
	}

	#[tokio::test]
	async fn output_dir_blocked_by_file() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("out"), "not a dir").unwrap();
		let pipeline = BuildPipeline::new(
			dir.path().join("out").join("app"),
			vec![],
			sh("true"),
			dir.path().to_path_buf(),
		);
		assert!(matches!(pipeline.run().await, Err(PipelineError::CreateDir { .. })));
	}
}
