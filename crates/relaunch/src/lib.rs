//! # relaunch
//!
//! Rebuild-and-restart loop for compiled dev servers.
//!
//! Feed a [`Session`] file change events; it debounces them, runs the
//! pre-commands and the build, replaces the running child and waits for it
//! to print a readiness line before telling the host to reload. A child that
//! crashes after becoming ready is rebuilt and restarted automatically.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relaunch::{ChangeEvent, ChangeKind, JsonLines, Session, SessionConfig};
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, watch};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SessionConfig::load("relaunch.toml".as_ref()).unwrap();
//! let session = Session::new(config, Arc::new(JsonLines::new(std::io::stdout()))).unwrap();
//!
//! let (events, rx) = mpsc::channel(256);
//! let (_shutdown, shutdown_rx) = watch::channel(false);
//! tokio::spawn(async move {
//!     let _ = events.send(ChangeEvent::new(ChangeKind::Changed, "main.go")).await;
//! });
//! session.run(rx, shutdown_rx).await;
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod process;
pub mod readiness;
pub mod restart;
pub mod runner;
pub mod session;
pub mod supervisor;
pub mod types;

pub use config::{ReadyTimeoutPolicy, SessionConfig, Timings};
pub use coordinator::{Route, Router, TriggerCoordinator};
pub use error::{ConfigError, PipelineError};
pub use host::{ChannelNotifier, HostEvent, HostNotifier, JsonLines};
pub use output::OutputCapture;
pub use pipeline::BuildPipeline;
pub use process::ProcessHandle;
pub use readiness::ReadinessMonitor;
pub use runner::{Pipeline, Runner};
pub use session::Session;
pub use supervisor::{ActiveChild, CrashReport, Supervisor, SupervisorConfig};
pub use types::*;
