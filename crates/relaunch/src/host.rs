use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::PipelineError;

/// Signals sent to whatever hosts the dev loop (a dev server, an editor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
	Reload { path: String },
	Error { message: String, stack: String, id: String },
}

impl HostEvent {
	pub fn reload() -> Self {
		HostEvent::Reload { path: "*".into() }
	}

	pub fn error(err: &PipelineError, id: impl Into<String>) -> Self {
		HostEvent::Error {
			message: err.to_string(),
			stack: err.detail(),
			id: id.into(),
		}
	}
}

pub trait HostNotifier: Send + Sync {
	fn notify(&self, event: HostEvent);
}

/// Writes one JSON object per line, e.g. to stdout for a parent process.
pub struct JsonLines<W> {
	writer: Mutex<W>,
}

impl<W: Write + Send> JsonLines<W> {
	pub fn new(writer: W) -> Self {
		Self {
			writer: Mutex::new(writer),
		}
	}
}

impl<W: Write + Send> HostNotifier for JsonLines<W> {
	fn notify(&self, event: HostEvent) {
		let mut data = match serde_json::to_vec(&event) {
			Ok(d) => d,
			Err(e) => {
				tracing::error!("failed to serialize host event: {}", e);
				return;
			}
		};
		data.push(b'\n');

		let Ok(mut writer) = self.writer.lock() else {
			return;
		};
		if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
			tracing::warn!("failed to deliver host event: {}", e);
		}
	}
}

/// Forwards events into a channel; for embedding and tests.
pub struct ChannelNotifier {
	tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelNotifier {
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

impl HostNotifier for ChannelNotifier {
	fn notify(&self, event: HostEvent) {
		let _ = self.tx.send(event);
	}
}
