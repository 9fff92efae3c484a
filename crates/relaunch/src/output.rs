use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio::sync::Mutex;

/// Chunks buffered per subscriber before the oldest are dropped.
pub(crate) const FEED_CAPACITY: usize = 4096;

/// Captured output of one child lifetime: appended to the log file and
/// fanned out to subscribers (the readiness monitor). Never echoed to the console.
#[derive(Clone)]
pub struct OutputCapture {
	log_writer: Arc<Mutex<LogWriter>>,
	sender: broadcast::Sender<Vec<u8>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
}

impl OutputCapture {
	/// Opens `path` in append mode and writes `header` as the first line.
	/// A log file that cannot be opened only costs the log, not the child.
	pub fn open(path: &Path, header: &str) -> Self {
		if let Some(parent) = path.parent() {
			let _ = fs::create_dir_all(parent);
		}

		let file = match OpenOptions::new().create(true).append(true).open(path) {
			Ok(mut f) => {
				let _ = writeln!(f, "{}", header);
				Some(f)
			}
			Err(e) => {
				tracing::warn!("cannot open log file {}: {}", path.display(), e);
				None
			}
		};

		let (sender, _) = broadcast::channel(FEED_CAPACITY);

		Self {
			log_writer: Arc::new(Mutex::new(LogWriter {
				file,
				path: path.to_path_buf(),
				bytes_written: 0,
			})),
			sender,
		}
	}

	pub async fn write(&self, data: &[u8]) {
		{
			let mut writer = self.log_writer.lock().await;
			writer.write(data);
		}

		let _ = self.sender.send(data.to_vec());
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
		self.sender.subscribe()
	}

	/// Flushes and closes the log file. Returns false if it was already closed.
	pub async fn close(&self) -> bool {
		let mut writer = self.log_writer.lock().await;
		match writer.file.take() {
			Some(mut file) => {
				let _ = file.flush();
				tracing::debug!(
					"closed {} ({} bytes captured)",
					writer.path.display(),
					writer.bytes_written
				);
				true
			}
			None => false,
		}
	}
}

impl LogWriter {
	fn write(&mut self, data: &[u8]) {
		if let Some(ref mut file) = self.file {
			if file.write_all(data).is_ok() {
				self.bytes_written += data.len() as u64;
			}
		}
	}
}

/// Copies a child stream into the capture until EOF.
pub async fn pipe_output<R: AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}
