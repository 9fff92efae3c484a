use regex::Regex;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::process::{wait_exit, ProcessHandle};
use crate::types::{ChildExit, Readiness};

/// Longest partial line kept between chunks.
const MAX_CARRY: usize = 8 * 1024;

/// Decides when a freshly spawned child counts as ready.
#[derive(Debug, Clone)]
pub struct ReadinessMonitor {
	pattern: Option<Regex>,
	timeout: Duration,
}

impl ReadinessMonitor {
	pub fn new(pattern: Option<Regex>, timeout: Duration) -> Self {
		Self { pattern, timeout }
	}

	/// Output only needs capturing when there is something to match.
	pub fn captures_output(&self) -> bool {
		self.pattern.is_some()
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Waits for readiness. A timeout is not a failure: it resolves as
	/// [`Readiness::TimedOut`]. An exit first resolves as `Err`.
	pub async fn wait(&self, handle: &mut ProcessHandle) -> Result<Readiness, ChildExit> {
		if let Some(exit) = handle.exit_status() {
			return Err(exit);
		}

		let Some(pattern) = &self.pattern else {
			tracing::debug!("pid {} ready on spawn", handle.pid());
			return Ok(Readiness::Spawned);
		};

		let Some(mut feed) = handle.take_output() else {
			tracing::warn!("pid {}: output not captured, cannot match readiness pattern", handle.pid());
			return Ok(Readiness::Spawned);
		};

		let pid = handle.pid();
		let mut exit = handle.exit_watch();
		let deadline = tokio::time::sleep(self.timeout);
		tokio::pin!(deadline);

		let mut carry = String::new();
		let mut feed_open = true;

		loop {
			tokio::select! {
				biased;
				chunk = feed.recv(), if feed_open => match chunk {
					Ok(bytes) => {
						if scan(pattern, &mut carry, &bytes) {
							tracing::info!("pid {} ready (matched /{}/)", pid, pattern);
							return Ok(Readiness::Matched);
						}
					}
					Err(RecvError::Lagged(n)) => {
						tracing::warn!(
							"pid {}: output outpaced the readiness monitor, {} chunks not scanned",
							pid,
							n
						);
						carry.clear();
					}
					Err(RecvError::Closed) => feed_open = false,
				},
				status = wait_exit(&mut exit, pid) => return Err(status),
				_ = &mut deadline => {
					tracing::warn!(
						"pid {}: /{}/ not seen within {}ms, assuming ready",
						pid,
						pattern,
						self.timeout.as_millis()
					);
					return Ok(Readiness::TimedOut);
				}
			}
		}
	}
}

/// Tests `chunk` (prefixed by the unfinished line of earlier chunks) against
/// `pattern`, then keeps the new unfinished line in `carry`.
fn scan(pattern: &Regex, carry: &mut String, chunk: &[u8]) -> bool {
	carry.push_str(&String::from_utf8_lossy(chunk));
	if pattern.is_match(carry) {
		return true;
	}

	match carry.rfind('\n') {
		Some(pos) => {
			carry.drain(..=pos);
		}
		None if carry.len() > MAX_CARRY => {
			let mut cut = carry.len() - MAX_CARRY;
			while !carry.is_char_boundary(cut) {
				cut += 1;
			}
			carry.drain(..cut);
		}
		None => {}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::{broadcast, watch};

	#[test]
	fn matches_within_chunk() {
		let re = Regex::new("Server started").unwrap();
		let mut carry = String::new();
		assert!(!scan(&re, &mut carry, b"booting\n"));
		assert!(carry.is_empty());
		assert!(scan(&re, &mut carry, b"2026/10/16 Server started on port 8080\n"));
	}

	#[test]
	fn matches_across_chunk_boundary() {
		let re = Regex::new("Server started").unwrap();
		let mut carry = String::new();
		assert!(!scan(&re, &mut carry, b"log: Server st"));
		assert_eq!(carry, "log: Server st");
		assert!(scan(&re, &mut carry, b"arted\n"));
	}

	#[test]
	fn carry_is_bounded() {
		let re = Regex::new("never").unwrap();
		let mut carry = String::new();
		let big = vec![b'x'; MAX_CARRY * 2];
		assert!(!scan(&re, &mut carry, &big));
		assert_eq!(carry.len(), MAX_CARRY);
	}

	#[tokio::test]
	async fn keeps_scanning_after_lag() {
		let (feed_tx, feed_rx) = broadcast::channel(4);
		let (_exit_tx, exit_rx) = watch::channel(None);
		let mut handle = ProcessHandle::new(1, 4242, exit_rx, Some(feed_rx));

		for i in 0..16 {
			feed_tx.send(format!("request {}\n", i).into_bytes()).unwrap();
		}
		feed_tx.send(b"Server started\n".to_vec()).unwrap();

		let monitor = ReadinessMonitor::new(
			Some(Regex::new("Server started").unwrap()),
			Duration::from_secs(2),
		);
		assert_eq!(monitor.wait(&mut handle).await, Ok(Readiness::Matched));
	}

	#[test]
	fn captures_only_with_pattern() {
		let timeout = Duration::from_secs(1);
		assert!(!ReadinessMonitor::new(None, timeout).captures_output());
		let re = Regex::new("ready").unwrap();
		assert!(ReadinessMonitor::new(Some(re), timeout).captures_output());
	}
}
