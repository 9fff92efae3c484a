use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use relaunch::{ChangeEvent, ChangeKind};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Keeps the OS watch alive; dropping it ends the event stream.
pub struct FileWatcher {
	_watcher: RecommendedWatcher,
	roots: Vec<PathBuf>,
}

impl FileWatcher {
	/// Watches every root recursively and forwards raw events into `tx`.
	pub fn start(roots: Vec<PathBuf>, tx: mpsc::Sender<ChangeEvent>) -> Result<Self> {
		let mut watcher = RecommendedWatcher::new(
			move |res: notify::Result<Event>| match res {
				Ok(event) => {
					for change in changes(event) {
						if tx.blocking_send(change).is_err() {
							return;
						}
					}
				}
				Err(e) => tracing::warn!("watch error: {}", e),
			},
			Config::default(),
		)
		.context("failed to create file watcher")?;

		for root in &roots {
			if !root.exists() {
				tracing::warn!("watch path {} does not exist, skipping", root.display());
				continue;
			}
			watcher
				.watch(root, RecursiveMode::Recursive)
				.with_context(|| format!("failed to watch {}", root.display()))?;
			tracing::debug!("watching {}", root.display());
		}

		Ok(Self {
			_watcher: watcher,
			roots,
		})
	}

	pub fn roots(&self) -> &[PathBuf] {
		&self.roots
	}
}

fn changes(event: Event) -> Vec<ChangeEvent> {
	let kind = match event.kind {
		EventKind::Create(_) => ChangeKind::Added,
		EventKind::Modify(_) => ChangeKind::Changed,
		EventKind::Remove(_) => ChangeKind::Removed,
		_ => return Vec::new(),
	};
	event
		.paths
		.into_iter()
		.map(|path| ChangeEvent::new(kind, path))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
	use std::time::Duration;

	#[test]
	fn maps_event_kinds() {
		let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/w/a.go".into());
		assert_eq!(changes(event), vec![ChangeEvent::new(ChangeKind::Added, "/w/a.go")]);

		let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
			.add_path("/w/a.go".into())
			.add_path("/w/b.go".into());
		let mapped = changes(event);
		assert_eq!(mapped.len(), 2);
		assert!(mapped.iter().all(|c| c.kind == ChangeKind::Changed));

		let event = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/w/a.go".into());
		assert_eq!(changes(event)[0].kind, ChangeKind::Removed);

		let event = Event::new(EventKind::Access(AccessKind::Any)).add_path("/w/a.go".into());
		assert!(changes(event).is_empty());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn forwards_writes() {
		let dir = tempfile::tempdir().unwrap();
		let (tx, mut rx) = mpsc::channel(64);
		let watcher = FileWatcher::start(vec![dir.path().to_path_buf()], tx).unwrap();
		assert_eq!(watcher.roots().len(), 1);
		tokio::time::sleep(Duration::from_millis(100)).await;

		let file = dir.path().join("main.go");
		std::fs::write(&file, "package main\n").unwrap();

		let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("no change event")
			.unwrap();
		assert!(event.path.ends_with("main.go"));
	}
}
