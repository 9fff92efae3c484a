use std::path::{Component, Path, PathBuf};

/// Joins `path` onto `root` when relative and removes `.`/`..` lexically.
/// Paths are never touched on disk, so removed files still resolve.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
	if path.is_absolute() {
		normalize(path)
	} else {
		normalize(&root.join(path))
	}
}

pub fn normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				if !out.pop() {
					out.push(component);
				}
			}
			other => out.push(other),
		}
	}
	out
}

/// Component-wise prefix test: `root/foobar` is not under `root/foo`.
pub fn is_under(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}

/// `<artifact>.log`, keeping any existing extension.
pub fn default_log_path(artifact: &Path) -> PathBuf {
	let mut name = artifact.as_os_str().to_os_string();
	name.push(".log");
	PathBuf::from(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_relative_against_root() {
		let root = Path::new("/work/app");
		assert_eq!(resolve(root, Path::new("web/static")), PathBuf::from("/work/app/web/static"));
		assert_eq!(resolve(root, Path::new("./web/../api")), PathBuf::from("/work/app/api"));
		assert_eq!(resolve(root, Path::new("/abs/path")), PathBuf::from("/abs/path"));
	}

	#[test]
	fn under_is_component_wise() {
		let skip = Path::new("/work/app/foo");
		assert!(is_under(Path::new("/work/app/foo/main.go"), skip));
		assert!(is_under(Path::new("/work/app/foo"), skip));
		assert!(!is_under(Path::new("/work/app/foobar/main.go"), skip));
		assert!(!is_under(Path::new("/work/app/fo"), skip));
	}

	#[test]
	fn log_path_appends_suffix() {
		assert_eq!(default_log_path(Path::new("tmp/server")), PathBuf::from("tmp/server.log"));
		assert_eq!(default_log_path(Path::new("tmp/app.bin")), PathBuf::from("tmp/app.bin.log"));
	}
}
