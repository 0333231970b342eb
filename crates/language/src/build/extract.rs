//! Package archive extraction.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::debug;

use crate::progress::ProgressFanout;

#[derive(Debug, Error)]
pub enum ExtractError {
	#[error("archive I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("archive entry {} escapes the target directory", .0.display())]
	UnsafeEntry(PathBuf),
	#[error("archive contains no files")]
	Empty,
}

/// Unpacks a gzip-compressed tarball into `target`, stripping the leading
/// path component of every entry (registry archives wrap their contents in a
/// single top-level directory).
///
/// Each extracted path is reported to `progress`. Links and special files are
/// skipped. On error `target` may be partially populated; callers must treat
/// it as garbage.
///
/// Blocking; run it on the blocking pool.
pub fn extract(archive: &Path, target: &Path, progress: &ProgressFanout) -> Result<usize, ExtractError> {
	let file = File::open(archive)?;
	let mut tarball = Archive::new(GzDecoder::new(BufReader::new(file)));
	fs::create_dir_all(target)?;

	let mut files = 0;
	for entry in tarball.entries()? {
		let mut entry = entry?;
		let path = entry.path()?.into_owned();
		let Some(relative) = strip_leading(&path)? else {
			continue;
		};

		let dest = target.join(&relative);
		match entry.header().entry_type() {
			EntryType::Directory => fs::create_dir_all(&dest)?,
			EntryType::Regular | EntryType::Continuous => {
				if let Some(parent) = dest.parent() {
					fs::create_dir_all(parent)?;
				}
				entry.unpack(&dest)?;
				files += 1;
			}
			other => {
				debug!(path = %path.display(), kind = ?other, "Skipping archive entry");
				continue;
			}
		}
		progress.message(relative.display().to_string());
	}

	if files == 0 {
		return Err(ExtractError::Empty);
	}
	Ok(files)
}

/// Drops the first component of `path`.
///
/// Returns `None` for the wrapper directory itself, and an error for paths
/// that could land outside the target once joined.
fn strip_leading(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
	let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
	match components.next() {
		Some(Component::Normal(_)) => {}
		None => return Ok(None),
		Some(_) => return Err(ExtractError::UnsafeEntry(path.to_path_buf())),
	}

	let mut out = PathBuf::new();
	for component in components {
		match component {
			Component::Normal(part) => out.push(part),
			_ => return Err(ExtractError::UnsafeEntry(path.to_path_buf())),
		}
	}
	Ok((!out.as_os_str().is_empty()).then_some(out))
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::build::tests::{package_archive, raw_entry_archive};
	use crate::progress::Progress;

	#[test]
	fn strips_wrapper_directory_and_reports_entries() {
		let tmp = tempfile::tempdir().unwrap();
		let archive = tmp.path().join("pkg.tgz");
		fs::write(&archive, package_archive(&[("package.json", "{}"), ("src/parser.c", "int x;"), ("grammar.js", "")])).unwrap();

		let seen = Arc::new(Mutex::new(Vec::new()));
		let s = seen.clone();
		let progress = ProgressFanout::new(Arc::new(move |p: Progress| s.lock().push(p.message)));

		let target = tmp.path().join("out");
		let count = extract(&archive, &target, &progress).unwrap();

		assert_eq!(count, 3);
		assert_eq!(fs::read_to_string(target.join("src/parser.c")).unwrap(), "int x;");
		assert!(!target.join("package").exists());
		assert_eq!(*seen.lock(), vec!["package.json", "src/parser.c", "grammar.js"]);
	}

	#[test]
	fn rejects_parent_traversal() {
		let tmp = tempfile::tempdir().unwrap();
		let archive = tmp.path().join("evil.tgz");
		fs::write(&archive, raw_entry_archive("package/../../evil.txt", "boom")).unwrap();

		let progress = ProgressFanout::new(Arc::new(crate::progress::NullProgress));
		let err = extract(&archive, &tmp.path().join("out"), &progress).unwrap_err();
		assert!(matches!(err, ExtractError::UnsafeEntry(_)));
		assert!(!tmp.path().join("evil.txt").exists());
	}

	#[test]
	fn truncated_archive_is_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		let archive = tmp.path().join("cut.tgz");
		let bytes = package_archive(&[("src/parser.c", &"x".repeat(4096))]);
		fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

		let progress = ProgressFanout::new(Arc::new(crate::progress::NullProgress));
		assert!(extract(&archive, &tmp.path().join("out"), &progress).is_err());
	}

	#[test]
	fn strip_leading_cases() {
		assert_eq!(strip_leading(Path::new("package")).unwrap(), None);
		assert_eq!(strip_leading(Path::new("package/")).unwrap(), None);
		assert_eq!(strip_leading(Path::new("./package/src/a.c")).unwrap(), Some(PathBuf::from("src/a.c")));
		assert!(strip_leading(Path::new("/etc/passwd")).is_err());
		assert!(strip_leading(Path::new("package/../x")).is_err());
	}
}
