//! Package fetching from a package registry.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::output::{OutputTail, forward_lines};
use crate::grammar::PackageMetadata;
use crate::progress::ProgressFanout;

/// Errors from fetching a package archive.
#[derive(Debug, Error)]
pub enum FetchError {
	#[error("package {0} was not found in the registry")]
	NotFound(String),
	#[error("registry error: {0}")]
	Registry(String),
	#[error("malformed registry response: {0}")]
	Malformed(String),
	#[error("could not run {program}: {error}")]
	Unavailable { program: String, error: std::io::Error },
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// A downloaded package archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
	pub archive: PathBuf,
	pub metadata: PackageMetadata,
}

/// Retrieves a package archive by name.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
	/// Downloads `package` into `dest` and returns the archive location.
	async fn fetch(&self, package: &str, dest: &Path, progress: &ProgressFanout) -> Result<FetchedPackage, FetchError>;
}

/// Fetches packages with `npm pack`.
#[derive(Debug, Clone)]
pub struct NpmFetcher {
	program: String,
}

impl NpmFetcher {
	pub fn new(program: impl Into<String>) -> Self {
		Self { program: program.into() }
	}
}

impl Default for NpmFetcher {
	fn default() -> Self {
		Self::new("npm")
	}
}

#[async_trait]
impl PackageFetcher for NpmFetcher {
	async fn fetch(&self, package: &str, dest: &Path, progress: &ProgressFanout) -> Result<FetchedPackage, FetchError> {
		tokio::fs::create_dir_all(dest).await?;
		info!(package, program = %self.program, "Fetching package");

		let mut child = Command::new(&self.program)
			.args(["pack", "--json", "--pack-destination"])
			.arg(dest)
			.arg(package)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|error| FetchError::Unavailable {
				program: self.program.clone(),
				error,
			})?;

		let mut stdout = child.stdout.take().ok_or_else(|| FetchError::Registry("stdout not captured".into()))?;
		let stderr = child.stderr.take().ok_or_else(|| FetchError::Registry("stderr not captured".into()))?;

		let tail = OutputTail::default();
		let mut json = String::new();
		let (read, forwarded) = tokio::join!(stdout.read_to_string(&mut json), forward_lines(stderr, progress, &tail));
		read?;
		forwarded?;
		let status = child.wait().await?;

		if !status.success() {
			if tail.contains("E404") || tail.contains("404 Not Found") {
				return Err(FetchError::NotFound(package.to_string()));
			}
			return Err(FetchError::Registry(format!("{} exited with {status}: {}", self.program, tail.joined())));
		}

		let metadata = parse_pack_output(package, &json)?;
		let archive = dest.join(&metadata.filename);
		if !archive.is_file() {
			return Err(FetchError::Malformed(format!("reported archive {} does not exist", archive.display())));
		}
		debug!(package, archive = %archive.display(), version = %metadata.version, "Fetched package");
		Ok(FetchedPackage { archive, metadata })
	}
}

#[derive(Deserialize)]
struct PackEntry {
	name: String,
	version: String,
	filename: String,
	#[serde(default)]
	integrity: Option<String>,
}

/// Parses the JSON list printed by `npm pack --json`.
///
/// The list must hold exactly one entry for the requested package. Lifecycle
/// scripts may print before the JSON, so parsing starts at the first `[`.
pub(crate) fn parse_pack_output(package: &str, output: &str) -> Result<PackageMetadata, FetchError> {
	let start = output
		.find('[')
		.ok_or_else(|| FetchError::Malformed("no JSON result list in output".into()))?;
	let entries: Vec<PackEntry> = serde_json::from_str(&output[start..]).map_err(|e| FetchError::Malformed(e.to_string()))?;

	let entry = match <[PackEntry; 1]>::try_from(entries) {
		Ok([entry]) => entry,
		Err(entries) if entries.is_empty() => return Err(FetchError::Malformed("empty result list".into())),
		Err(entries) => return Err(FetchError::Malformed(format!("expected one result, got {}", entries.len()))),
	};

	let wanted = package_name(package);
	if entry.name != wanted {
		return Err(FetchError::Malformed(format!("requested {wanted}, registry returned {}", entry.name)));
	}
	if entry.filename.is_empty() || entry.filename.contains(['/', '\\']) {
		return Err(FetchError::Malformed(format!("invalid archive name {:?}", entry.filename)));
	}

	Ok(PackageMetadata {
		name: entry.name,
		version: entry.version,
		filename: entry.filename,
		integrity: entry.integrity,
	})
}

/// Strips a version or tag suffix: `@scope/pkg@1.2` becomes `@scope/pkg`.
fn package_name(spec: &str) -> &str {
	let search_from = usize::from(spec.starts_with('@'));
	match spec[search_from..].find('@') {
		Some(at) => &spec[..search_from + at],
		None => spec,
	}
}
