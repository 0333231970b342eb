//! Grammar acquisition: fetch, extract, and build on demand.
//!
//! Each [`GrammarKey`] moves through
//! `Pending → Downloading → Extracting → Building → Done`, with `Failed`
//! reachable from every working stage. At most one job runs per key; later
//! requesters attach to the running job and observe its outcome.
//!
//! A failed job removes its package directory before it is published as
//! failed, so the next request starts from nothing instead of resuming.

mod compile;
mod extract;
mod fetch;
mod output;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use compile::{BuildError, CommandBuilder, GrammarBuilder};
pub use extract::{ExtractError, extract};
pub use fetch::{FetchError, FetchedPackage, NpmFetcher, PackageFetcher};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::grammar::{ArtifactRecord, GrammarCache};
use crate::key::GrammarKey;
use crate::progress::{ProgressFanout, ProgressSink};

/// Scratch directory inside a package directory that receives the archive.
const DOWNLOAD_DIR: &str = ".download";

/// A failed acquisition stage.
#[derive(Debug, Error)]
pub enum AcquireError {
	#[error("failed to fetch {package}: {source}")]
	Fetch { package: String, source: FetchError },
	#[error("failed to extract {}: {source}", archive.display())]
	Extract { archive: PathBuf, source: ExtractError },
	#[error("failed to build {key}: {source}")]
	Build { key: GrammarKey, source: BuildError },
	#[error("grammar cache error at {}: {source}", path.display())]
	Io { path: PathBuf, source: std::io::Error },
	#[error("acquisition of {0} stopped before finishing")]
	Aborted(GrammarKey),
}

/// Observable state of an acquisition job.
#[derive(Debug, Clone)]
pub enum JobStatus {
	Pending,
	Downloading,
	Extracting,
	Building,
	Done(ArtifactRecord),
	Failed(Arc<AcquireError>),
}

impl JobStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Done(_) | Self::Failed(_))
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Downloading => "downloading",
			Self::Extracting => "extracting",
			Self::Building => "building",
			Self::Done(_) => "done",
			Self::Failed(_) => "failed",
		}
	}
}

struct Job {
	id: u64,
	status: watch::Receiver<JobStatus>,
	progress: Arc<ProgressFanout>,
}

/// Single-flight grammar acquisition over a [`GrammarCache`].
///
/// Cloning is cheap; clones share the in-flight job table.
#[derive(Clone)]
pub struct GrammarAcquirer {
	inner: Arc<AcquirerInner>,
}

struct AcquirerInner {
	cache: Arc<GrammarCache>,
	fetcher: Arc<dyn PackageFetcher>,
	builder: Arc<dyn GrammarBuilder>,
	jobs: Mutex<HashMap<GrammarKey, Job>>,
	next_id: AtomicU64,
}

impl GrammarAcquirer {
	pub fn new(cache: Arc<GrammarCache>, fetcher: Arc<dyn PackageFetcher>, builder: Arc<dyn GrammarBuilder>) -> Self {
		Self {
			inner: Arc::new(AcquirerInner {
				cache,
				fetcher,
				builder,
				jobs: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
			}),
		}
	}

	pub fn cache(&self) -> &Arc<GrammarCache> {
		&self.inner.cache
	}

	/// Status of the in-flight job for `key`, if any.
	///
	/// Finished jobs leave the table before publishing their outcome, so this
	/// never reports a terminal state.
	pub fn status(&self, key: &GrammarKey) -> Option<JobStatus> {
		self.inner.jobs.lock().get(key).map(|job| job.status.borrow().clone())
	}

	/// Ensures a built artifact exists for `key`, acquiring it if needed.
	///
	/// Concurrent calls for the same key share one job. The job runs on its
	/// own task: dropping the returned future abandons interest but does not
	/// stop the job.
	///
	/// # Panics
	///
	/// Panics if called outside a Tokio runtime.
	pub async fn acquire(&self, key: &GrammarKey, sink: Arc<dyn ProgressSink>) -> Result<ArtifactRecord, Arc<AcquireError>> {
		let joined = {
			let mut jobs = self.inner.jobs.lock();
			if let Some(job) = jobs.get(key) {
				debug!(grammar = %key, "Joining in-flight acquisition");
				job.progress.attach(sink);
				Some(job.status.clone())
			} else if self.inner.cache.artifact_path(key).is_file() {
				None
			} else {
				let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
				let (tx, rx) = watch::channel(JobStatus::Pending);
				let progress = Arc::new(ProgressFanout::new(sink));
				jobs.insert(
					key.clone(),
					Job {
						id,
						status: rx.clone(),
						progress: progress.clone(),
					},
				);
				tokio::spawn(self.inner.clone().run(id, key.clone(), tx, progress));
				Some(rx)
			}
		};
		let Some(mut status) = joined else {
			return self.inner.existing_record(key).await.map_err(Arc::new);
		};

		let outcome = status.wait_for(JobStatus::is_terminal).await;
		match outcome.as_deref() {
			Ok(JobStatus::Done(record)) => Ok(record.clone()),
			Ok(JobStatus::Failed(error)) => Err(error.clone()),
			_ => Err(Arc::new(AcquireError::Aborted(key.clone()))),
		}
	}
}

/// Removes a job's table entry if its task ends without doing so itself.
struct JobGuard {
	inner: Arc<AcquirerInner>,
	key: GrammarKey,
	id: u64,
}

impl Drop for JobGuard {
	fn drop(&mut self) {
		self.inner.remove_job(&self.key, self.id);
	}
}

impl AcquirerInner {
	fn remove_job(&self, key: &GrammarKey, id: u64) {
		let mut jobs = self.jobs.lock();
		if jobs.get(key).is_some_and(|job| job.id == id) {
			jobs.remove(key);
		}
	}

	async fn run(self: Arc<Self>, id: u64, key: GrammarKey, tx: watch::Sender<JobStatus>, progress: Arc<ProgressFanout>) {
		let _guard = JobGuard {
			inner: self.clone(),
			key: key.clone(),
			id,
		};
		info!(grammar = %key, "Acquiring grammar");

		let terminal = match self.stages(&key, &tx, &progress).await {
			Ok(record) => {
				info!(grammar = %key, artifact = %record.artifact_path.display(), "Grammar ready");
				progress.message(format!("Installed {key}"));
				JobStatus::Done(record)
			}
			Err(error) => {
				warn!(grammar = %key, error = %error, "Grammar acquisition failed");
				if let Err(e) = self.discard(&key).await {
					warn!(grammar = %key, error = %e, "Failed to discard partial grammar directory");
				}
				progress.message(format!("Failed to install {key}"));
				JobStatus::Failed(Arc::new(error))
			}
		};

		// Leave the table first: a requester arriving after the outcome is
		// visible must start a new job or find the artifact, never join this one.
		self.remove_job(&key, id);
		tx.send_replace(terminal);
	}

	async fn stages(&self, key: &GrammarKey, tx: &watch::Sender<JobStatus>, progress: &Arc<ProgressFanout>) -> Result<ArtifactRecord, AcquireError> {
		let package_dir = self.cache.package_dir(key);
		let artifact = self.cache.artifact_path(key);
		let io_err = |path: &PathBuf| {
			let path = path.clone();
			move |source| AcquireError::Io { path, source }
		};

		// A directory without an artifact is debris from an interrupted run.
		self.discard(key).await.map_err(io_err(&package_dir))?;
		let download_dir = package_dir.join(DOWNLOAD_DIR);
		tokio::fs::create_dir_all(&download_dir).await.map_err(io_err(&download_dir))?;

		set_status(tx, key, JobStatus::Downloading);
		progress.message(format!("Downloading {}", key.package));
		let fetched = self
			.fetcher
			.fetch(&key.package, &download_dir, progress)
			.await
			.map_err(|source| AcquireError::Fetch {
				package: key.package.clone(),
				source,
			})?;

		set_status(tx, key, JobStatus::Extracting);
		progress.message(format!("Extracting {}", fetched.metadata.filename));
		let archive = fetched.archive.clone();
		let extracted = {
			let (archive, target, progress) = (archive.clone(), package_dir.clone(), progress.clone());
			tokio::task::spawn_blocking(move || extract(&archive, &target, &progress))
				.await
				.unwrap_or_else(|join| Err(ExtractError::Io(std::io::Error::other(join))))
		};
		let files = extracted.map_err(|source| AcquireError::Extract {
			archive: archive.clone(),
			source,
		})?;
		debug!(grammar = %key, files, "Extracted package");
		tokio::fs::remove_dir_all(&download_dir).await.map_err(io_err(&download_dir))?;

		set_status(tx, key, JobStatus::Building);
		progress.message(format!("Building {key}"));
		self.builder
			.build(&package_dir, key.subdirectory.as_deref(), &artifact, progress)
			.await
			.map_err(|source| AcquireError::Build { key: key.clone(), source })?;
		if !artifact.is_file() {
			return Err(AcquireError::Build {
				key: key.clone(),
				source: BuildError::MissingArtifact(artifact),
			});
		}

		let record = ArtifactRecord {
			key: key.clone(),
			package_dir: package_dir.clone(),
			artifact_path: artifact,
			source: Some(fetched.metadata),
		};
		self.write_record(record).await.map_err(io_err(&package_dir))
	}

	/// Record for an artifact that is already built, writing one if missing.
	async fn existing_record(&self, key: &GrammarKey) -> Result<ArtifactRecord, AcquireError> {
		let cache = self.cache.clone();
		let lookup = key.clone();
		let found = blocking(move || Ok(cache.record(&lookup))).await;
		if let Ok(Some(record)) = found {
			return Ok(record);
		}
		let package_dir = self.cache.package_dir(key);
		let record = ArtifactRecord {
			key: key.clone(),
			package_dir: package_dir.clone(),
			artifact_path: self.cache.artifact_path(key),
			source: None,
		};
		self.write_record(record)
			.await
			.map_err(|source| AcquireError::Io { path: package_dir, source })
	}

	async fn discard(&self, key: &GrammarKey) -> std::io::Result<()> {
		let cache = self.cache.clone();
		let key = key.clone();
		blocking(move || cache.discard(&key)).await
	}

	async fn write_record(&self, record: ArtifactRecord) -> std::io::Result<ArtifactRecord> {
		let cache = self.cache.clone();
		blocking(move || cache.write_record(&record).map(|()| record)).await
	}
}

/// Runs cache filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> std::io::Result<T>
where
	F: FnOnce() -> std::io::Result<T> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(work).await.unwrap_or_else(|join| Err(std::io::Error::other(join)))
}

fn set_status(tx: &watch::Sender<JobStatus>, key: &GrammarKey, status: JobStatus) {
	debug!(grammar = %key, stage = status.label(), "Acquisition stage");
	tx.send_replace(status);
}
