//! Document type to ready grammar, acquiring on demand.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::build::{AcquireError, CommandBuilder, GrammarAcquirer, GrammarBuilder, NpmFetcher, PackageFetcher};
use crate::config::Settings;
use crate::grammar::{Grammar, GrammarCache, GrammarError};
use crate::key::GrammarKey;
use crate::progress::ProgressSink;
use crate::registry::{LanguageRegistry, Resolution};

/// Outcome of preparing a grammar for a document type.
#[derive(Debug, Clone)]
pub enum Prepared {
	Ready(Grammar),
	/// The document type is opted out; no grammar and no error.
	Ignored,
}

/// Why a grammar could not be prepared.
#[derive(Debug, Error)]
pub enum PrepareFailure {
	#[error(transparent)]
	Acquire(Arc<AcquireError>),
	#[error(transparent)]
	Load(#[from] GrammarError),
	#[error("grammar load task failed: {0}")]
	Task(String),
}

/// The single user-facing failure for a document type.
#[derive(Debug, Error)]
#[error("could not prepare grammar for document type '{language_id}'")]
pub struct PrepareError {
	pub language_id: String,
	pub key: GrammarKey,
	#[source]
	pub source: PrepareFailure,
}

/// Supplies grammars to parse sessions.
#[async_trait]
pub trait GrammarResolver: Send + Sync {
	async fn grammar_for(&self, language_id: &str, progress: Arc<dyn ProgressSink>) -> Result<Prepared, PrepareError>;
}

/// Registry, cache, and acquirer wired together.
#[derive(Clone)]
pub struct GrammarProvider {
	registry: Arc<LanguageRegistry>,
	acquirer: GrammarAcquirer,
}

impl GrammarProvider {
	pub fn new(registry: LanguageRegistry, cache: Arc<GrammarCache>, fetcher: Arc<dyn PackageFetcher>, builder: Arc<dyn GrammarBuilder>) -> Self {
		Self {
			registry: Arc::new(registry),
			acquirer: GrammarAcquirer::new(cache, fetcher, builder),
		}
	}

	/// Provider using `npm pack` and the configured build command.
	pub fn from_settings(settings: &Settings) -> Self {
		let builder = CommandBuilder::from_command_line(&settings.build_command).unwrap_or_default();
		Self::new(
			LanguageRegistry::from_settings(settings),
			Arc::new(GrammarCache::new(settings.parsers_dir())),
			Arc::new(NpmFetcher::new(settings.fetch_command.clone())),
			Arc::new(builder),
		)
	}

	pub fn registry(&self) -> &LanguageRegistry {
		&self.registry
	}

	pub fn cache(&self) -> &Arc<GrammarCache> {
		self.acquirer.cache()
	}

	pub fn acquirer(&self) -> &GrammarAcquirer {
		&self.acquirer
	}

	/// Loads `key`, acquiring it first on a cache miss.
	pub async fn prepare_key(&self, key: &GrammarKey, progress: Arc<dyn ProgressSink>) -> Result<Grammar, PrepareFailure> {
		match self.load(key).await {
			Err(PrepareFailure::Load(GrammarError::NotFound(_))) => {
				info!(grammar = %key, "Grammar not installed, acquiring");
			}
			other => return other,
		}
		self.acquirer.acquire(key, progress).await.map_err(PrepareFailure::Acquire)?;
		self.load(key).await
	}

	async fn load(&self, key: &GrammarKey) -> Result<Grammar, PrepareFailure> {
		let cache = self.cache().clone();
		let key = key.clone();
		tokio::task::spawn_blocking(move || cache.load(&key))
			.await
			.map_err(|e| PrepareFailure::Task(e.to_string()))?
			.map_err(PrepareFailure::Load)
	}
}

#[async_trait]
impl GrammarResolver for GrammarProvider {
	async fn grammar_for(&self, language_id: &str, progress: Arc<dyn ProgressSink>) -> Result<Prepared, PrepareError> {
		let key = match self.registry.resolve(language_id) {
			Resolution::Ignored => return Ok(Prepared::Ignored),
			Resolution::Grammar(key) => key,
		};
		match self.prepare_key(&key, progress).await {
			Ok(grammar) => Ok(Prepared::Ready(grammar)),
			Err(source) => {
				warn!(language = language_id, grammar = %key, error = %source, "Could not prepare grammar");
				Err(PrepareError {
					language_id: language_id.to_string(),
					key,
					source,
				})
			}
		}
	}
}
