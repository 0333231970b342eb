//! Grammar cache and dynamic grammar loading.
//!
//! The cache is a directory with one subdirectory per [`GrammarKey`]. Each
//! subdirectory holds the extracted package sources, the built shared library,
//! and an [`ArtifactRecord`] describing them.
//!
//! # Completion
//!
//! A key counts as present only when its built artifact file exists. The
//! package directory alone proves nothing: a failed acquisition can leave it
//! half populated.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::Language;
use tree_sitter_language::LanguageFn;

use crate::key::GrammarKey;

/// Name of the record file inside a package directory.
pub const RECORD_FILE: &str = "artifact.json";

/// Errors that can occur when loading a grammar.
#[derive(Error, Debug)]
pub enum GrammarError {
	/// No built artifact for the key. A cache miss, not yet a failure.
	#[error("grammar {0} is not installed")]
	NotFound(GrammarKey),

	/// The artifact exists but could not be opened or lacks its entry point.
	#[error("failed to load grammar library {}: {reason}", path.display())]
	LoadFailed { path: PathBuf, reason: String },

	/// The artifact was built against an unsupported parser ABI.
	#[error("grammar {key} has ABI version {version}, supported range is {min}..={max}")]
	Incompatible {
		key: GrammarKey,
		version: usize,
		min: usize,
		max: usize,
	},
}

/// Where a loaded grammar came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarSource {
	/// Shared library in the cache.
	Library(PathBuf),
	/// Grammar linked into the binary.
	Builtin,
}

/// Shareable handle to a loaded grammar.
///
/// Handles are only produced by [`GrammarCache`]. Cloning is cheap and every
/// clone keeps the backing library mapped, so parsers and trees built from the
/// handle stay valid for as long as any clone is alive.
#[derive(Clone)]
pub struct Grammar {
	inner: Arc<GrammarInner>,
}

// Field order matters: the language must drop before the library backing it.
struct GrammarInner {
	key: GrammarKey,
	language: Language,
	source: GrammarSource,
	_library: Option<Library>,
}

impl Grammar {
	pub fn key(&self) -> &GrammarKey {
		&self.inner.key
	}

	pub fn language(&self) -> &Language {
		&self.inner.language
	}

	pub fn source(&self) -> &GrammarSource {
		&self.inner.source
	}

	pub fn abi_version(&self) -> usize {
		self.inner.language.abi_version()
	}

	/// True if both handles refer to the same loaded grammar.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for Grammar {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Grammar")
			.field("key", &self.inner.key)
			.field("source", &self.inner.source)
			.field("abi_version", &self.abi_version())
			.finish()
	}
}

/// Registry metadata for the package an artifact was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
	pub name: String,
	pub version: String,
	/// Archive file name as reported by the registry.
	pub filename: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub integrity: Option<String>,
}

/// On-disk description of a built grammar. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
	pub key: GrammarKey,
	pub package_dir: PathBuf,
	pub artifact_path: PathBuf,
	/// Absent when the artifact predates its record.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source: Option<PackageMetadata>,
}

/// Directory-backed cache of built grammars plus an in-memory table of
/// loaded handles.
pub struct GrammarCache {
	root: PathBuf,
	builtins: RwLock<HashMap<GrammarKey, Language>>,
	loaded: RwLock<HashMap<GrammarKey, Grammar>>,
}

impl GrammarCache {
	/// Opens a cache rooted at `root`.
	///
	/// A relative root is anchored to the current directory: build commands
	/// run inside package directories and must receive absolute artifact paths.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		let root = std::path::absolute(&root).unwrap_or(root);
		Self {
			root,
			builtins: RwLock::new(HashMap::new()),
			loaded: RwLock::new(HashMap::new()),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Registers a statically linked grammar under `key`.
	///
	/// Builtins satisfy [`has`](Self::has) and [`load`](Self::load) without
	/// touching the filesystem.
	pub fn register_builtin(&self, key: GrammarKey, language: LanguageFn) {
		self.builtins.write().insert(key, Language::new(language));
	}

	pub fn package_dir(&self, key: &GrammarKey) -> PathBuf {
		self.root.join(key.dir_name())
	}

	pub fn artifact_path(&self, key: &GrammarKey) -> PathBuf {
		self.package_dir(key).join(key.artifact_file_name())
	}

	pub fn record_path(&self, key: &GrammarKey) -> PathBuf {
		self.package_dir(key).join(RECORD_FILE)
	}

	/// True if a loadable artifact exists for `key`.
	pub fn has(&self, key: &GrammarKey) -> bool {
		self.builtins.read().contains_key(key) || self.artifact_path(key).is_file()
	}

	/// Loads the grammar for `key`, reusing an already-loaded handle.
	pub fn load(&self, key: &GrammarKey) -> Result<Grammar, GrammarError> {
		if let Some(grammar) = self.loaded.read().get(key) {
			return Ok(grammar.clone());
		}

		let grammar = match self.builtins.read().get(key) {
			Some(language) => Grammar {
				inner: Arc::new(GrammarInner {
					key: key.clone(),
					language: language.clone(),
					source: GrammarSource::Builtin,
					_library: None,
				}),
			},
			None => self.load_library(key)?,
		};

		// A concurrent loader may have won; keep whichever handle landed first.
		let mut loaded = self.loaded.write();
		Ok(loaded.entry(key.clone()).or_insert(grammar).clone())
	}

	fn load_library(&self, key: &GrammarKey) -> Result<Grammar, GrammarError> {
		let path = self.artifact_path(key);
		if !path.is_file() {
			return Err(GrammarError::NotFound(key.clone()));
		}

		let load_failed = |reason: String| GrammarError::LoadFailed { path: path.clone(), reason };

		// SAFETY: the library is a tree-sitter grammar built by the acquisition
		// pipeline. Its initializers are the parser's static tables.
		let library = unsafe { Library::new(&path) }.map_err(|e| load_failed(e.to_string()))?;

		let symbol = key.symbol_name();
		// SAFETY: tree-sitter grammars export `const TSLanguage *tree_sitter_<name>(void)`.
		// The returned pointer refers to static data owned by `library`, which the
		// handle keeps alive.
		let language = unsafe {
			let func: Symbol<unsafe extern "C" fn() -> *const ()> = library
				.get(symbol.as_bytes())
				.map_err(|e| load_failed(format!("missing symbol {symbol}: {e}")))?;
			Language::new(LanguageFn::from_raw(*func))
		};

		check_abi(key, language.abi_version())?;
		debug!(grammar = %key, path = %path.display(), abi = language.abi_version(), "Loaded grammar library");

		Ok(Grammar {
			inner: Arc::new(GrammarInner {
				key: key.clone(),
				language,
				source: GrammarSource::Library(path),
				_library: Some(library),
			}),
		})
	}

	/// Reads the artifact record for `key`, if one exists and parses.
	pub fn record(&self, key: &GrammarKey) -> Option<ArtifactRecord> {
		read_record(&self.record_path(key))
	}

	/// Replaces the record for `key` atomically (write to a temporary file, then rename).
	pub fn write_record(&self, record: &ArtifactRecord) -> std::io::Result<()> {
		let path = self.record_path(&record.key);
		let tmp = path.with_extension("json.tmp");
		let bytes = serde_json::to_vec_pretty(record).map_err(std::io::Error::other)?;
		std::fs::write(&tmp, bytes)?;
		std::fs::rename(&tmp, &path)
	}

	/// Removes everything cached for `key`, on disk and in memory.
	///
	/// Handles already given out stay valid.
	pub fn discard(&self, key: &GrammarKey) -> std::io::Result<()> {
		self.loaded.write().remove(key);
		let dir = self.package_dir(key);
		match std::fs::remove_dir_all(&dir) {
			Ok(()) => {
				debug!(grammar = %key, dir = %dir.display(), "Discarded grammar directory");
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e),
		}
	}

	/// Records of every installed grammar, sorted by package directory.
	pub fn installed(&self) -> Vec<ArtifactRecord> {
		let Ok(entries) = std::fs::read_dir(&self.root) else {
			return Vec::new();
		};
		let mut records: Vec<_> = entries
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| read_record(&entry.path().join(RECORD_FILE)))
			.filter(|record| record.artifact_path.is_file())
			.collect();
		records.sort_by(|a, b| a.package_dir.cmp(&b.package_dir));
		records
	}
}

fn read_record(path: &Path) -> Option<ArtifactRecord> {
	let bytes = std::fs::read(path).ok()?;
	match serde_json::from_slice(&bytes) {
		Ok(record) => Some(record),
		Err(e) => {
			warn!(path = %path.display(), error = %e, "Ignoring unreadable artifact record");
			None
		}
	}
}

fn check_abi(key: &GrammarKey, version: usize) -> Result<(), GrammarError> {
	let (min, max) = (tree_sitter::MIN_COMPATIBLE_LANGUAGE_VERSION, tree_sitter::LANGUAGE_VERSION);
	if (min..=max).contains(&version) {
		Ok(())
	} else {
		Err(GrammarError::Incompatible {
			key: key.clone(),
			version,
			min,
			max,
		})
	}
}
