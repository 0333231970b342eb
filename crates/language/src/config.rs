//! User settings: grammar overrides, ignored document types, and the
//! external commands used for acquisition.
//!
//! Settings are read from TOML:
//!
//! ```toml
//! parsers_dir = "/home/me/.cache/arbor/parsers"
//! fetch_command = "npm"
//! build_command = ["tree-sitter", "build"]
//! ignored = ["plaintext"]
//!
//! [languages.typescriptreact]
//! package = "tree-sitter-typescript"
//! subdirectory = "tsx"
//! symbol = "tree-sitter-tsx"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the settings file location.
pub const CONFIG_ENV: &str = "ARBOR_CONFIG";
/// Environment variable overriding the runtime root (parsers live in `<root>/parsers`).
pub const RUNTIME_ENV: &str = "ARBOR_RUNTIME";

/// Errors reading or parsing a settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io {
		path: PathBuf,
		error: std::io::Error,
	},
	#[error("invalid settings in {path}: {error}")]
	Parse {
		path: PathBuf,
		error: toml::de::Error,
	},
}

/// Per-document-type grammar override. Every field is optional; missing
/// fields fall back to the derived defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanguageOverride {
	pub package: Option<String>,
	pub subdirectory: Option<String>,
	pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
	/// Root of the grammar cache. Defaults to [`default_parsers_dir`].
	pub parsers_dir: Option<PathBuf>,
	/// Program used to fetch packages (`<program> pack ...`).
	pub fetch_command: String,
	/// Build program followed by its leading arguments.
	pub build_command: Vec<String>,
	/// Document types that never get a grammar.
	pub ignored: BTreeSet<String>,
	/// Overrides keyed by document type.
	pub languages: BTreeMap<String, LanguageOverride>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			parsers_dir: None,
			fetch_command: "npm".to_string(),
			build_command: vec!["tree-sitter".to_string(), "build".to_string()],
			ignored: BTreeSet::new(),
			languages: BTreeMap::new(),
		}
	}
}

impl Settings {
	/// Reads settings from `path`. A missing file yields defaults.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!(path = %path.display(), "No settings file, using defaults");
				return Ok(Self::default());
			}
			Err(error) => {
				return Err(ConfigError::Io {
					path: path.to_path_buf(),
					error,
				});
			}
		};
		Self::parse(&text).map_err(|error| ConfigError::Parse {
			path: path.to_path_buf(),
			error,
		})
	}

	pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(text)
	}

	/// Effective grammar cache root.
	pub fn parsers_dir(&self) -> PathBuf {
		self.parsers_dir.clone().unwrap_or_else(default_parsers_dir)
	}
}

/// Settings file location: `$ARBOR_CONFIG`, else `<config dir>/arbor/config.toml`.
pub fn config_path() -> PathBuf {
	if let Some(path) = std::env::var_os(CONFIG_ENV) {
		return PathBuf::from(path);
	}
	dirs::config_dir()
		.map(|d| d.join("arbor"))
		.unwrap_or_else(|| PathBuf::from(".arbor"))
		.join("config.toml")
}

/// Default grammar cache root: `$ARBOR_RUNTIME/parsers`, else `<cache dir>/arbor/parsers`.
pub fn default_parsers_dir() -> PathBuf {
	if let Some(runtime) = std::env::var_os(RUNTIME_ENV) {
		return PathBuf::from(runtime).join("parsers");
	}
	dirs::cache_dir()
		.map(|d| d.join("arbor"))
		.unwrap_or_else(|| PathBuf::from(".arbor"))
		.join("parsers")
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_is_default() {
		assert_eq!(Settings::parse("").unwrap(), Settings::default());
	}

	#[test]
	fn parses_overrides_and_commands() {
		let settings = Settings::parse(
			r#"
fetch_command = "pnpm"
build_command = ["tree-sitter", "build", "--wasm"]
ignored = ["plaintext", "log"]

[languages.typescriptreact]
package = "tree-sitter-typescript"
subdirectory = "tsx"
symbol = "tree-sitter-tsx"

[languages.cpp]
symbol = "tree-sitter-cpp"
"#,
		)
		.unwrap();

		assert_eq!(settings.fetch_command, "pnpm");
		assert_eq!(settings.build_command, ["tree-sitter", "build", "--wasm"]);
		assert!(settings.ignored.contains("log"));
		assert_eq!(
			settings.languages["typescriptreact"],
			LanguageOverride {
				package: Some("tree-sitter-typescript".into()),
				subdirectory: Some("tsx".into()),
				symbol: Some("tree-sitter-tsx".into()),
			}
		);
		assert_eq!(settings.languages["cpp"].package, None);
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(Settings::parse("fetch = \"npm\"").is_err());
		assert!(Settings::parse("[languages.rust]\npkg = \"x\"").is_err());
	}

	#[test]
	fn missing_file_yields_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
		assert_eq!(settings, Settings::default());
	}

	#[test]
	fn malformed_file_reports_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "ignored = 3").unwrap();
		let err = Settings::load(&path).unwrap_err();
		assert!(matches!(err, ConfigError::Parse { .. }));
		assert!(err.to_string().contains("config.toml"));
	}

	#[test]
	fn explicit_parsers_dir_wins() {
		let settings = Settings {
			parsers_dir: Some(PathBuf::from("/tmp/parsers")),
			..Settings::default()
		};
		assert_eq!(settings.parsers_dir(), PathBuf::from("/tmp/parsers"));
	}
}
