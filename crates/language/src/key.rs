//! Grammar identity and the naming conventions derived from it.
//!
//! A [`GrammarKey`] names one buildable grammar: a registry package, an
//! optional subdirectory inside that package (for packages that bundle
//! several dialects), and an optional exported symbol. Every on-disk name the
//! cache uses is a pure function of the key.

use std::fmt;

use serde::{Deserialize, Serialize};

const PACKAGE_PREFIX: &str = "tree-sitter-";
const SYMBOL_PREFIX: &str = "tree_sitter_";

/// Identity of one grammar artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrammarKey {
	/// Registry package name, e.g. `tree-sitter-typescript`.
	pub package: String,
	/// Directory inside the package holding the grammar to build.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subdirectory: Option<String>,
	/// Exported symbol / artifact stem, e.g. `tree-sitter-tsx`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub symbol: Option<String>,
}

impl GrammarKey {
	/// Key for a package's default grammar.
	pub fn package(package: impl Into<String>) -> Self {
		Self {
			package: package.into(),
			subdirectory: None,
			symbol: None,
		}
	}

	pub fn with_subdirectory(mut self, subdirectory: impl Into<String>) -> Self {
		self.subdirectory = Some(subdirectory.into());
		self
	}

	pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
		self.symbol = Some(symbol.into());
		self
	}

	/// Cache subdirectory name for this key.
	///
	/// Sub-grammars of one package get distinct directories, so building the
	/// `tsx` dialect never clobbers the `typescript` one.
	pub fn dir_name(&self) -> String {
		let mut name = sanitize(&self.package);
		if let Some(subdirectory) = &self.subdirectory {
			name.push('+');
			name.push_str(&sanitize(subdirectory));
		}
		if let Some(symbol) = &self.symbol {
			name.push('+');
			name.push_str(&sanitize(symbol));
		}
		name
	}

	/// Stem of the built artifact file: the symbol when given, else the package.
	pub fn artifact_stem(&self) -> String {
		sanitize(self.symbol.as_deref().unwrap_or(&self.package))
	}

	/// File name of the built artifact, with the platform library extension.
	pub fn artifact_file_name(&self) -> String {
		format!("{}.{}", self.artifact_stem(), library_extension())
	}

	/// C entry point exported by the built library.
	///
	/// `tree-sitter-tsx` and `tsx` both map to `tree_sitter_tsx`.
	pub fn symbol_name(&self) -> String {
		let raw = self.symbol.as_deref().unwrap_or(&self.package);
		let base = raw
			.rsplit('/')
			.next()
			.unwrap_or(raw)
			.trim_start_matches(PACKAGE_PREFIX)
			.trim_start_matches(SYMBOL_PREFIX);
		let ident: String = base
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
			.collect();
		format!("{SYMBOL_PREFIX}{ident}")
	}
}

impl fmt::Display for GrammarKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.package)?;
		if let Some(subdirectory) = &self.subdirectory {
			write!(f, "/{subdirectory}")?;
		}
		if let Some(symbol) = &self.symbol {
			write!(f, "#{symbol}")?;
		}
		Ok(())
	}
}

/// Maps a name onto a single safe path segment.
///
/// Scoped package names (`@scope/name`) collapse to one segment, and names
/// made only of dots are prefixed so they never resolve to `.` or `..`.
fn sanitize(name: &str) -> String {
	let mut out: String = name
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
		.collect();
	if out.is_empty() || out.chars().all(|c| c == '.') {
		out.insert(0, '_');
	}
	out
}

#[cfg(target_os = "windows")]
pub fn library_extension() -> &'static str {
	"dll"
}

#[cfg(target_os = "macos")]
pub fn library_extension() -> &'static str {
	"dylib"
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn library_extension() -> &'static str {
	"so"
}
