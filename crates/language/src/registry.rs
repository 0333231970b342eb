//! Document type to grammar resolution.

use std::collections::{BTreeSet, HashMap};

use crate::config::{LanguageOverride, Settings};
use crate::key::GrammarKey;

/// Outcome of resolving a document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	Grammar(GrammarKey),
	/// The document type is deliberately opted out.
	Ignored,
}

/// Maps document-type identifiers to grammar keys, honoring overrides and an
/// ignore set.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
	overrides: HashMap<String, LanguageOverride>,
	ignored: BTreeSet<String>,
}

impl LanguageRegistry {
	pub fn new(overrides: impl IntoIterator<Item = (String, LanguageOverride)>, ignored: impl IntoIterator<Item = String>) -> Self {
		Self {
			overrides: overrides.into_iter().collect(),
			ignored: ignored.into_iter().collect(),
		}
	}

	pub fn from_settings(settings: &Settings) -> Self {
		Self::new(settings.languages.clone(), settings.ignored.iter().cloned())
	}

	/// Resolves `language_id`.
	///
	/// The ignore set is checked first and wins over any override. Without an
	/// override the package is `tree-sitter-<id>` using its default export.
	pub fn resolve(&self, language_id: &str) -> Resolution {
		if self.ignored.contains(language_id) {
			return Resolution::Ignored;
		}

		let derived = || format!("tree-sitter-{language_id}");
		let key = match self.overrides.get(language_id) {
			Some(o) => GrammarKey {
				package: o.package.clone().unwrap_or_else(derived),
				subdirectory: o.subdirectory.clone(),
				symbol: o.symbol.clone(),
			},
			None => GrammarKey::package(derived()),
		};
		Resolution::Grammar(key)
	}

	pub fn is_ignored(&self, language_id: &str) -> bool {
		self.ignored.contains(language_id)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	use super::*;

	fn tsx_override() -> (String, LanguageOverride) {
		(
			"typescriptreact".to_string(),
			LanguageOverride {
				package: Some("tree-sitter-typescript".into()),
				subdirectory: Some("tsx".into()),
				symbol: Some("tree-sitter-tsx".into()),
			},
		)
	}

	#[rstest]
	#[case("rust", "tree-sitter-rust")]
	#[case("python", "tree-sitter-python")]
	#[case("c-sharp", "tree-sitter-c-sharp")]
	fn derives_package_without_override(#[case] id: &str, #[case] package: &str) {
		let registry = LanguageRegistry::default();
		assert_eq!(registry.resolve(id), Resolution::Grammar(GrammarKey::package(package)));
	}

	#[test]
	fn override_is_used_verbatim() {
		let registry = LanguageRegistry::new([tsx_override()], []);
		assert_eq!(
			registry.resolve("typescriptreact"),
			Resolution::Grammar(
				GrammarKey::package("tree-sitter-typescript")
					.with_subdirectory("tsx")
					.with_symbol("tree-sitter-tsx")
			)
		);
	}

	#[test]
	fn ignore_set_wins_over_override() {
		let registry = LanguageRegistry::new([tsx_override()], ["typescriptreact".to_string()]);
		assert_eq!(registry.resolve("typescriptreact"), Resolution::Ignored);
	}

	#[test]
	fn partial_override_keeps_derived_package() {
		let registry = LanguageRegistry::new(
			[(
				"ocaml".to_string(),
				LanguageOverride {
					subdirectory: Some("grammars/ocaml".into()),
					..Default::default()
				},
			)],
			[],
		);
		assert_eq!(
			registry.resolve("ocaml"),
			Resolution::Grammar(GrammarKey::package("tree-sitter-ocaml").with_subdirectory("grammars/ocaml"))
		);
	}

	#[test]
	fn from_settings_reads_both_tables() {
		let mut settings = Settings::default();
		settings.ignored.insert("plaintext".into());
		settings.languages.insert(tsx_override().0, tsx_override().1);
		let registry = LanguageRegistry::from_settings(&settings);
		assert!(registry.is_ignored("plaintext"));
		assert!(matches!(registry.resolve("typescriptreact"), Resolution::Grammar(k) if k.subdirectory.as_deref() == Some("tsx")));
	}
}
