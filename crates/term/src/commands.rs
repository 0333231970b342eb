//! Subcommand implementations.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use arbor_language::{Grammar, GrammarProvider, GrammarResolver, Prepared, Progress, ProgressSink, Resolution, Settings};
use arbor_syntax::{Session, TextChange, apply_changes, same_structure};
use tokio::task::JoinSet;

use crate::cli::language_for_path;

/// Renders progress as `[label step] message` lines on stderr.
struct StderrProgress {
	label: String,
}

impl ProgressSink for StderrProgress {
	fn report(&self, progress: Progress) {
		eprintln!("[{} {}] {}", self.label, progress.step, progress.message);
	}
}

fn sink(label: &str) -> Arc<dyn ProgressSink> {
	Arc::new(StderrProgress { label: label.to_string() })
}

fn language_of(file: &Path, language: Option<&str>) -> anyhow::Result<String> {
	language
		.or_else(|| language_for_path(file))
		.map(str::to_string)
		.ok_or_else(|| anyhow!("cannot infer document type of {}; pass --language", file.display()))
}

async fn grammar_for(provider: &GrammarProvider, language: &str) -> anyhow::Result<Grammar> {
	match provider.grammar_for(language, sink(language)).await? {
		Prepared::Ready(grammar) => Ok(grammar),
		Prepared::Ignored => bail!("document type '{language}' is ignored by configuration"),
	}
}

async fn open(settings: &Settings, file: &Path, language: Option<&str>) -> anyhow::Result<(String, Session)> {
	let language = language_of(file, language)?;
	let text = tokio::fs::read_to_string(file).await.with_context(|| format!("reading {}", file.display()))?;
	let provider = GrammarProvider::from_settings(settings);
	let grammar = grammar_for(&provider, &language).await?;
	let session = Session::open(grammar, &text)?;
	Ok((text, session))
}

pub async fn parse(settings: &Settings, file: &Path, language: Option<&str>) -> anyhow::Result<()> {
	let (_, session) = open(settings, file, language).await?;
	println!("{}", session.sexp().unwrap_or_default());
	Ok(())
}

pub async fn edit(settings: &Settings, file: &Path, range: Range<usize>, replacement: &str, language: Option<&str>) -> anyhow::Result<()> {
	let (text, mut session) = open(settings, file, language).await?;
	let change = TextChange::replace(&text, range.clone(), replacement)
		.ok_or_else(|| anyhow!("range {range:?} does not fit the {}-byte file on character boundaries", text.len()))?;
	let changes = [change];
	let new_text = apply_changes(&text, &changes)?;

	let mode = session.update(&changes, &new_text)?;
	let fresh = Session::open(session.grammar().clone(), &new_text)?;
	let matches = match (session.tree(), fresh.tree()) {
		(Some(a), Some(b)) => same_structure(a, b),
		_ => false,
	};

	println!("{}", session.sexp().unwrap_or_default());
	println!("update: {mode:?}, matches fresh parse: {}", if matches { "yes" } else { "no" });
	if !matches {
		bail!("incremental tree diverged from a fresh parse");
	}
	Ok(())
}

pub async fn install(settings: &Settings, languages: &[String]) -> anyhow::Result<()> {
	let provider = GrammarProvider::from_settings(settings);
	let mut jobs = JoinSet::new();
	for language in languages {
		let provider = provider.clone();
		let language = language.clone();
		jobs.spawn(async move {
			let outcome = provider.grammar_for(&language, sink(&language)).await;
			(language, outcome)
		});
	}

	let mut failed = 0;
	while let Some(joined) = jobs.join_next().await {
		let (language, outcome) = joined?;
		match outcome {
			Ok(Prepared::Ready(grammar)) => println!("{language}: ready ({}, ABI {})", grammar.key(), grammar.abi_version()),
			Ok(Prepared::Ignored) => println!("{language}: ignored"),
			Err(e) => {
				failed += 1;
				eprintln!("{e}: {}", e.source);
			}
		}
	}
	if failed > 0 {
		bail!("{failed} of {} grammars could not be prepared", languages.len());
	}
	Ok(())
}

pub fn resolve(settings: &Settings, language: &str) -> anyhow::Result<()> {
	let provider = GrammarProvider::from_settings(settings);
	let key = match provider.registry().resolve(language) {
		Resolution::Ignored => {
			println!("{language}: ignored");
			return Ok(());
		}
		Resolution::Grammar(key) => key,
	};
	let cache = provider.cache();
	println!("package:      {}", key.package);
	println!("subdirectory: {}", key.subdirectory.as_deref().unwrap_or("-"));
	println!("symbol:       {}", key.symbol_name());
	println!("directory:    {}", cache.package_dir(&key).display());
	println!("artifact:     {}", cache.artifact_path(&key).display());
	println!("installed:    {}", if cache.has(&key) { "yes" } else { "no" });
	Ok(())
}

pub fn list(settings: &Settings) -> anyhow::Result<()> {
	let provider = GrammarProvider::from_settings(settings);
	for record in provider.cache().installed() {
		let version = record.source.as_ref().map_or("unknown", |s| s.version.as_str());
		println!("{} {version} {}", record.key, record.artifact_path.display());
	}
	Ok(())
}

pub fn paths(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
	println!("config:  {}", config_path.display());
	println!("parsers: {}", settings.parsers_dir().display());
	Ok(())
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn settings_in(dir: &Path) -> Settings {
		Settings {
			parsers_dir: Some(dir.to_path_buf()),
			..Settings::default()
		}
	}

	#[test]
	fn explicit_language_wins_over_extension() {
		assert_eq!(language_of(Path::new("main.rs"), Some("python")).unwrap(), "python");
		assert_eq!(language_of(Path::new("main.rs"), None).unwrap(), "rust");
	}

	#[test]
	fn unknown_extension_needs_language() {
		let err = language_of(Path::new("notes.xyz"), None).unwrap_err();
		assert!(err.to_string().contains("--language"), "{err}");
	}

	#[test]
	fn inspection_commands_work_on_empty_cache() {
		let dir = tempfile::tempdir().unwrap();
		let settings = settings_in(dir.path());
		list(&settings).unwrap();
		resolve(&settings, "typescriptreact").unwrap();
		paths(&settings, &dir.path().join("config.toml")).unwrap();
		assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn parse_rejects_ignored_document_type() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("notes.txt");
		std::fs::write(&file, "hello").unwrap();
		let mut settings = settings_in(dir.path());
		settings.ignored.insert("plaintext".to_string());

		let err = parse(&settings, &file, None).await.unwrap_err();
		assert!(err.to_string().contains("ignored"), "{err}");
	}
}
