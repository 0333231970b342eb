//! Arbor command-line frontend.

mod cli;
mod commands;

use std::path::PathBuf;

use arbor_language::Settings;
use clap::Parser;
use cli::{Cli, Command};
use tracing::debug;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let config_path = cli.config.clone().unwrap_or_else(arbor_language::config::config_path);
	let mut settings = Settings::load(&config_path)?;
	if let Some(dir) = cli.parsers_dir {
		settings.parsers_dir = Some(dir);
	}
	debug!(config = %config_path.display(), parsers = %settings.parsers_dir().display(), "Settings loaded");

	match cli.command {
		Command::Parse { file, language } => commands::parse(&settings, &file, language.as_deref()).await,
		Command::Edit { file, range, text, language } => commands::edit(&settings, &file, range, &text, language.as_deref()).await,
		Command::Install { languages } => commands::install(&settings, &languages).await,
		Command::Resolve { language } => commands::resolve(&settings, &language),
		Command::List => commands::list(&settings),
		Command::Paths => commands::paths(&settings, &config_path),
	}
}

/// Logs go to stderr, or to `$ARBOR_LOG_DIR/arbor.<pid>.log` when that is set.
///
/// `ARBOR_LOG` (then `RUST_LOG`) overrides the default filter.
fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = EnvFilter::try_from_env("ARBOR_LOG")
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("arbor=debug,arbor_language=debug,arbor_syntax=debug,info")
			} else {
				EnvFilter::new("warn")
			}
		});

	if let Some(log_dir) = std::env::var_os("ARBOR_LOG_DIR").map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("arbor.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter).with(file_layer).init();
			tracing::info!(path = ?log_path, "Tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
