//! CLI schema and parsing helpers for the arbor binary.

use std::ops::Range;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Parse files with grammars fetched and built on demand")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Settings file (defaults to $ARBOR_CONFIG, then the user config directory)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Grammar cache directory, overriding the settings file
	#[arg(long, global = true, value_name = "DIR")]
	pub parsers_dir: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Parse a file and print its syntax tree
	Parse {
		file: PathBuf,
		/// Document type (inferred from the extension if omitted)
		#[arg(short, long)]
		language: Option<String>,
	},
	/// Apply one edit incrementally and compare against a fresh parse
	Edit {
		file: PathBuf,
		/// Byte range to replace, as START..END
		#[arg(long, value_parser = parse_range)]
		range: Range<usize>,
		/// Replacement text
		#[arg(long, default_value = "")]
		text: String,
		/// Document type (inferred from the extension if omitted)
		#[arg(short, long)]
		language: Option<String>,
	},
	/// Fetch and build grammars for document types
	Install {
		#[arg(required = true)]
		languages: Vec<String>,
	},
	/// Show how a document type resolves
	Resolve { language: String },
	/// List installed grammars
	List,
	/// Show configuration and cache locations
	Paths,
}

/// Parses `START..END` into a byte range.
pub fn parse_range(s: &str) -> Result<Range<usize>, String> {
	let (start, end) = s.split_once("..").ok_or_else(|| format!("expected START..END, got {s:?}"))?;
	let start = start.trim().parse::<usize>().map_err(|e| format!("invalid start {start:?}: {e}"))?;
	let end = end.trim().parse::<usize>().map_err(|e| format!("invalid end {end:?}: {e}"))?;
	if start > end {
		return Err(format!("start {start} is after end {end}"));
	}
	Ok(start..end)
}

/// Document type for a file extension, using editor-style identifiers.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
	let ext = path.extension()?.to_str()?.to_ascii_lowercase();
	Some(match ext.as_str() {
		"rs" => "rust",
		"ts" | "mts" | "cts" => "typescript",
		"tsx" => "typescriptreact",
		"js" | "mjs" | "cjs" => "javascript",
		"jsx" => "javascriptreact",
		"py" => "python",
		"go" => "go",
		"c" | "h" => "c",
		"cc" | "cpp" | "cxx" | "hpp" => "cpp",
		"cs" => "csharp",
		"java" => "java",
		"rb" => "ruby",
		"lua" => "lua",
		"json" => "json",
		"toml" => "toml",
		"sh" | "bash" => "bash",
		"html" | "htm" => "html",
		"css" => "css",
		"md" => "markdown",
		"txt" => "plaintext",
		_ => return None,
	})
}
