// Progress goes through sinks and tracing; the CLI owns the terminal.
#![deny(clippy::print_stderr)]

//! Grammar resolution, caching, and on-demand acquisition.
//!
//! # Architecture
//!
//! * [`registry`]: document type to [`GrammarKey`], honoring overrides and an ignore set
//! * [`grammar`]: on-disk cache of built grammars and dynamic loading into [`Grammar`] handles
//! * [`build`]: single-flight fetch, extract, and build pipeline
//! * [`provider`]: the three above wired into one [`GrammarResolver`]
//! * [`config`]: user settings feeding the registry and pipeline
//!
//! # Flow
//!
//! ```text
//! resolve(id) ─▶ cache.load(key) ─▶ hit: Grammar
//!                     │
//!                    miss ─▶ acquire(key): fetch ─▶ extract ─▶ build ─▶ cache.load(key)
//! ```

pub mod build;
pub mod config;
pub mod grammar;
pub mod key;
pub mod progress;
pub mod provider;
pub mod registry;

pub use build::{AcquireError, GrammarAcquirer, JobStatus};
pub use config::{ConfigError, LanguageOverride, Settings};
pub use grammar::{ArtifactRecord, Grammar, GrammarCache, GrammarError, GrammarSource};
pub use key::GrammarKey;
pub use progress::{NullProgress, Progress, ProgressSink};
pub use provider::{GrammarProvider, GrammarResolver, PrepareError, PrepareFailure, Prepared};
pub use registry::{LanguageRegistry, Resolution};
pub use tree_sitter_language::LanguageFn;
