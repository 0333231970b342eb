//! Grammar compilation through an external build command.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::output::{OutputTail, forward_lines};
use crate::progress::ProgressFanout;

#[derive(Debug, Error)]
pub enum BuildError {
	#[error("could not run {program}: {error}")]
	Spawn { program: String, error: std::io::Error },
	#[error("build command exited with {status}\n{output}")]
	Failed { status: String, output: String },
	#[error("build succeeded but {} was not produced", .0.display())]
	MissingArtifact(std::path::PathBuf),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Compiles an extracted grammar package into a loadable artifact.
#[async_trait]
pub trait GrammarBuilder: Send + Sync {
	/// Builds the grammar in `package_dir` (or its `subdirectory`) into `artifact`.
	async fn build(&self, package_dir: &Path, subdirectory: Option<&str>, artifact: &Path, progress: &ProgressFanout) -> Result<(), BuildError>;
}

/// Runs `<program> <args...> --output <artifact> [subdirectory]` in the
/// package directory. The default is `tree-sitter build`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
	program: String,
	args: Vec<String>,
}

impl CommandBuilder {
	pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
		}
	}

	/// Builds from a command line whose first element is the program.
	pub fn from_command_line(command: &[String]) -> Option<Self> {
		let (program, args) = command.split_first()?;
		Some(Self::new(program.clone(), args.iter().cloned()))
	}
}

impl Default for CommandBuilder {
	fn default() -> Self {
		Self::new("tree-sitter", ["build"])
	}
}

#[async_trait]
impl GrammarBuilder for CommandBuilder {
	async fn build(&self, package_dir: &Path, subdirectory: Option<&str>, artifact: &Path, progress: &ProgressFanout) -> Result<(), BuildError> {
		let mut command = Command::new(&self.program);
		command.args(&self.args).arg("--output").arg(artifact);
		if let Some(subdirectory) = subdirectory {
			command.arg(subdirectory);
		}
		command
			.current_dir(package_dir)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());

		info!(dir = %package_dir.display(), program = %self.program, subdirectory, "Running grammar build");
		let mut child = command.spawn().map_err(|error| BuildError::Spawn {
			program: self.program.clone(),
			error,
		})?;

		let tail = OutputTail::default();
		let stdout = child.stdout.take();
		let stderr = child.stderr.take();
		let (out, err) = tokio::join!(
			async {
				match stdout {
					Some(s) => forward_lines(s, progress, &tail).await,
					None => Ok(()),
				}
			},
			async {
				match stderr {
					Some(s) => forward_lines(s, progress, &tail).await,
					None => Ok(()),
				}
			}
		);
		out?;
		err?;

		let status = child.wait().await?;
		if !status.success() {
			return Err(BuildError::Failed {
				status: status.to_string(),
				output: tail.joined(),
			});
		}
		debug!(artifact = %artifact.display(), "Grammar build command finished");
		Ok(())
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;

	use super::*;
	use crate::progress::Progress;

	fn recording() -> (ProgressFanout, Arc<Mutex<Vec<String>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let s = seen.clone();
		(ProgressFanout::new(Arc::new(move |p: Progress| s.lock().push(p.message))), seen)
	}

	// `sh -c script name args...`: the script sees the appended arguments as $1...
	fn shell(script: &str) -> CommandBuilder {
		CommandBuilder::new("sh", ["-c", script, "build"])
	}

	#[tokio::test]
	async fn passes_output_and_subdirectory_and_streams_both_pipes() {
		let tmp = tempfile::tempdir().unwrap();
		let artifact = tmp.path().join("out.so");
		let builder = shell(r#"echo "args $*"; echo "cwd $(pwd)"; echo "to stderr" >&2; touch "$2""#);
		let (progress, seen) = recording();

		builder.build(tmp.path(), Some("tsx"), &artifact, &progress).await.unwrap();

		let seen = seen.lock();
		assert!(seen.contains(&format!("args --output {} tsx", artifact.display())));
		assert!(seen.iter().any(|l| l.starts_with("cwd ") && l.ends_with(tmp.path().file_name().unwrap().to_str().unwrap())));
		assert!(seen.contains(&"to stderr".to_string()));
		assert!(artifact.exists());
	}

	#[tokio::test]
	async fn non_zero_exit_fails_with_output_tail() {
		let tmp = tempfile::tempdir().unwrap();
		let builder = shell("echo 'parser.c:1: error: boom' >&2; exit 3");
		let (progress, _) = recording();

		let err = builder.build(tmp.path(), None, &tmp.path().join("x.so"), &progress).await.unwrap_err();
		match err {
			BuildError::Failed { output, .. } => assert!(output.contains("boom")),
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn missing_program_is_spawn_error() {
		let tmp = tempfile::tempdir().unwrap();
		let builder = CommandBuilder::new("arbor-definitely-not-a-command", Vec::<String>::new());
		let (progress, _) = recording();
		let err = builder.build(tmp.path(), None, &tmp.path().join("x.so"), &progress).await.unwrap_err();
		assert!(matches!(err, BuildError::Spawn { .. }));
	}

	#[test]
	fn command_line_splits_program() {
		let builder = CommandBuilder::from_command_line(&["tree-sitter".into(), "build".into(), "--debug".into()]).unwrap();
		assert_eq!(builder.program, "tree-sitter");
		assert_eq!(builder.args, ["build", "--debug"]);
		assert!(CommandBuilder::from_command_line(&[]).is_none());
	}
}
