//! Line streaming for child process output.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::progress::ProgressFanout;

/// Number of trailing output lines kept for error reports.
const TAIL_LINES: usize = 20;

/// Bounded buffer of the most recent output lines of a process.
#[derive(Default)]
pub(crate) struct OutputTail {
	lines: Mutex<VecDeque<String>>,
}

impl OutputTail {
	fn push(&self, line: String) {
		let mut lines = self.lines.lock();
		if lines.len() == TAIL_LINES {
			lines.pop_front();
		}
		lines.push_back(line);
	}

	pub(crate) fn contains(&self, needle: &str) -> bool {
		self.lines.lock().iter().any(|l| l.contains(needle))
	}

	pub(crate) fn joined(&self) -> String {
		self.lines.lock().iter().map(String::as_str).collect::<Vec<_>>().join("\n")
	}
}

/// Forwards each line of `reader` to `progress` as soon as it is read.
///
/// Invalid UTF-8 is replaced rather than treated as an error; build tools do
/// not promise clean encodings.
pub(crate) async fn forward_lines<R>(reader: R, progress: &ProgressFanout, tail: &OutputTail) -> std::io::Result<()>
where
	R: AsyncRead + Unpin,
{
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		if reader.read_until(b'\n', &mut buf).await? == 0 {
			return Ok(());
		}
		let line = String::from_utf8_lossy(&buf);
		let line = line.trim_end_matches(['\r', '\n']);
		if line.is_empty() {
			continue;
		}
		progress.message(line);
		tail.push(line.to_string());
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::progress::Progress;

	#[tokio::test]
	async fn forwards_lines_in_order_and_keeps_tail() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let s = seen.clone();
		let progress = ProgressFanout::new(Arc::new(move |p: Progress| s.lock().push(p.message)));
		let tail = OutputTail::default();

		let input: &[u8] = b"compiling parser.c\r\n\nlinking\nwarning: \xff\n";
		forward_lines(input, &progress, &tail).await.unwrap();

		assert_eq!(*seen.lock(), vec!["compiling parser.c", "linking", "warning: \u{fffd}"]);
		assert!(tail.contains("linking"));
	}

	#[tokio::test]
	async fn tail_is_bounded() {
		let progress = ProgressFanout::new(Arc::new(crate::progress::NullProgress));
		let tail = OutputTail::default();
		let input: String = (0..50).map(|i| format!("line {i}\n")).collect();
		forward_lines(input.as_bytes(), &progress, &tail).await.unwrap();

		let joined = tail.joined();
		assert_eq!(joined.lines().count(), TAIL_LINES);
		assert!(joined.ends_with("line 49"));
		assert!(!tail.contains("line 29"));
	}
}
