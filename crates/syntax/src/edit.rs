//! Translation of editor text changes into tree-sitter edits.
//!
//! Changes within one batch are cumulative: each change's offsets and
//! positions refer to the text produced by every earlier change in the same
//! batch, and edits must be applied to a tree in exactly that order.

use std::ops::Range;

use thiserror::Error;
use tree_sitter::{InputEdit, Point};

/// One contiguous replacement as reported by an editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
	/// Byte offset where the replaced range starts.
	pub start_byte: usize,
	/// Length in bytes of the replaced range.
	pub old_len: usize,
	/// Row/column of `start_byte`; columns count bytes.
	pub start: Point,
	/// Row/column of `start_byte + old_len`.
	pub old_end: Point,
	/// Replacement text.
	pub text: String,
}

/// A batch that does not fit the document it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEdit {
	#[error("change {index}: range {start}..{end} exceeds document length {len}")]
	OutOfBounds { index: usize, start: usize, end: usize, len: usize },
	#[error("change {index}: end position {end} precedes start position {start}")]
	InvertedPoints { index: usize, start: Point, end: Point },
	#[error("change {index}: offset {offset} is not on a character boundary")]
	SplitsCharacter { index: usize, offset: usize },
	#[error("batch produces {expected} bytes but the new text has {actual}")]
	LengthMismatch { expected: usize, actual: usize },
}

/// Edits for one batch plus the document length they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
	pub edits: Vec<InputEdit>,
	pub new_len: usize,
}

impl TextChange {
	pub fn new(start_byte: usize, old_len: usize, start: Point, old_end: Point, text: impl Into<String>) -> Self {
		Self {
			start_byte,
			old_len,
			start,
			old_end,
			text: text.into(),
		}
	}

	/// Change replacing `range` of `text`, with positions derived from `text`.
	///
	/// Returns `None` if the range is out of bounds, inverted, or splits a character.
	pub fn replace(text: &str, range: Range<usize>, replacement: impl Into<String>) -> Option<Self> {
		if range.start > range.end || !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
			return None;
		}
		let start = point_at(text, range.start);
		let old_end = advance_point(start, &text[range.clone()]);
		Some(Self::new(range.start, range.len(), start, old_end, replacement))
	}

	pub fn insert(text: &str, offset: usize, inserted: impl Into<String>) -> Option<Self> {
		Self::replace(text, offset..offset, inserted)
	}

	pub fn delete(text: &str, range: Range<usize>) -> Option<Self> {
		Self::replace(text, range, "")
	}

	pub fn old_end_byte(&self) -> usize {
		self.start_byte + self.old_len
	}

	/// The tree-sitter edit for this change. Does not validate.
	pub fn to_input_edit(&self) -> InputEdit {
		InputEdit {
			start_byte: self.start_byte,
			old_end_byte: self.old_end_byte(),
			new_end_byte: self.start_byte + self.text.len(),
			start_position: self.start,
			old_end_position: self.old_end,
			new_end_position: advance_point(self.start, &self.text),
		}
	}
}

/// Position reached after writing `text` starting at `start`.
pub fn advance_point(start: Point, text: &str) -> Point {
	match text.rfind('\n') {
		None => Point::new(start.row, start.column + text.len()),
		Some(last) => Point::new(start.row + text.bytes().filter(|&b| b == b'\n').count(), text.len() - last - 1),
	}
}

/// Position of byte `offset` in `text`.
pub fn point_at(text: &str, offset: usize) -> Point {
	advance_point(Point::new(0, 0), &text[..offset.min(text.len())])
}

/// Translates a batch against a document of `old_len` bytes.
///
/// Every change is checked against the document length as it stands after
/// the changes before it.
pub fn translate(old_len: usize, changes: &[TextChange]) -> Result<Translation, MalformedEdit> {
	let mut len = old_len;
	let mut edits = Vec::with_capacity(changes.len());
	for (index, change) in changes.iter().enumerate() {
		let end = change.start_byte.checked_add(change.old_len).filter(|&end| end <= len).ok_or(MalformedEdit::OutOfBounds {
			index,
			start: change.start_byte,
			end: change.start_byte.saturating_add(change.old_len),
			len,
		})?;
		if change.old_end < change.start {
			return Err(MalformedEdit::InvertedPoints {
				index,
				start: change.start,
				end: change.old_end,
			});
		}
		len = len - (end - change.start_byte) + change.text.len();
		edits.push(change.to_input_edit());
	}
	Ok(Translation { edits, new_len: len })
}

/// Applies a batch to `text` in order.
pub fn apply_changes(text: &str, changes: &[TextChange]) -> Result<String, MalformedEdit> {
	let mut out = text.to_string();
	for (index, change) in changes.iter().enumerate() {
		let end = change.start_byte.checked_add(change.old_len).filter(|&end| end <= out.len()).ok_or(MalformedEdit::OutOfBounds {
			index,
			start: change.start_byte,
			end: change.start_byte.saturating_add(change.old_len),
			len: out.len(),
		})?;
		if let Some(offset) = [change.start_byte, end].into_iter().find(|&o| !out.is_char_boundary(o)) {
			return Err(MalformedEdit::SplitsCharacter { index, offset });
		}
		out.replace_range(change.start_byte..end, &change.text);
	}
	Ok(out)
}
