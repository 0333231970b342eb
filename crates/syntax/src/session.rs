//! Incremental parse session for one document.

use arbor_language::Grammar;
use thiserror::Error;
use tracing::trace;
use tree_sitter::{LanguageError, Node, Parser, Tree};

use crate::edit::{MalformedEdit, TextChange, translate};

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("parser rejected grammar: {0}")]
	Language(#[from] LanguageError),
	#[error(transparent)]
	Malformed(#[from] MalformedEdit),
	#[error("parser produced no tree")]
	ParseFailed,
}

/// How an update produced its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
	/// Edited previous tree used as a reuse hint.
	Incremental,
	/// Parsed from scratch.
	Full,
}

/// One parser and at most one tree for one document.
///
/// Exactly one tree is visible at a time. After a malformed batch the tree is
/// gone until the next successful [`update`](Self::update) or
/// [`reparse`](Self::reparse).
pub struct Session {
	// Declared in drop order: tree and parser before the grammar backing them.
	tree: Option<Tree>,
	parser: Parser,
	text_len: usize,
	grammar: Grammar,
}

impl Session {
	/// Fully parses `text` with `grammar`.
	pub fn open(grammar: Grammar, text: &str) -> Result<Self, SessionError> {
		let mut parser = Parser::new();
		parser.set_language(grammar.language())?;
		let tree = parser.parse(text, None).ok_or(SessionError::ParseFailed)?;
		Ok(Self {
			tree: Some(tree),
			parser,
			text_len: text.len(),
			grammar,
		})
	}

	/// Applies `changes` in order, then reparses `new_text` reusing the edited tree.
	///
	/// The whole batch is validated before the tree is touched. A malformed
	/// batch drops the tree and is returned to the caller, which is expected
	/// to rebuild with [`reparse`](Self::reparse).
	pub fn update(&mut self, changes: &[TextChange], new_text: &str) -> Result<UpdateMode, SessionError> {
		let Some(mut tree) = self.tree.take() else {
			self.reparse(new_text)?;
			return Ok(UpdateMode::Full);
		};

		let translation = translate(self.text_len, changes)?;
		if translation.new_len != new_text.len() {
			return Err(MalformedEdit::LengthMismatch {
				expected: translation.new_len,
				actual: new_text.len(),
			}
			.into());
		}

		for edit in &translation.edits {
			tree.edit(edit);
		}
		let new_tree = self.parser.parse(new_text, Some(&tree)).ok_or(SessionError::ParseFailed)?;
		trace!(edits = translation.edits.len(), len = new_text.len(), "Incremental reparse");

		self.tree = Some(new_tree);
		self.text_len = new_text.len();
		Ok(UpdateMode::Incremental)
	}

	/// Discards the current tree and parses `text` from scratch.
	pub fn reparse(&mut self, text: &str) -> Result<(), SessionError> {
		self.tree = None;
		self.parser.reset();
		let tree = self.parser.parse(text, None).ok_or(SessionError::ParseFailed)?;
		self.tree = Some(tree);
		self.text_len = text.len();
		Ok(())
	}

	pub fn tree(&self) -> Option<&Tree> {
		self.tree.as_ref()
	}

	pub fn root(&self) -> Option<Node<'_>> {
		self.tree.as_ref().map(Tree::root_node)
	}

	pub fn sexp(&self) -> Option<String> {
		self.root().map(|root| root.to_sexp())
	}

	pub fn grammar(&self) -> &Grammar {
		&self.grammar
	}

	/// Length of the text the current tree was parsed from.
	pub fn text_len(&self) -> usize {
		self.text_len
	}
}

/// True if both trees have the same nodes with the same kinds, fields, and
/// byte and point ranges, in the same order.
pub fn same_structure(a: &Tree, b: &Tree) -> bool {
	let (mut x, mut y) = (a.walk(), b.walk());
	loop {
		let (n, m) = (x.node(), y.node());
		if n.kind_id() != m.kind_id()
			|| x.field_id() != y.field_id()
			|| n.byte_range() != m.byte_range()
			|| n.start_position() != m.start_position()
			|| n.end_position() != m.end_position()
			|| n.is_missing() != m.is_missing()
		{
			return false;
		}

		let descended = x.goto_first_child();
		if descended != y.goto_first_child() {
			return false;
		}
		if descended {
			continue;
		}

		loop {
			let next = x.goto_next_sibling();
			if next != y.goto_next_sibling() {
				return false;
			}
			if next {
				break;
			}
			let up = x.goto_parent();
			if up != y.goto_parent() {
				return false;
			}
			if !up {
				return true;
			}
		}
	}
}
