//! Message-driven syntax host for the active document.
//!
//! The editor sends [`DocumentEvent`]s; the host keeps one [`Session`] for the
//! active document and answers each event with a [`HostUpdate`]. Events are
//! handled strictly in arrival order. Activating a document replaces the
//! previous session outright.

use std::sync::Arc;

use arbor_language::{GrammarResolver, Prepared, ProgressSink};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::edit::TextChange;
use crate::session::{Session, SessionError, UpdateMode};

/// Notification from the editor.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
	/// A document became active. Carries its full text.
	Activated { uri: String, language_id: String, text: String },
	/// One change batch for a document, plus its text after the batch.
	Changed { uri: String, changes: Vec<TextChange>, text: String },
	Closed { uri: String },
}

/// Tree state published after a handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSnapshot {
	pub uri: String,
	pub sexp: String,
	pub mode: UpdateMode,
	pub text_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostUpdate {
	Tree(TreeSnapshot),
	/// No grammar could be prepared; `message` is user facing.
	Unavailable { uri: String, message: String },
	/// The document type is opted out.
	Ignored { uri: String },
	Closed { uri: String },
	/// The event did not concern the active document.
	Unchanged,
}

struct ActiveDocument {
	uri: String,
	session: Option<Session>,
}

/// Owns the session of the active document.
pub struct SyntaxHost {
	resolver: Arc<dyn GrammarResolver>,
	progress: Arc<dyn ProgressSink>,
	active: Option<ActiveDocument>,
}

impl SyntaxHost {
	pub fn new(resolver: Arc<dyn GrammarResolver>, progress: Arc<dyn ProgressSink>) -> Self {
		Self {
			resolver,
			progress,
			active: None,
		}
	}

	pub fn active_uri(&self) -> Option<&str> {
		self.active.as_ref().map(|a| a.uri.as_str())
	}

	pub fn session(&self) -> Option<&Session> {
		self.active.as_ref().and_then(|a| a.session.as_ref())
	}

	pub async fn handle(&mut self, event: DocumentEvent) -> HostUpdate {
		match event {
			DocumentEvent::Activated { uri, language_id, text } => self.activate(uri, &language_id, &text).await,
			DocumentEvent::Changed { uri, changes, text } => self.change(&uri, &changes, &text),
			DocumentEvent::Closed { uri } => {
				if self.active_uri() != Some(uri.as_str()) {
					return HostUpdate::Unchanged;
				}
				self.active = None;
				HostUpdate::Closed { uri }
			}
		}
	}

	async fn activate(&mut self, uri: String, language_id: &str, text: &str) -> HostUpdate {
		// Drop the old session before anything else so no state is shared.
		self.active = None;
		debug!(uri = %uri, language = language_id, "Activating document");

		let grammar = match self.resolver.grammar_for(language_id, self.progress.clone()).await {
			Ok(Prepared::Ready(grammar)) => grammar,
			Ok(Prepared::Ignored) => {
				self.active = Some(ActiveDocument { uri: uri.clone(), session: None });
				return HostUpdate::Ignored { uri };
			}
			Err(e) => {
				error!(uri = %uri, error = %e, cause = %e.source, "Grammar unavailable");
				let message = e.to_string();
				self.active = Some(ActiveDocument { uri: uri.clone(), session: None });
				return HostUpdate::Unavailable { uri, message };
			}
		};

		let result = Session::open(grammar, text);
		self.publish(uri, result.map(|s| (s, UpdateMode::Full)))
	}

	fn change(&mut self, uri: &str, changes: &[TextChange], text: &str) -> HostUpdate {
		let Some(active) = self.active.as_mut().filter(|a| a.uri == uri) else {
			return HostUpdate::Unchanged;
		};
		let Some(session) = active.session.as_mut() else {
			return HostUpdate::Unchanged;
		};

		let mode = match session.update(changes, text) {
			Ok(mode) => Ok(mode),
			Err(SessionError::Malformed(e)) => {
				warn!(uri, error = %e, "Malformed change batch, rebuilding from full text");
				session.reparse(text).map(|()| UpdateMode::Full)
			}
			Err(e) => Err(e),
		};
		match mode {
			Ok(mode) => snapshot(uri, session, mode),
			Err(e) => {
				error!(uri, error = %e, "Parse failed");
				active.session = None;
				HostUpdate::Unavailable {
					uri: uri.to_string(),
					message: e.to_string(),
				}
			}
		}
	}

	fn publish(&mut self, uri: String, result: Result<(Session, UpdateMode), SessionError>) -> HostUpdate {
		match result {
			Ok((session, mode)) => {
				let update = snapshot(&uri, &session, mode);
				self.active = Some(ActiveDocument { uri, session: Some(session) });
				update
			}
			Err(e) => {
				error!(uri = %uri, error = %e, "Could not open parse session");
				self.active = Some(ActiveDocument { uri: uri.clone(), session: None });
				HostUpdate::Unavailable { uri, message: e.to_string() }
			}
		}
	}
}

fn snapshot(uri: &str, session: &Session, mode: UpdateMode) -> HostUpdate {
	match session.sexp() {
		Some(sexp) => HostUpdate::Tree(TreeSnapshot {
			uri: uri.to_string(),
			sexp,
			mode,
			text_len: session.text_len(),
		}),
		None => HostUpdate::Unchanged,
	}
}

/// Handle to a host running on its own task.
pub struct HostHandle {
	events: mpsc::UnboundedSender<DocumentEvent>,
	updates: mpsc::UnboundedReceiver<HostUpdate>,
}

impl HostHandle {
	/// Queues `event`. Returns it back if the host has stopped.
	pub fn send(&self, event: DocumentEvent) -> Result<(), DocumentEvent> {
		self.events.send(event).map_err(|e| e.0)
	}

	/// Next update, in event order. `None` once the host has stopped.
	pub async fn next_update(&mut self) -> Option<HostUpdate> {
		self.updates.recv().await
	}
}

/// Runs `host` on a new task fed by the returned handle.
///
/// The task ends when the handle is dropped.
pub fn spawn_host(mut host: SyntaxHost) -> HostHandle {
	let (events, mut rx) = mpsc::unbounded_channel();
	let (tx, updates) = mpsc::unbounded_channel();
	tokio::spawn(async move {
		while let Some(event) = rx.recv().await {
			let update = host.handle(event).await;
			if tx.send(update).is_err() {
				break;
			}
		}
		debug!("Syntax host stopped");
	});
	HostHandle { events, updates }
}
