//! Incremental syntax trees for live documents.
//!
//! * [`edit`]: editor change batches to tree-sitter edits
//! * [`session`]: one parser and one tree per document
//! * [`host`]: event-driven session management for the active document

pub mod edit;
pub mod host;
pub mod session;

pub use edit::{MalformedEdit, TextChange, Translation, apply_changes, translate};
pub use host::{DocumentEvent, HostHandle, HostUpdate, SyntaxHost, TreeSnapshot, spawn_host};
pub use session::{Session, SessionError, UpdateMode, same_structure};
