//! Progress reporting for long-running grammar operations.
//!
//! Progress is an ordered stream of `(step, message)` pairs. The step counter
//! only ever grows and has no upper bound; it drives an indeterminate
//! indicator, never a percentage.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// One progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
	pub step: u64,
	pub message: String,
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
	fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
	F: Fn(Progress) + Send + Sync,
{
	fn report(&self, progress: Progress) {
		self(progress)
	}
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
	fn report(&self, _progress: Progress) {}
}

/// Numbers messages for one job and delivers them to every attached sink.
///
/// Requesters that join a job mid-flight attach their own sink and see events
/// from that point on, with the job's shared counter.
#[derive(Default)]
pub struct ProgressFanout {
	step: AtomicU64,
	sinks: Mutex<Vec<Arc<dyn ProgressSink>>>,
}

impl ProgressFanout {
	pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
		Self {
			step: AtomicU64::new(0),
			sinks: Mutex::new(vec![sink]),
		}
	}

	pub fn attach(&self, sink: Arc<dyn ProgressSink>) {
		self.sinks.lock().push(sink);
	}

	/// Current step count.
	pub fn step(&self) -> u64 {
		self.step.load(Ordering::Relaxed)
	}

	pub fn message(&self, message: impl Into<String>) {
		let message = message.into();
		// Numbering and delivery happen under the lock so sinks see steps in order.
		let sinks = self.sinks.lock();
		let step = self.step.fetch_add(1, Ordering::Relaxed) + 1;
		for sink in sinks.iter() {
			sink.report(Progress {
				step,
				message: message.clone(),
			});
		}
	}
}

impl ProgressSink for ProgressFanout {
	fn report(&self, progress: Progress) {
		self.message(progress.message);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn steps_increase_across_attached_sinks() {
		let first = Arc::new(Mutex::new(Vec::new()));
		let second = Arc::new(Mutex::new(Vec::new()));

		let f = first.clone();
		let fanout = ProgressFanout::new(Arc::new(move |p: Progress| f.lock().push(p.step)));
		fanout.message("one");
		fanout.message("two");

		let s = second.clone();
		fanout.attach(Arc::new(move |p: Progress| s.lock().push(p.step)));
		fanout.message("three");

		assert_eq!(*first.lock(), vec![1, 2, 3]);
		assert_eq!(*second.lock(), vec![3]);
		assert_eq!(fanout.step(), 3);
	}

	#[test]
	fn forwarded_progress_is_renumbered() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let s = seen.clone();
		let fanout = ProgressFanout::new(Arc::new(move |p: Progress| s.lock().push((p.step, p.message))));
		fanout.report(Progress {
			step: 40,
			message: "line".into(),
		});
		assert_eq!(*seen.lock(), vec![(1, "line".to_string())]);
	}
}
