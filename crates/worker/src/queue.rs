use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Outcome of a blocking dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue<T> {
	/// Next item in FIFO order.
	Item(T),
	/// The queue was cancelled. Items still queued are discarded.
	Cancelled,
	/// The deadline passed with nothing queued.
	TimedOut,
}

struct QueueState<T> {
	items: VecDeque<T>,
	cancelled: bool,
}

/// Unbounded multi-producer queue drained by one blocking consumer.
///
/// Cancellation is sticky: once [`cancel`](Self::cancel) runs, every pending
/// and future [`recv`](Self::recv) returns [`Dequeue::Cancelled`] and every
/// [`push`](Self::push) hands its item back. Queued items are not drained.
pub struct JobQueue<T> {
	state: Mutex<QueueState<T>>,
	ready: Condvar,
	token: CancellationToken,
}

impl<T> Default for JobQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> JobQueue<T> {
	/// Creates an empty queue with its own cancellation token.
	pub fn new() -> Self {
		Self::with_token(CancellationToken::new())
	}

	/// Creates an empty queue cancelled together with `token`'s [`cancel`](Self::cancel).
	pub fn with_token(token: CancellationToken) -> Self {
		Self {
			state: Mutex::new(QueueState {
				items: VecDeque::new(),
				cancelled: false,
			}),
			ready: Condvar::new(),
			token,
		}
	}

	/// Enqueues `item` without blocking.
	///
	/// # Errors
	///
	/// Returns the item if the queue was cancelled.
	pub fn push(&self, item: T) -> Result<(), T> {
		let mut state = self.state.lock();
		if state.cancelled {
			return Err(item);
		}
		state.items.push_back(item);
		drop(state);
		self.ready.notify_one();
		Ok(())
	}

	/// Blocks until an item arrives or the queue is cancelled.
	pub fn recv(&self) -> Dequeue<T> {
		let mut state = self.state.lock();
		loop {
			if state.cancelled {
				return Dequeue::Cancelled;
			}
			if let Some(item) = state.items.pop_front() {
				return Dequeue::Item(item);
			}
			self.ready.wait(&mut state);
		}
	}

	/// Like [`recv`](Self::recv), giving up after `timeout`.
	///
	/// A timeout too large to express as a deadline waits without one.
	pub fn recv_timeout(&self, timeout: Duration) -> Dequeue<T> {
		let Some(deadline) = Instant::now().checked_add(timeout) else {
			return self.recv();
		};
		let mut state = self.state.lock();
		loop {
			if state.cancelled {
				return Dequeue::Cancelled;
			}
			if let Some(item) = state.items.pop_front() {
				return Dequeue::Item(item);
			}
			if self.ready.wait_until(&mut state, deadline).timed_out() {
				if state.cancelled {
					return Dequeue::Cancelled;
				}
				return state.items.pop_front().map_or(Dequeue::TimedOut, Dequeue::Item);
			}
		}
	}

	/// Cancels the queue and wakes the consumer. Only the first call has an effect.
	///
	/// Returns how many queued items were discarded.
	pub fn cancel(&self) -> usize {
		let discarded = {
			let mut state = self.state.lock();
			if state.cancelled {
				return 0;
			}
			state.cancelled = true;
			std::mem::take(&mut state.items)
		};
		self.ready.notify_all();
		self.token.cancel();
		// Dropped outside the lock; items may own arbitrary state.
		let count = discarded.len();
		drop(discarded);
		count
	}

	/// Returns true once [`cancel`](Self::cancel) has run.
	pub fn is_cancelled(&self) -> bool {
		self.state.lock().cancelled
	}

	/// Token cancelled together with the queue.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Number of queued items.
	pub fn len(&self) -> usize {
		self.state.lock().items.len()
	}

	/// Returns true if nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
