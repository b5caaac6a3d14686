use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{HandshakeMisuse, WorkerError};

struct HandshakeState<H> {
	/// Delivered payload not yet taken by the execution thread.
	payload: Option<H>,
	delivered: bool,
	/// Set on cancellation or once the execution thread gives up waiting.
	closed: bool,
	setup_done: bool,
}

/// Startup rendezvous between a worker's creator and its execution thread.
///
/// The creator delivers a payload exactly once; the execution thread blocks
/// until it arrives or the handshake is closed. Afterwards the execution
/// thread reports setup completion, which observers may wait on.
pub(crate) struct Handshake<H> {
	state: Mutex<HandshakeState<H>>,
	changed: Condvar,
}

impl<H> Handshake<H> {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(HandshakeState {
				payload: None,
				delivered: false,
				closed: false,
				setup_done: false,
			}),
			changed: Condvar::new(),
		}
	}

	/// Hands `payload` to the execution thread.
	pub(crate) fn deliver(&self, payload: H) -> Result<(), WorkerError> {
		let mut state = self.state.lock();
		if state.delivered {
			return Err(HandshakeMisuse::AlreadyCalled.into());
		}
		if state.closed {
			return Err(WorkerError::Cancelled);
		}
		state.delivered = true;
		state.payload = Some(payload);
		drop(state);
		self.changed.notify_all();
		Ok(())
	}

	/// Blocks until the payload is delivered. `None` if the handshake was closed first.
	pub(crate) fn wait(&self) -> Option<H> {
		let mut state = self.state.lock();
		loop {
			if state.closed {
				return None;
			}
			if let Some(payload) = state.payload.take() {
				return Some(payload);
			}
			self.changed.wait(&mut state);
		}
	}

	/// Records that setup finished and wakes setup waiters.
	pub(crate) fn mark_setup_done(&self) {
		self.state.lock().setup_done = true;
		self.changed.notify_all();
	}

	/// Closes the handshake. Pending and future waits return immediately.
	///
	/// A payload delivered but not yet taken is dropped.
	pub(crate) fn close(&self) {
		let payload = {
			let mut state = self.state.lock();
			state.closed = true;
			state.payload.take()
		};
		self.changed.notify_all();
		drop(payload);
	}

	/// Waits for setup to finish. Returns false on timeout or if the handshake
	/// closed without setup completing.
	pub(crate) fn wait_setup(&self, timeout: Duration) -> bool {
		let deadline = Instant::now().checked_add(timeout);
		let mut state = self.state.lock();
		while !state.setup_done && !state.closed {
			match deadline {
				Some(deadline) => {
					if self.changed.wait_until(&mut state, deadline).timed_out() {
						break;
					}
				}
				None => self.changed.wait(&mut state),
			}
		}
		state.setup_done
	}

	pub(crate) fn was_delivered(&self) -> bool {
		self.state.lock().delivered
	}
}
