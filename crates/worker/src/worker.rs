//! Dedicated-thread worker with a blocking job queue.
//!
//! A [`WorkerThread`] owns one OS thread. The creator spawns it, then hands
//! over the job handler through [`WorkerThread::interface_ready`]; until that
//! handshake the execution thread waits and no job runs. The execution thread
//! then runs [`JobHandler::on_setup`] and processes jobs and invoked callables
//! in FIFO order until the worker is disposed.
//!
//! Every resource the execution thread tracks in a
//! [`ResourceRegistry`](tether_lifecycle::ResourceRegistry) is released when
//! the worker's [`DisposeSignal`] fires. That happens on the thread calling
//! [`WorkerThread::dispose`], usually the creator, not on the execution thread.

use std::fmt;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tether_lifecycle::{DisposeSignal, ThreadKey, WatcherId, ensure_on_thread, scope};
use tokio_util::sync::CancellationToken;

use crate::error::{HandshakeMisuse, JobError, Rejected, WorkerError};
use crate::handshake::Handshake;
use crate::panic::run_guarded;
use crate::queue::{Dequeue, JobQueue};
use crate::spawn::spawn_worker_thread;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
	name: String,
	stack_size: Option<usize>,
}

impl WorkerSpec {
	/// Creates a spec; `name` becomes the OS thread name.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			stack_size: None,
		}
	}

	/// Sets the execution thread's stack size in bytes.
	#[must_use]
	pub fn stack_size(mut self, bytes: usize) -> Self {
		self.stack_size = Some(bytes);
		self
	}

	/// Worker name.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn stack_size_hint(&self) -> Option<usize> {
		self.stack_size
	}
}

/// Owner-visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	/// Shared state built, thread not yet spawned.
	Created,
	/// Thread running, waiting for [`WorkerThread::interface_ready`].
	AwaitingHandshake,
	/// Handshake done; jobs flow.
	Running,
	/// Disposal requested.
	Cancelling,
	/// Execution thread gone and resources released.
	Disposed,
}

/// Why the job loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
	/// Cancellation observed by the blocking dequeue.
	Cancelled,
	/// Disposed before the handshake delivered a handler.
	HandshakeAbandoned,
	/// [`JobHandler::on_setup`] failed or panicked.
	SetupFailed(String),
	/// A job failed with no throw handler installed.
	JobFailed(JobError),
}

/// Application logic run on the execution thread.
pub trait JobHandler<J>: Send + 'static {
	/// Executes one job.
	///
	/// # Errors
	///
	/// An error is routed to the throw handler when one is installed and is
	/// fatal to the worker otherwise. Panics are treated the same way.
	fn do_job(&mut self, job: J, worker: &WorkerHandle<J>) -> Result<(), String>;

	/// Runs once after the handshake and before the first job.
	///
	/// The thread is already attached to the worker's dispose signal, so
	/// thread-affine resources may be tracked from here on.
	///
	/// # Errors
	///
	/// Failure ends the worker with [`WorkerExit::SetupFailed`].
	fn on_setup(&mut self, worker: &WorkerHandle<J>) -> Result<(), String> {
		let _ = worker;
		Ok(())
	}
}

/// Item on the job queue.
enum Item<J> {
	Job(J),
	Invoke(Box<dyn FnOnce() + Send>),
}

type ThrowHandler = Box<dyn FnMut(JobError) + Send>;

struct Shared<J> {
	name: String,
	creator: ThreadKey,
	worker_thread: ThreadKey,
	queue: JobQueue<Item<J>>,
	handshake: Handshake<Box<dyn JobHandler<J>>>,
	signal: DisposeSignal,
	state: Mutex<WorkerState>,
	exit: Mutex<Option<WorkerExit>>,
	exited: Condvar,
	throw_handler: Mutex<Option<ThrowHandler>>,
}

impl<J> Shared<J> {
	fn new(name: String, creator: ThreadKey, worker_thread: ThreadKey) -> Self {
		Self {
			name,
			creator,
			worker_thread,
			queue: JobQueue::new(),
			handshake: Handshake::new(),
			signal: DisposeSignal::new(),
			state: Mutex::new(WorkerState::Created),
			exit: Mutex::new(None),
			exited: Condvar::new(),
			throw_handler: Mutex::new(None),
		}
	}

	fn set_state(&self, from: &[WorkerState], to: WorkerState) -> bool {
		let mut state = self.state.lock();
		if !from.contains(&*state) {
			return false;
		}
		*state = to;
		true
	}

	/// Hands `error` to the throw handler. Returns it back if nobody took it.
	fn route_failure(&self, error: JobError) -> Option<JobError> {
		// Taken out for the call so the handler may replace itself.
		let Some(mut handler) = self.throw_handler.lock().take() else {
			return Some(error);
		};
		let outcome = run_guarded(|| {
			handler(error);
			Ok(())
		});
		let mut slot = self.throw_handler.lock();
		if slot.is_none() {
			*slot = Some(handler);
		}
		outcome.err()
	}

	fn finish(&self, exit: WorkerExit) {
		*self.exit.lock() = Some(exit);
		self.exited.notify_all();
	}
}

/// Non-owning handle to a worker.
///
/// Producers use it to submit work from any thread; the execution thread
/// receives one in every [`JobHandler`] call. Dropping it never disposes the
/// worker.
pub struct WorkerHandle<J> {
	shared: Arc<Shared<J>>,
}

impl<J> Clone for WorkerHandle<J> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<J> fmt::Debug for WorkerHandle<J> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerHandle")
			.field("name", &self.shared.name)
			.field("thread", &self.shared.worker_thread)
			.field("cancelled", &self.shared.queue.is_cancelled())
			.finish()
	}
}

impl<J: Send + 'static> WorkerHandle<J> {
	/// Worker name.
	pub fn name(&self) -> &str {
		&self.shared.name
	}

	/// Identity of the execution thread.
	pub fn thread_key(&self) -> ThreadKey {
		self.shared.worker_thread
	}

	/// Returns true when called on the execution thread.
	pub fn is_worker_thread(&self) -> bool {
		self.shared.worker_thread.is_current()
	}

	/// Queues `job` for [`JobHandler::do_job`]. Never blocks.
	///
	/// # Errors
	///
	/// Once the worker is cancelled the job is handed back in [`Rejected`];
	/// it would otherwise never run.
	pub fn add_job(&self, job: J) -> Result<(), Rejected<J>> {
		match self.shared.queue.push(Item::Job(job)) {
			Ok(()) => Ok(()),
			Err(Item::Job(job)) => {
				tracing::debug!(worker = %self.shared.name, "worker.job_rejected");
				Err(Rejected(job))
			}
			Err(Item::Invoke(_)) => unreachable!("add_job only pushes jobs"),
		}
	}

	/// Runs `callable` on the execution thread.
	///
	/// On the execution thread itself it runs immediately, ahead of anything
	/// already queued. From any other thread it is queued behind pending jobs.
	///
	/// # Errors
	///
	/// [`WorkerError::Cancelled`] if the worker no longer accepts work.
	pub fn invoke(&self, callable: impl FnOnce() + Send + 'static) -> Result<(), WorkerError> {
		if self.is_worker_thread() {
			callable();
			return Ok(());
		}
		self.shared.queue.push(Item::Invoke(Box::new(callable))).map_err(|_| WorkerError::Cancelled)
	}

	/// Installs the handler receiving job failures, replacing any previous one.
	///
	/// With a handler installed, failed jobs no longer stop the worker.
	///
	/// # Errors
	///
	/// [`WorkerError::Lifecycle`] off the execution thread.
	pub fn set_job_throw_handler(&self, handler: impl FnMut(JobError) + Send + 'static) -> Result<(), WorkerError> {
		ensure_on_thread(self.shared.worker_thread, "WorkerHandle::set_job_throw_handler")?;
		*self.shared.throw_handler.lock() = Some(Box::new(handler));
		Ok(())
	}

	/// Fails unless called on the execution thread.
	///
	/// # Errors
	///
	/// [`WorkerError::Lifecycle`] wrapping
	/// [`CrossThreadAccess`](tether_lifecycle::LifecycleError::CrossThreadAccess).
	pub fn ensure_worker_thread(&self) -> Result<(), WorkerError> {
		ensure_on_thread(self.shared.worker_thread, "WorkerHandle::ensure_worker_thread")?;
		Ok(())
	}

	/// Returns true once disposal has started or the job loop has ended.
	pub fn is_cancelled(&self) -> bool {
		self.shared.queue.is_cancelled()
	}

	/// Token cancelled when the worker stops accepting work.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.shared.queue.token().child_token()
	}

	/// Current lifecycle state.
	pub fn state(&self) -> WorkerState {
		*self.shared.state.lock()
	}

	/// Exit reason, once the job loop has ended.
	pub fn exit(&self) -> Option<WorkerExit> {
		self.shared.exit.lock().clone()
	}

	/// Blocks until the job loop ends or `timeout` elapses.
	///
	/// A timeout too large to express as a deadline waits without one.
	pub fn wait_for_exit(&self, timeout: Duration) -> Option<WorkerExit> {
		let deadline = Instant::now().checked_add(timeout);
		let mut exit = self.shared.exit.lock();
		while exit.is_none() {
			match deadline {
				Some(deadline) => {
					if self.shared.exited.wait_until(&mut exit, deadline).timed_out() {
						break;
					}
				}
				None => self.shared.exited.wait(&mut exit),
			}
		}
		exit.clone()
	}

	/// Blocks until [`JobHandler::on_setup`] has completed.
	///
	/// Returns false on timeout, or if the worker ended without finishing setup.
	pub fn wait_for_setup(&self, timeout: Duration) -> bool {
		self.shared.handshake.wait_setup(timeout)
	}
}

/// Watch-only view of a worker's dispose signal.
///
/// Firing the signal is reserved to [`WorkerThread::dispose`], which stops the
/// job loop before the execution thread's resources are released.
pub struct WorkerSignal<'a> {
	signal: &'a DisposeSignal,
}

impl fmt::Debug for WorkerSignal<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("WorkerSignal").field(self.signal).finish()
	}
}

impl WorkerSignal<'_> {
	/// See [`DisposeSignal::on_dispose`].
	pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) -> WatcherId {
		self.signal.on_dispose(callback)
	}

	/// See [`DisposeSignal::on_dispose_fallible`].
	///
	/// # Errors
	///
	/// The callback's own failure when the worker is already disposed.
	pub fn on_dispose_fallible(
		&self,
		callback: impl FnOnce() -> tether_lifecycle::Result<()> + Send + 'static,
	) -> tether_lifecycle::Result<WatcherId> {
		self.signal.on_dispose_fallible(callback)
	}

	/// See [`DisposeSignal::off_dispose`].
	///
	/// # Errors
	///
	/// [`UnknownWatcher`](tether_lifecycle::LifecycleError::UnknownWatcher) if
	/// `id` is not pending.
	pub fn off_dispose(&self, id: WatcherId) -> tether_lifecycle::Result<()> {
		self.signal.off_dispose(id)
	}

	/// Returns true once the worker's resources have been handed to release.
	pub fn is_disposed(&self) -> bool {
		self.signal.is_disposed()
	}
}

/// Owner of a dedicated worker thread.
///
/// Created with [`spawn`](Self::spawn) on the creator thread, which must then
/// call [`interface_ready`](Self::interface_ready) before handing the worker
/// out, typically as the last step of the enclosing type's constructor.
/// Dropping the owner disposes the worker.
pub struct WorkerThread<J: Send + 'static> {
	handle: WorkerHandle<J>,
	join: Mutex<Option<JoinHandle<()>>>,
}

impl<J: Send + 'static> fmt::Debug for WorkerThread<J> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerThread")
			.field("name", &self.handle.shared.name)
			.field("state", &self.handle.state())
			.finish_non_exhaustive()
	}
}

impl<J: Send + 'static> WorkerThread<J> {
	/// Spawns the execution thread. The calling thread becomes the creator.
	///
	/// # Errors
	///
	/// [`WorkerError::Spawn`] if the OS refuses the thread, or the thread
	/// ends before it receives its state.
	pub fn spawn(spec: WorkerSpec) -> Result<Self, WorkerError> {
		let (tx, rx) = mpsc::channel::<Arc<Shared<J>>>();
		let join = spawn_worker_thread(&spec, move || {
			if let Ok(shared) = rx.recv() {
				run_worker(shared);
			}
		})?;

		let shared = Arc::new(Shared::new(spec.name, ThreadKey::current(), ThreadKey::of(join.thread())));
		if let Err(err) = hand_over(&tx, &shared) {
			if join.join().is_err() {
				tracing::warn!(worker = %shared.name, "worker.join_panicked");
			}
			return Err(err);
		}
		shared.set_state(&[WorkerState::Created], WorkerState::AwaitingHandshake);

		tracing::debug!(worker = %shared.name, thread = ?shared.worker_thread, "worker.spawn");
		Ok(Self {
			handle: WorkerHandle { shared },
			join: Mutex::new(Some(join)),
		})
	}

	/// Spawns a worker and completes the handshake with `handler` at once.
	///
	/// # Errors
	///
	/// As [`spawn`](Self::spawn).
	pub fn start(spec: WorkerSpec, handler: impl JobHandler<J>) -> Result<Self, WorkerError> {
		let worker = Self::spawn(spec)?;
		worker.interface_ready(handler)?;
		Ok(worker)
	}

	/// Completes the startup handshake, handing `handler` to the execution thread.
	///
	/// Must be called exactly once, on the creator thread.
	///
	/// # Errors
	///
	/// * [`HandshakeMisuse::WrongThread`] off the creator thread.
	/// * [`HandshakeMisuse::AlreadyCalled`] on a second call.
	/// * [`WorkerError::Cancelled`] if the worker was already disposed.
	pub fn interface_ready(&self, handler: impl JobHandler<J>) -> Result<(), WorkerError> {
		let shared = &self.handle.shared;
		let actual = ThreadKey::current();
		if actual != shared.creator {
			return Err(HandshakeMisuse::WrongThread {
				expected: shared.creator,
				actual,
			}
			.into());
		}

		shared.handshake.deliver(Box::new(handler))?;
		shared.set_state(&[WorkerState::AwaitingHandshake], WorkerState::Running);
		tracing::debug!(worker = %shared.name, "worker.handshake");
		Ok(())
	}

	/// Non-owning handle for producers.
	pub fn handle(&self) -> WorkerHandle<J> {
		self.handle.clone()
	}

	/// Signal fired when the worker is disposed. Register watchers here to
	/// chain teardown of dependent state.
	pub fn signal(&self) -> WorkerSignal<'_> {
		WorkerSignal {
			signal: &self.handle.shared.signal,
		}
	}

	/// See [`WorkerHandle::add_job`].
	pub fn add_job(&self, job: J) -> Result<(), Rejected<J>> {
		self.handle.add_job(job)
	}

	/// See [`WorkerHandle::invoke`].
	pub fn invoke(&self, callable: impl FnOnce() + Send + 'static) -> Result<(), WorkerError> {
		self.handle.invoke(callable)
	}

	/// See [`WorkerHandle::set_job_throw_handler`].
	pub fn set_job_throw_handler(&self, handler: impl FnMut(JobError) + Send + 'static) -> Result<(), WorkerError> {
		self.handle.set_job_throw_handler(handler)
	}

	/// See [`WorkerHandle::ensure_worker_thread`].
	pub fn ensure_worker_thread(&self) -> Result<(), WorkerError> {
		self.handle.ensure_worker_thread()
	}

	/// See [`WorkerHandle::state`].
	pub fn state(&self) -> WorkerState {
		self.handle.state()
	}

	/// See [`WorkerHandle::exit`].
	pub fn exit(&self) -> Option<WorkerExit> {
		self.handle.exit()
	}

	/// See [`WorkerHandle::wait_for_setup`].
	pub fn wait_for_setup(&self, timeout: Duration) -> bool {
		self.handle.wait_for_setup(timeout)
	}

	/// See [`WorkerHandle::cancellation_token`].
	pub fn cancellation_token(&self) -> CancellationToken {
		self.handle.cancellation_token()
	}

	/// Tears the worker down. Only the first call does anything.
	///
	/// Cancels the queue (pending jobs are discarded) and the handshake wait,
	/// joins the execution thread unless called from it, then disposes the
	/// worker's signal. That releases every resource the execution thread
	/// tracked, on the calling thread. Once the thread is joined and released
	/// its tombstone in the thread scope table is dropped.
	///
	/// # Errors
	///
	/// * [`WorkerError::Dispose`] if dispose watchers failed, including
	///   forbidden disposal.
	/// * [`HandshakeMisuse::NeverCalled`] if the handshake never happened.
	///
	/// Teardown completes in both cases.
	pub fn dispose(&self) -> Result<(), WorkerError> {
		let shared = &self.handle.shared;
		if !shared.set_state(
			&[WorkerState::Created, WorkerState::AwaitingHandshake, WorkerState::Running],
			WorkerState::Cancelling,
		) {
			return Ok(());
		}

		let discarded = shared.queue.cancel();
		shared.handshake.close();
		tracing::debug!(worker = %shared.name, discarded, "worker.dispose");

		let mut joined = false;
		let join = self.join.lock().take();
		if let Some(join) = join {
			if ThreadKey::of(join.thread()).is_current() {
				// Disposed from inside a job; the loop exits at its next dequeue.
				drop(join);
			} else {
				if join.join().is_err() {
					tracing::warn!(worker = %shared.name, "worker.join_panicked");
				}
				joined = true;
			}
		}

		let released = shared.signal.dispose();
		if joined && released.is_ok() {
			scope::forget(shared.worker_thread);
		}
		shared.set_state(&[WorkerState::Cancelling], WorkerState::Disposed);

		released?;
		if !shared.handshake.was_delivered() {
			return Err(HandshakeMisuse::NeverCalled.into());
		}
		Ok(())
	}
}

impl<J: Send + 'static> Drop for WorkerThread<J> {
	fn drop(&mut self) {
		if let Err(err) = self.dispose() {
			tracing::warn!(worker = %self.handle.shared.name, %err, "worker.drop_dispose_failed");
		}
	}
}

/// Sends the execution thread its state.
fn hand_over<J>(tx: &mpsc::Sender<Arc<Shared<J>>>, shared: &Arc<Shared<J>>) -> Result<(), WorkerError> {
	tx.send(Arc::clone(shared)).map_err(|_| {
		WorkerError::Spawn(io::Error::other(format!("worker thread `{}` exited before start", shared.name)))
	})
}

/// Body of the execution thread.
fn run_worker<J: Send + 'static>(shared: Arc<Shared<J>>) {
	let handle = WorkerHandle {
		shared: Arc::clone(&shared),
	};

	let exit = match scope::attach(shared.worker_thread, &shared.signal) {
		// Without an owner nothing the thread tracks could ever be released.
		Err(err) => WorkerExit::SetupFailed(format!("scope attach failed: {err}")),
		Ok(()) => match shared.handshake.wait() {
			None => WorkerExit::HandshakeAbandoned,
			Some(mut handler) => match run_guarded(|| handler.on_setup(&handle)) {
				Err(err) => WorkerExit::SetupFailed(err.message().to_owned()),
				Ok(()) => {
					shared.handshake.mark_setup_done();
					tracing::debug!(worker = %shared.name, "worker.setup_done");
					job_loop(&shared, &handle, handler.as_mut())
				}
			},
		},
	};

	// Producers learn the loop is gone through `Rejected`.
	shared.queue.cancel();
	shared.handshake.close();
	if matches!(exit, WorkerExit::JobFailed(_) | WorkerExit::SetupFailed(_)) {
		tracing::error!(worker = %shared.name, ?exit, "worker.exit");
	} else {
		tracing::debug!(worker = %shared.name, ?exit, "worker.exit");
	}
	shared.finish(exit);
}

fn job_loop<J: Send + 'static>(shared: &Shared<J>, handle: &WorkerHandle<J>, handler: &mut dyn JobHandler<J>) -> WorkerExit {
	loop {
		let result = match shared.queue.recv() {
			Dequeue::Cancelled => return WorkerExit::Cancelled,
			Dequeue::TimedOut => continue,
			Dequeue::Item(Item::Job(job)) => {
				tracing::trace!(worker = %shared.name, "worker.job");
				run_guarded(|| handler.do_job(job, handle))
			}
			Dequeue::Item(Item::Invoke(callable)) => {
				tracing::trace!(worker = %shared.name, "worker.invoke");
				run_guarded(|| {
					callable();
					Ok(())
				})
			}
		};

		if let Err(err) = result {
			if let Some(fatal) = shared.route_failure(err) {
				return WorkerExit::JobFailed(fatal);
			}
		}
	}
}

#[cfg(test)]
mod tests;
