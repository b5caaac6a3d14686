use std::thread::JoinHandle;

use crate::worker::WorkerSpec;

/// Spawns the dedicated OS thread for one worker.
///
/// The caller's tracing span is carried into the new thread, so worker logs
/// nest under whatever span created the worker.
pub(crate) fn spawn_worker_thread<F, R>(spec: &WorkerSpec, f: F) -> std::io::Result<JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker = %spec.name(), stack_size = ?spec.stack_size_hint(), "worker.spawn_thread");
	let span = tracing::debug_span!("worker", worker = %spec.name());
	let mut builder = std::thread::Builder::new().name(spec.name().to_owned());
	if let Some(bytes) = spec.stack_size_hint() {
		builder = builder.stack_size(bytes);
	}
	builder.spawn(move || {
		let _entered = span.enter();
		f()
	})
}
