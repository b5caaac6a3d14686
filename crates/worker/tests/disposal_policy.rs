//! Worker teardown under the process-wide disposal policy.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_lifecycle::{DisposalPolicy, DisposalPolicyGuard, LifecycleError, ResourceRegistry};
use tether_worker::{JobHandler, WorkerError, WorkerHandle, WorkerSpec, WorkerState, WorkerThread};

struct Track {
	registry: Arc<ResourceRegistry<u32>>,
}

impl JobHandler<u32> for Track {
	fn do_job(&mut self, job: u32, worker: &WorkerHandle<u32>) -> Result<(), String> {
		self.registry.track(worker.thread_key(), job).map_err(|err| err.to_string())
	}
}

fn tracking_worker(name: &str) -> (WorkerThread<u32>, Arc<ResourceRegistry<u32>>, Arc<Mutex<Vec<u32>>>) {
	let _ = tracing_subscriber::fmt::try_init();
	let freed = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&freed);
	let registry = ResourceRegistry::new(name, move |res| sink.lock().push(res));
	let worker = WorkerThread::start(
		WorkerSpec::new(name),
		Track {
			registry: Arc::clone(&registry),
		},
	)
	.unwrap();

	worker.add_job(1).unwrap();
	worker.add_job(2).unwrap();
	let (tx, rx) = mpsc::channel();
	worker
		.invoke(move || {
			let _ = tx.send(());
		})
		.unwrap();
	rx.recv_timeout(Duration::from_secs(5)).unwrap();
	(worker, registry, freed)
}

#[test]
#[serial_test::serial]
fn forbidden_disposal_is_reported_and_releases_nothing() {
	let (worker, registry, freed) = tracking_worker("forbidden-worker");
	let worker_thread = worker.handle().thread_key();

	let _forbid = DisposalPolicyGuard::new(DisposalPolicy::Forbidden);
	let err = worker.dispose().unwrap_err();

	assert!(err.is_forbidden_disposal(), "unexpected error: {err}");
	let WorkerError::Dispose(dispose) = &err else {
		panic!("expected a dispose failure, got {err:?}");
	};
	assert_eq!(dispose.failures[0].error, LifecycleError::ForbiddenDisposal);

	// The thread is gone either way; its resources stay tracked.
	assert_eq!(worker.state(), WorkerState::Disposed);
	assert!(freed.lock().is_empty());
	assert_eq!(registry.tracked(worker_thread), vec![1, 2]);
	// The kept slot is sealed and stays visible.
	assert!(!registry.is_attached(worker_thread));
	assert!(!tether_lifecycle::scope::is_attached(worker_thread));
	assert!(tether_lifecycle::scope::is_released(worker_thread));
	assert_eq!(registry.thread_count(), 1);
}

#[test]
#[serial_test::serial]
fn permitted_disposal_releases_worker_resources() {
	let (worker, registry, freed) = tracking_worker("permitted-worker");
	worker.dispose().unwrap();
	assert_eq!(*freed.lock(), vec![1, 2]);
	assert_eq!(registry.thread_count(), 0);
}
