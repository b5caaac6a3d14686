use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;
use tether_lifecycle::LifecycleError;

use super::*;

const WAIT: Duration = Duration::from_secs(5);

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Test handler driven by the job names it receives.
#[derive(Default)]
struct Script {
	log: Log,
	caught: Option<Arc<Mutex<Vec<JobError>>>>,
	setup_error: Option<String>,
	/// `entered` is signalled when the `gate` job starts; the job then waits on `release`.
	gate: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
}

impl JobHandler<&'static str> for Script {
	fn on_setup(&mut self, worker: &WorkerHandle<&'static str>) -> Result<(), String> {
		if let Some(err) = self.setup_error.take() {
			return Err(err);
		}
		if let Some(caught) = self.caught.clone() {
			worker
				.set_job_throw_handler(move |err| caught.lock().push(err))
				.map_err(|err| err.to_string())?;
		}
		Ok(())
	}

	fn do_job(&mut self, job: &'static str, _worker: &WorkerHandle<&'static str>) -> Result<(), String> {
		match job {
			"fail" => Err("requested failure".into()),
			"panic" => panic!("requested panic"),
			"gate" => {
				if let Some((entered, release)) = &self.gate {
					let _ = entered.send(());
					let _ = release.recv_timeout(WAIT);
				}
				self.log.lock().push("gate");
				Ok(())
			}
			other => {
				self.log.lock().push(other);
				Ok(())
			}
		}
	}
}

fn started(script: Script) -> WorkerThread<&'static str> {
	WorkerThread::start(WorkerSpec::new("test-worker"), script).unwrap()
}

/// Returns once everything queued before the call has been processed.
fn flush(worker: &WorkerThread<&'static str>) {
	let (tx, rx) = mpsc::channel();
	worker
		.invoke(move || {
			let _ = tx.send(());
		})
		.unwrap();
	rx.recv_timeout(WAIT).unwrap();
}

#[test]
fn states_follow_the_lifecycle() {
	let worker = WorkerThread::<&'static str>::spawn(WorkerSpec::new("states")).unwrap();
	assert_eq!(worker.state(), WorkerState::AwaitingHandshake);
	assert_eq!(worker.handle().name(), "states");

	worker.interface_ready(Script::default()).unwrap();
	assert_eq!(worker.state(), WorkerState::Running);
	assert!(worker.wait_for_setup(WAIT));

	worker.dispose().unwrap();
	assert_eq!(worker.state(), WorkerState::Disposed);
	assert_eq!(worker.exit(), Some(WorkerExit::Cancelled));
	assert!(worker.signal().is_disposed());

	worker.dispose().unwrap();
}

#[test]
fn worker_thread_carries_the_spec_name() {
	let worker = started(Script::default());
	let (tx, rx) = mpsc::channel();
	worker
		.invoke(move || {
			let _ = tx.send(thread::current().name().map(str::to_owned));
		})
		.unwrap();
	assert_eq!(rx.recv_timeout(WAIT).unwrap().as_deref(), Some("test-worker"));
}

#[test]
fn interface_ready_twice_fails() {
	let worker = started(Script::default());
	let err = worker.interface_ready(Script::default()).unwrap_err();
	assert!(matches!(err, WorkerError::HandshakeMisuse(HandshakeMisuse::AlreadyCalled)));
	assert_eq!(worker.state(), WorkerState::Running);
}

#[test]
fn interface_ready_off_the_creator_thread_fails() {
	let worker = WorkerThread::<&'static str>::spawn(WorkerSpec::new("wrong-thread")).unwrap();
	let creator = ThreadKey::current();

	let err = thread::scope(|s| s.spawn(|| worker.interface_ready(Script::default())).join().unwrap()).unwrap_err();
	assert!(matches!(
		err,
		WorkerError::HandshakeMisuse(HandshakeMisuse::WrongThread { expected, .. }) if expected == creator
	));

	// The creator can still complete the handshake.
	worker.interface_ready(Script::default()).unwrap();
	worker.dispose().unwrap();
}

#[test]
fn dispose_before_the_handshake_reports_never_called() {
	let worker = WorkerThread::<&'static str>::spawn(WorkerSpec::new("never-ready")).unwrap();
	let handle = worker.handle();

	let err = worker.dispose().unwrap_err();
	assert!(matches!(err, WorkerError::HandshakeMisuse(HandshakeMisuse::NeverCalled)));
	assert_eq!(worker.state(), WorkerState::Disposed);
	assert_eq!(handle.exit(), Some(WorkerExit::HandshakeAbandoned));
	assert!(!handle.wait_for_setup(Duration::ZERO));

	assert!(matches!(worker.interface_ready(Script::default()), Err(WorkerError::Cancelled)));
	assert_eq!(worker.add_job("late"), Err(Rejected("late")));
}

#[test]
fn worker_only_operations_check_the_thread() {
	let worker = started(Script::default());
	let handle = worker.handle();

	assert!(matches!(
		worker.set_job_throw_handler(|_| {}),
		Err(WorkerError::Lifecycle(LifecycleError::CrossThreadAccess { .. }))
	));
	assert!(worker.ensure_worker_thread().is_err());

	let (tx, rx) = mpsc::channel();
	let inner = handle.clone();
	worker
		.invoke(move || {
			let _ = tx.send((inner.ensure_worker_thread().is_ok(), inner.is_worker_thread()));
		})
		.unwrap();
	assert_eq!(rx.recv_timeout(WAIT).unwrap(), (true, true));
	assert_eq!(handle.thread_key(), worker.handle().thread_key());
}

#[test]
fn throw_handler_keeps_the_loop_alive() {
	let caught = Arc::new(Mutex::new(Vec::new()));
	let script = Script {
		caught: Some(Arc::clone(&caught)),
		..Script::default()
	};
	let log = Arc::clone(&script.log);
	let worker = started(script);

	for job in ["a", "fail", "panic", "b"] {
		worker.add_job(job).unwrap();
	}
	worker.invoke(|| panic!("invoke panic")).unwrap();
	flush(&worker);

	assert_eq!(*log.lock(), vec!["a", "b"]);
	let caught = caught.lock();
	assert_eq!(caught.len(), 3);
	assert_eq!(caught[0], JobError::Failed("requested failure".into()));
	assert!(matches!(&caught[1], JobError::Panicked(msg) if msg.contains("requested panic")));
	assert!(matches!(&caught[2], JobError::Panicked(msg) if msg.contains("invoke panic")));
	drop(caught);

	worker.dispose().unwrap();
	assert_eq!(worker.exit(), Some(WorkerExit::Cancelled));
}

#[test]
fn unhandled_job_error_ends_the_loop() {
	let script = Script::default();
	let log = Arc::clone(&script.log);
	let worker = started(script);
	let token = worker.cancellation_token();

	for job in ["a", "fail", "b"] {
		worker.add_job(job).unwrap();
	}
	let exit = worker.handle().wait_for_exit(WAIT);
	assert_eq!(exit, Some(WorkerExit::JobFailed(JobError::Failed("requested failure".into()))));
	assert_eq!(*log.lock(), vec!["a"]);

	assert!(token.is_cancelled());
	assert_eq!(worker.add_job("c"), Err(Rejected("c")));
	assert!(matches!(worker.invoke(|| {}), Err(WorkerError::Cancelled)));

	// Teardown still runs normally.
	worker.dispose().unwrap();
	assert_eq!(worker.state(), WorkerState::Disposed);
}

#[test]
fn panicking_throw_handler_is_fatal() {
	struct Rethrow;

	impl JobHandler<&'static str> for Rethrow {
		fn on_setup(&mut self, worker: &WorkerHandle<&'static str>) -> Result<(), String> {
			worker
				.set_job_throw_handler(|err| panic!("rethrown: {err}"))
				.map_err(|err| err.to_string())
		}

		fn do_job(&mut self, _job: &'static str, _worker: &WorkerHandle<&'static str>) -> Result<(), String> {
			Err("always".into())
		}
	}

	let worker = WorkerThread::start(WorkerSpec::new("rethrow"), Rethrow).unwrap();
	worker.add_job("x").unwrap();
	let exit = worker.handle().wait_for_exit(WAIT);
	assert!(matches!(exit, Some(WorkerExit::JobFailed(JobError::Panicked(msg))) if msg.contains("rethrown: job failed: always")));
}

#[test]
fn setup_failure_ends_the_worker_before_any_job() {
	let script = Script {
		setup_error: Some("no config".into()),
		..Script::default()
	};
	let log = Arc::clone(&script.log);
	let worker = started(script);
	let _ = worker.add_job("a");

	assert_eq!(worker.handle().wait_for_exit(WAIT), Some(WorkerExit::SetupFailed("no config".into())));
	assert!(!worker.wait_for_setup(Duration::ZERO));
	assert!(log.lock().is_empty());
	worker.dispose().unwrap();
}

#[test]
fn dispose_waits_for_the_running_job_and_discards_the_rest() {
	let (entered_tx, entered_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel();
	let script = Script {
		gate: Some((entered_tx, release_rx)),
		..Script::default()
	};
	let log = Arc::clone(&script.log);
	let worker = started(script);

	worker.add_job("gate").unwrap();
	worker.add_job("never").unwrap();
	entered_rx.recv_timeout(WAIT).unwrap();

	thread::scope(|s| {
		let disposer = s.spawn(|| worker.dispose());
		while !worker.handle().is_cancelled() {
			thread::sleep(Duration::from_millis(1));
		}
		assert_eq!(worker.state(), WorkerState::Cancelling);
		release_tx.send(()).unwrap();
		disposer.join().unwrap().unwrap();
	});

	assert_eq!(*log.lock(), vec!["gate"]);
	assert_eq!(worker.exit(), Some(WorkerExit::Cancelled));
	assert_eq!(worker.state(), WorkerState::Disposed);
}

#[test]
fn dispose_signal_watchers_run_after_the_thread_exits() {
	let worker = started(Script::default());
	let handle = worker.handle();
	let seen = Arc::new(Mutex::new(None));
	let sink = Arc::clone(&seen);
	worker.signal().on_dispose(move || *sink.lock() = Some(handle.exit()));

	worker.dispose().unwrap();
	assert_eq!(*seen.lock(), Some(Some(WorkerExit::Cancelled)));
}

#[test]
fn dropping_the_owner_disposes() {
	let worker = started(Script::default());
	let handle = worker.handle();
	drop(worker);
	assert_eq!(handle.state(), WorkerState::Disposed);
	assert_eq!(handle.exit(), Some(WorkerExit::Cancelled));
	assert_eq!(handle.add_job("late"), Err(Rejected("late")));
}

#[test]
fn stack_size_is_configurable() {
	let spec = WorkerSpec::new("big-stack").stack_size(4 * 1024 * 1024);
	assert_eq!(spec.stack_size_hint(), Some(4 * 1024 * 1024));
	let worker = WorkerThread::start(spec, Script::default()).unwrap();
	flush(&worker);
}

#[test]
fn unbounded_waits_return_once_the_worker_settles() {
	let worker = started(Script::default());
	assert!(worker.wait_for_setup(Duration::MAX));

	worker.add_job("fail").unwrap();
	assert_eq!(
		worker.handle().wait_for_exit(Duration::MAX),
		Some(WorkerExit::JobFailed(JobError::Failed("requested failure".into())))
	);
}

#[test]
fn failed_scope_attach_ends_the_worker_before_the_handshake() {
	// Keyed to this thread, so attaching from the execution thread is refused.
	let shared = Arc::new(Shared::<&'static str>::new("misattached".into(), ThreadKey::current(), ThreadKey::current()));
	let runner = Arc::clone(&shared);
	thread::spawn(move || run_worker(runner)).join().unwrap();

	let exit = shared.exit.lock().clone();
	assert!(matches!(exit, Some(WorkerExit::SetupFailed(msg)) if msg.contains("scope attach failed")));
	assert!(shared.queue.is_cancelled());
	assert!(matches!(
		shared.handshake.deliver(Box::new(Script::default())),
		Err(WorkerError::Cancelled)
	));
}

#[test]
fn hand_over_to_a_vanished_thread_is_a_spawn_error() {
	let (tx, rx) = mpsc::channel();
	drop(rx);
	let shared = Arc::new(Shared::<&'static str>::new("vanished".into(), ThreadKey::current(), ThreadKey::current()));
	let err = hand_over(&tx, &shared).unwrap_err();
	assert!(matches!(&err, WorkerError::Spawn(source) if source.to_string().contains("vanished")));
}
