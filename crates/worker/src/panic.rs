use std::panic::AssertUnwindSafe;

use tether_lifecycle::panic_message;

use crate::error::JobError;

/// Runs one unit of user work, converting both error returns and panics into [`JobError`].
pub(crate) fn run_guarded(work: impl FnOnce() -> Result<(), String>) -> Result<(), JobError> {
	match std::panic::catch_unwind(AssertUnwindSafe(work)) {
		Ok(Ok(())) => Ok(()),
		Ok(Err(message)) => Err(JobError::Failed(message)),
		Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn passes_success_through() {
		assert_eq!(run_guarded(|| Ok(())), Ok(()));
	}

	#[test]
	fn reports_returned_errors() {
		assert_eq!(run_guarded(|| Err("bad input".into())), Err(JobError::Failed("bad input".into())));
	}

	#[test]
	fn contains_str_and_string_panics() {
		let err = run_guarded(|| panic!("boom-str")).unwrap_err();
		assert!(matches!(&err, JobError::Panicked(msg) if msg.contains("boom-str")), "got: {err}");

		let err = run_guarded(|| panic!("{}", String::from("boom-string"))).unwrap_err();
		assert!(matches!(&err, JobError::Panicked(msg) if msg.contains("boom-string")), "got: {err}");
	}
}
