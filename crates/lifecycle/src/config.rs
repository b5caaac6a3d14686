use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LifecycleError, Result};

static DISPOSAL_FORBIDDEN: AtomicBool = AtomicBool::new(false);

/// Whether thread teardown may release tracked resources.
///
/// Test environments that assert "no worker ever shuts down mid-run" switch this
/// to [`DisposalPolicy::Forbidden`]; any disposal that reaches a resource release
/// afterwards reports [`LifecycleError::ForbiddenDisposal`] instead of succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalPolicy {
	/// Disposal releases resources normally.
	#[default]
	Permitted,
	/// Disposal is a fatal error.
	Forbidden,
}

/// Returns the current process-wide policy.
pub fn disposal_policy() -> DisposalPolicy {
	if DISPOSAL_FORBIDDEN.load(Ordering::Acquire) {
		DisposalPolicy::Forbidden
	} else {
		DisposalPolicy::Permitted
	}
}

/// Sets the process-wide policy and returns the previous one.
pub fn set_disposal_policy(policy: DisposalPolicy) -> DisposalPolicy {
	let was_forbidden = DISPOSAL_FORBIDDEN.swap(policy == DisposalPolicy::Forbidden, Ordering::AcqRel);
	tracing::debug!(?policy, "lifecycle.disposal_policy");
	if was_forbidden { DisposalPolicy::Forbidden } else { DisposalPolicy::Permitted }
}

/// Fails with [`LifecycleError::ForbiddenDisposal`] while disposal is forbidden.
pub fn ensure_disposal_permitted() -> Result<()> {
	match disposal_policy() {
		DisposalPolicy::Permitted => Ok(()),
		DisposalPolicy::Forbidden => Err(LifecycleError::ForbiddenDisposal),
	}
}

/// Sets a policy for the lifetime of the guard, restoring the previous one on drop.
#[derive(Debug)]
#[must_use = "the previous policy is restored when the guard is dropped"]
pub struct DisposalPolicyGuard {
	previous: DisposalPolicy,
}

impl DisposalPolicyGuard {
	/// Applies `policy` until the guard is dropped.
	pub fn new(policy: DisposalPolicy) -> Self {
		Self {
			previous: set_disposal_policy(policy),
		}
	}
}

impl Drop for DisposalPolicyGuard {
	fn drop(&mut self) {
		set_disposal_policy(self.previous);
	}
}
