use std::sync::Mutex;
use std::thread::ThreadId;

/// Single-owner-thread safety contract for a client instance. When enabled,
/// the first caller's thread id is recorded; any later call from a
/// different thread is logged, not rejected — the original's `raise` here
/// is commented out, so this stays warn-only until product owners say
/// otherwise. Disabled by default, in which case every check is a no-op.
#[derive(Default)]
pub struct ThreadAffinityGuard {
	enabled: bool,
	owner: Mutex<Option<ThreadId>>,
}

impl ThreadAffinityGuard {
	pub fn new(enabled: bool) -> Self {
		Self {
			enabled,
			owner: Mutex::new(None),
		}
	}

	/// Records or checks the calling thread. Never fails the call.
	pub fn check(&self, client_description: &str) {
		if !self.enabled {
			return;
		}
		let current = std::thread::current().id();
		let mut owner = self.owner.lock().unwrap();
		match *owner {
			None => *owner = Some(current),
			Some(allowed) if allowed != current => {
				tracing::error!(
					client = client_description,
					?allowed,
					?current,
					"DISET client thread safety error: client was first used on a different thread"
				);
			},
			_ => {},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disabled_guard_never_records_owner() {
		let guard = ThreadAffinityGuard::new(false);
		guard.check("test");
		assert!(guard.owner.lock().unwrap().is_none());
	}

	#[test]
	fn enabled_guard_records_first_caller() {
		let guard = ThreadAffinityGuard::new(true);
		guard.check("test");
		assert!(guard.owner.lock().unwrap().is_some());
	}
}
