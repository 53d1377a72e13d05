use std::sync::Arc;

use parking_lot::Mutex;

/// AsyncLog is a shared cell for telemetry that is filled in asynchronously.
///
/// A request handler stores an initial value, hands clones to stream-processing closures
/// that mutate it as chunks arrive, and the final record emission takes it at the end.
#[derive(Debug)]
pub struct AsyncLog<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for AsyncLog<T> {
	fn clone(&self) -> Self {
		AsyncLog(self.0.clone())
	}
}

impl<T> Default for AsyncLog<T> {
	fn default() -> Self {
		AsyncLog(Arc::new(Mutex::new(None)))
	}
}

impl<T> AsyncLog<T> {
	pub fn store(&self, t: Option<T>) {
		*self.0.lock() = t;
	}

	/// Mutate the stored value in place. This is not atomic with respect to other
	/// non_atomic_mutate calls on clones; callers must be the only writer at that point
	/// in the stream, which holds for per-request logs.
	pub fn non_atomic_mutate(&self, f: impl FnOnce(&mut T)) {
		let mut guard = self.0.lock();
		if let Some(t) = guard.as_mut() {
			f(t);
		}
	}

	pub fn take(&self) -> Option<T> {
		self.0.lock().take()
	}

	pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
		let guard = self.0.lock();
		f(guard.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mutate_and_take() {
		let log: AsyncLog<u64> = AsyncLog::default();
		// Mutating an empty log is a no-op
		log.non_atomic_mutate(|v| *v += 1);
		assert!(log.with(|v| v.is_none()));

		log.store(Some(1));
		let clone = log.clone();
		clone.non_atomic_mutate(|v| *v += 10);
		assert_eq!(log.take(), Some(11));
		assert_eq!(log.take(), None);
	}
}
