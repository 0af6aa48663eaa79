#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::ZERO)
		.as_millis() as i64
}

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync + 'static {
	fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		unix_ms_now()
	}
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
	pub fn new(start_ms: i64) -> Self {
		Self(AtomicI64::new(start_ms))
	}

	pub fn set(&self, ms: i64) {
		self.0.store(ms, Ordering::SeqCst);
	}

	pub fn advance(&self, by_ms: i64) -> i64 {
		self.0.fetch_add(by_ms, Ordering::SeqCst) + by_ms
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> i64 {
		self.0.load(Ordering::SeqCst)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn manual_clock_moves_only_on_request() {
		let c = ManualClock::new(100);
		assert_eq!(c.now_ms(), 100);
		assert_eq!(c.advance(50), 150);
		c.set(10);
		assert_eq!(c.now_ms(), 10);
	}

	#[test]
	fn system_clock_is_past_2020() {
		assert!(SystemClock.now_ms() > 1_577_836_800_000);
	}
}
