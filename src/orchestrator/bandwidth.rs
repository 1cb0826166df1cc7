//! Token-bucket bandwidth shaping, per direction, with an adaptive mode and
//! a time-restricted mode (spec.md §4.7 "Bandwidth").

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Upload,
	Download,
}

const ADAPTIVE_WINDOW: Duration = Duration::from_secs(10);
const ADAPTIVE_HIGH_UTILIZATION: f64 = 0.8;
const ADAPTIVE_LOW_UTILIZATION: f64 = 0.3;
const ADAPTIVE_SHRINK_FACTOR: f64 = 0.8;
const ADAPTIVE_GROW_FACTOR: f64 = 1.1;

struct Bucket {
	/// Current ceiling, bytes/s. Adaptive mode moves this within
	/// `[floor, original]`; `None` disables throttling entirely.
	limit_bytes_per_s: Option<f64>,
	original_limit_bytes_per_s: Option<f64>,
	burst_allowance: f64,
	tokens: f64,
	last_refill: Instant,
	window_start: Instant,
	window_bytes: u64,
}

impl Bucket {
	fn new(limit_bytes_per_s: Option<u64>, burst_allowance: u64) -> Self {
		let limit = limit_bytes_per_s.map(|v| v as f64);
		let now = Instant::now();
		Bucket {
			limit_bytes_per_s: limit,
			original_limit_bytes_per_s: limit,
			burst_allowance: burst_allowance as f64,
			tokens: burst_allowance as f64,
			last_refill: now,
			window_start: now,
			window_bytes: 0,
		}
	}

	fn refill(&mut self) {
		let Some(limit) = self.limit_bytes_per_s else { return };
		let now = Instant::now();
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + limit * elapsed).min(limit + self.burst_allowance);
		self.last_refill = now;
	}

	/// Adaptive rolling-window adjustment (spec.md §4.7): `>80%` utilization
	/// over 10s shrinks the limit 20%; `<30%` grows it 10%, capped at the
	/// original configured limit.
	fn maybe_adapt(&mut self) {
		let Some(original) = self.original_limit_bytes_per_s else { return };
		let now = Instant::now();
		if now.duration_since(self.window_start) < ADAPTIVE_WINDOW {
			return;
		}
		let elapsed = now.duration_since(self.window_start).as_secs_f64().max(0.001);
		let observed_rate = self.window_bytes as f64 / elapsed;
		let current = self.limit_bytes_per_s.unwrap_or(original);
		let utilization = observed_rate / current.max(1.0);

		let new_limit = if utilization > ADAPTIVE_HIGH_UTILIZATION {
			current * ADAPTIVE_SHRINK_FACTOR
		} else if utilization < ADAPTIVE_LOW_UTILIZATION {
			(current * ADAPTIVE_GROW_FACTOR).min(original)
		} else {
			current
		};
		self.limit_bytes_per_s = Some(new_limit);
		self.window_start = now;
		self.window_bytes = 0;
	}
}

/// Owns one token bucket per direction. `throttle` blocks (async sleep)
/// until enough tokens are available, then debits them.
pub struct BandwidthLimiter {
	upload: Mutex<Bucket>,
	download: Mutex<Bucket>,
	adaptive: bool,
	allowed_hours: Vec<u8>,
}

impl BandwidthLimiter {
	pub fn new(
		max_upload_bytes_per_s: Option<u64>,
		max_download_bytes_per_s: Option<u64>,
		burst_allowance: u64,
		adaptive: bool,
		allowed_hours: Vec<u8>,
	) -> Self {
		BandwidthLimiter {
			upload: Mutex::new(Bucket::new(max_upload_bytes_per_s, burst_allowance)),
			download: Mutex::new(Bucket::new(max_download_bytes_per_s, burst_allowance)),
			adaptive,
			allowed_hours,
		}
	}

	/// Whether throttling is active right now: always, unless
	/// `allowed_hours` is non-empty and the current local hour isn't in it
	/// (spec.md §4.7 "time-restricted mode").
	fn enforced_now(&self) -> bool {
		if self.allowed_hours.is_empty() {
			return true;
		}
		let hour = current_local_hour();
		self.allowed_hours.contains(&hour)
	}

	pub async fn throttle(&self, bytes: u64, dir: Direction) {
		if !self.enforced_now() {
			return;
		}
		let bucket_lock = match dir {
			Direction::Upload => &self.upload,
			Direction::Download => &self.download,
		};

		loop {
			let mut bucket = bucket_lock.lock().await;
			bucket.refill();
			if self.adaptive {
				bucket.maybe_adapt();
			}
			if bucket.limit_bytes_per_s.is_none() || bucket.tokens >= bytes as f64 {
				if bucket.limit_bytes_per_s.is_some() {
					bucket.tokens -= bytes as f64;
				}
				bucket.window_bytes += bytes;
				return;
			}
			let limit = bucket.limit_bytes_per_s.unwrap_or(1.0).max(1.0);
			let deficit = bytes as f64 - bucket.tokens;
			let wait = Duration::from_secs_f64((deficit / limit).max(0.001));
			drop(bucket);
			tokio::time::sleep(wait).await;
		}
	}
}

fn current_local_hour() -> u8 {
	let secs = std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0);
	((secs / 3600) % 24) as u8
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn unthrottled_when_limit_none() {
		let limiter = BandwidthLimiter::new(None, None, 0, false, Vec::new());
		limiter.throttle(10_000_000, Direction::Upload).await;
	}

	#[tokio::test]
	async fn burst_allowance_admits_immediately() {
		let limiter = BandwidthLimiter::new(Some(100), None, 1000, false, Vec::new());
		limiter.throttle(500, Direction::Upload).await;
	}

	#[tokio::test]
	async fn disabled_outside_allowed_hours_never_blocks() {
		let limiter = BandwidthLimiter::new(Some(1), None, 0, false, vec![250]);
		limiter.throttle(1_000_000, Direction::Upload).await;
	}
}
