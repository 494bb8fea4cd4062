//! Bandwidth throttling
//!
//! Token-bucket limiting for chunk transfers. A [`Limiter`] hands out
//! byte budgets; callers acquire before moving data so sustained
//! throughput converges on the configured rate while short bursts pass
//! unhindered. A [`BandwidthManager`] pairs an upload and a download
//! limiter and tracks totals for status reporting.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Unlimited rate
pub const UNLIMITED: u64 = 0;

#[derive(Debug)]
struct Bucket {
    bytes_per_second: u64,
    tokens: f64,
    max_tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
#[derive(Debug)]
pub struct Limiter {
    bucket: Mutex<Bucket>,
}

impl Limiter {
    /// Create a limiter; `burst` of zero defaults to one second of budget
    pub fn new(bytes_per_second: u64, burst: u64) -> Self {
        let max_tokens = if burst == 0 { bytes_per_second } else { burst } as f64;
        Self {
            bucket: Mutex::new(Bucket {
                bytes_per_second,
                tokens: max_tokens,
                max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Change the rate; takes effect on the next acquire
    pub fn set_rate(&self, bytes_per_second: u64) {
        let mut bucket = self.bucket.lock().expect("bucket lock poisoned");
        bucket.bytes_per_second = bytes_per_second;
        let max = bytes_per_second as f64;
        if bucket.max_tokens < max || bytes_per_second == UNLIMITED {
            bucket.max_tokens = max;
        }
    }

    /// The configured rate
    pub fn rate(&self) -> u64 {
        self.bucket.lock().expect("bucket lock poisoned").bytes_per_second
    }

    /// Sleep until `n` bytes of budget are available, then consume them
    pub async fn acquire(&self, n: u64) {
        let wait = {
            let mut bucket = self.bucket.lock().expect("bucket lock poisoned");
            if bucket.bytes_per_second == UNLIMITED {
                return;
            }

            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill);
            bucket.last_refill = now;
            let refill = elapsed.as_secs_f64() * bucket.bytes_per_second as f64;
            bucket.tokens = (bucket.tokens + refill).min(bucket.max_tokens);

            if bucket.tokens >= n as f64 {
                bucket.tokens -= n as f64;
                return;
            }

            let needed = n as f64 - bucket.tokens;
            bucket.tokens = 0.0;
            Duration::from_secs_f64(needed / bucket.bytes_per_second as f64)
        };

        trace!("throttle: waiting {:?} for {} bytes", wait, n);
        tokio::time::sleep(wait).await;
    }
}

/// Totals kept by the bandwidth manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthTotals {
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

/// Paired upload/download limiters with transfer accounting
#[derive(Debug)]
pub struct BandwidthManager {
    upload: Limiter,
    download: Limiter,
    totals: Mutex<BandwidthTotals>,
}

impl BandwidthManager {
    /// Limits in bytes per second; zero means unlimited
    pub fn new(upload_limit: u64, download_limit: u64) -> Self {
        Self {
            upload: Limiter::new(upload_limit, upload_limit.saturating_mul(2)),
            download: Limiter::new(download_limit, download_limit.saturating_mul(2)),
            totals: Mutex::new(BandwidthTotals::default()),
        }
    }

    /// Current limits as (upload, download)
    pub fn limits(&self) -> (u64, u64) {
        (self.upload.rate(), self.download.rate())
    }

    pub fn set_upload_limit(&self, bytes_per_second: u64) {
        self.upload.set_rate(bytes_per_second);
    }

    pub fn set_download_limit(&self, bytes_per_second: u64) {
        self.download.set_rate(bytes_per_second);
    }

    /// Budget an outgoing transfer of `n` bytes
    pub async fn acquire_upload(&self, n: u64) {
        self.upload.acquire(n).await;
        let mut totals = self.totals.lock().expect("totals lock poisoned");
        totals.bytes_uploaded += n;
    }

    /// Budget an incoming transfer of `n` bytes
    pub async fn acquire_download(&self, n: u64) {
        self.download.acquire(n).await;
        let mut totals = self.totals.lock().expect("totals lock poisoned");
        totals.bytes_downloaded += n;
    }

    /// Lifetime totals
    pub fn totals(&self) -> BandwidthTotals {
        *self.totals.lock().expect("totals lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = Limiter::new(UNLIMITED, 0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(1_000_000).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_burst_passes_then_throttles() {
        let limiter = Limiter::new(10_000, 10_000);

        // The initial bucket covers the burst
        let start = Instant::now();
        limiter.acquire(10_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));

        // The next full-bucket acquire must wait about a second
        let start = Instant::now();
        limiter.acquire(10_000).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(800), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_set_rate_applies() {
        let limiter = Limiter::new(1, 1);
        limiter.set_rate(UNLIMITED);
        assert_eq!(limiter.rate(), UNLIMITED);

        let start = Instant::now();
        limiter.acquire(1_000_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_manager_tracks_totals() {
        let manager = BandwidthManager::new(UNLIMITED, UNLIMITED);
        manager.acquire_upload(300).await;
        manager.acquire_upload(200).await;
        manager.acquire_download(50).await;

        let totals = manager.totals();
        assert_eq!(totals.bytes_uploaded, 500);
        assert_eq!(totals.bytes_downloaded, 50);
    }

    #[test]
    fn test_manager_limits() {
        let manager = BandwidthManager::new(1000, 2000);
        assert_eq!(manager.limits(), (1000, 2000));
        manager.set_upload_limit(500);
        manager.set_download_limit(UNLIMITED);
        assert_eq!(manager.limits(), (500, UNLIMITED));
    }
}
