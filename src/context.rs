// src/context.rs
use log::warn;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::scheduler::PingLimiter;

/// Time source for everything that schedules or timestamps.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary, fixed epoch.
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}

#[derive(Default)]
pub struct SystemClock {
    last_us: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let prev = self.last_us.fetch_max(now, Ordering::Relaxed);
        if now < prev {
            warn!("time wraparound occurred ({} us backwards)", prev - now);
            return prev;
        }
        now
    }
}

/// Clock driven by hand, for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_ms * 1000),
        }
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_us.store(ms * 1000, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * 1000, Ordering::SeqCst);
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Probe intervals shared by every host, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct PingIntervals {
    pub info_ms: u64,
    pub ext_player_ms: u64,
    pub ext_uptime_ms: u64,
}

impl From<&Config> for PingIntervals {
    fn from(config: &Config) -> Self {
        Self {
            info_ms: config.server_ping_interval_ms,
            ext_player_ms: config.ext_player_ping_interval_ms,
            ext_uptime_ms: config.ext_uptime_ping_interval_ms,
        }
    }
}

/// Process-wide state handed to every host on every tick.
pub struct Context {
    clock: Arc<dyn Clock>,
    limiter: Mutex<PingLimiter>,
    player_session_id: AtomicU64,
    pub intervals: PingIntervals,
}

impl Context {
    pub fn new(clock: Arc<dyn Clock>, max_pings_per_second: u32, intervals: PingIntervals) -> Self {
        Self {
            clock,
            limiter: Mutex::new(PingLimiter::new(max_pings_per_second)),
            player_session_id: AtomicU64::new(rand::thread_rng().gen::<u32>() as u64),
            intervals,
        }
    }

    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, config.max_pings_per_second, PingIntervals::from(config))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    pub fn limiter(&self) -> parking_lot::MutexGuard<'_, PingLimiter> {
        self.limiter.lock()
    }

    /// Hands out the next locally unique player session id.
    pub fn next_player_session_id(&self) -> u64 {
        self.player_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_us(1_500);
        assert_eq!(clock.now_us(), 1_001_500);
        assert_eq!(clock.now_ms(), 1_001);
        clock.set_ms(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn test_system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }

    #[test]
    fn test_session_ids_increase() {
        let intervals = PingIntervals {
            info_ms: 5_000,
            ext_player_ms: 5_000,
            ext_uptime_ms: 120_000,
        };
        let ctx = Context::new(Arc::new(ManualClock::new(0)), 80, intervals);
        let a = ctx.next_player_session_id();
        let b = ctx.next_player_session_id();
        assert_eq!(b, a + 1);
    }
}
