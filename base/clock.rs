// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2018 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clock interface and implementations, for testability.
//!
//! Production code runs against [`RealClocks`]; tests run against
//! [`SimulatedClocks`], which never actually sleeps, so a test that exercises
//! hours of idle/age-based flush thresholds still runs instantly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::warn;

/// A point in monotonic time, measured in whole seconds since some
/// unspecified, per-[`Clocks`]-instance epoch.
///
/// Only deltas between two `Instant`s from the same clock are meaningful.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Instant(pub i64);

impl Instant {
    pub fn from_secs(secs: i64) -> Self {
        Instant(secs)
    }

    pub fn saturating_sub(&self, other: &Instant) -> Duration {
        Duration(self.0.saturating_sub(other.0).max(0))
    }
}

impl std::ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs.0)
    }
}

impl std::ops::Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0 - rhs.0)
    }
}

impl std::ops::Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

/// A duration of whole seconds, the unit the flush thresholds in the
/// configuration (`MaxChunkIdle`, `MaxChunkAge`, `RetainPeriod`, ...) are
/// expressed in.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Duration(pub i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub fn from_secs(secs: u64) -> Self {
        Duration(secs as i64)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    pub fn saturating_sub(self, other: Duration) -> Duration {
        Duration((self.0 - other.0).max(0))
    }
}

impl From<Duration> for StdDuration {
    fn from(d: Duration) -> StdDuration {
        StdDuration::from_secs(d.0.max(0) as u64)
    }
}

/// Wall-clock time, expressed as Unix seconds. Used only for
/// human-displayed/metric timestamps; scheduling decisions use [`Instant`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SystemTime(pub i64);

impl SystemTime {
    pub fn new(secs: i64, _nanos: i32) -> Self {
        SystemTime(secs)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::Add<Duration> for SystemTime {
    type Output = SystemTime;
    fn add(self, rhs: Duration) -> SystemTime {
        SystemTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub<SystemTime> for SystemTime {
    type Output = Duration;
    fn sub(self, rhs: SystemTime) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl std::fmt::Display for SystemTime {
    /// Formats as RFC 3339, for log lines and the chunk-age metric labels.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match jiff::Timestamp::from_second(self.0) {
            Ok(ts) => write!(f, "{ts}"),
            Err(_) => write!(f, "{}s", self.0),
        }
    }
}

/// Abstract interface to the system clocks, for testability.
pub trait Clocks: Send + Sync + 'static {
    /// Returns the current wall-clock time.
    fn realtime(&self) -> SystemTime;

    /// Returns the current monotonic time. Used for all scheduling decisions
    /// so that clock adjustments (NTP, DST) never affect flush timing.
    fn monotonic(&self) -> Instant;

    /// Returns a future that resolves after `how_long` of (simulated or
    /// real) time has passed.
    fn sleep(&self, how_long: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Sleeps (via `clocks`), unless `shutdown_rx` fires first, in which case
/// this returns `Err`. Used by retry loops so a shutdown request interrupts
/// a pending backoff instead of waiting it out.
pub async fn retry_wait<C: Clocks>(
    clocks: &C,
    shutdown_rx: &crate::shutdown::Receiver,
    err: impl std::fmt::Display,
) -> Result<(), crate::shutdown::ShutdownError> {
    shutdown_rx.check()?;
    warn!(%err, "retrying after 1s");
    tokio::select! {
        _ = clocks.sleep(Duration::from_secs(1)) => Ok(()),
        _ = shutdown_rx.clone().into_future() => Err(crate::shutdown::ShutdownError),
    }
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks {}

impl Clocks for RealClocks {
    fn realtime(&self) -> SystemTime {
        SystemTime(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
        )
    }

    fn monotonic(&self) -> Instant {
        Instant(real_monotonic_secs())
    }

    fn sleep(&self, how_long: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(how_long.into()))
    }
}

// `std::time::Instant` has no epoch we can subtract against portably, so
// cache a process-start reference point and report seconds since then.
fn real_monotonic_secs() -> i64 {
    use std::sync::OnceLock;
    static START: OnceLock<std::time::Instant> = OnceLock::new();
    let start = *START.get_or_init(std::time::Instant::now);
    start.elapsed().as_secs() as i64
}

/// Logs a warning if the guard lives "too long": a crude way to notice a
/// lock acquisition or critical section that's stuck.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: Instant,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic().saturating_sub(&self.start);
        if elapsed.as_secs() >= 1 {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for deterministic tests: `sleep` advances the clock
/// immediately rather than waiting on the real wall clock.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    boot: SystemTime,
    uptime: AtomicI64,
    notify: tokio::sync::Notify,
}

impl SimulatedClocks {
    pub fn new(boot: SystemTime) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: AtomicI64::new(0),
            notify: tokio::sync::Notify::new(),
        }))
    }

    /// Advances the clock by the specified amount, waking any pending sleeps
    /// whose deadline has now passed.
    pub fn advance(&self, by: Duration) {
        self.0.uptime.fetch_add(by.0, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }
}

impl Clocks for SimulatedClocks {
    fn realtime(&self) -> SystemTime {
        SystemTime(self.0.boot.0 + self.0.uptime.load(Ordering::SeqCst))
    }

    fn monotonic(&self) -> Instant {
        Instant(self.0.uptime.load(Ordering::SeqCst))
    }

    fn sleep(&self, how_long: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let inner = self.0.clone();
        let deadline = inner.uptime.load(Ordering::SeqCst) + how_long.0;
        Box::pin(async move {
            loop {
                if inner.uptime.load(Ordering::SeqCst) >= deadline {
                    return;
                }
                let notified = inner.notify.notified();
                if inner.uptime.load(Ordering::SeqCst) >= deadline {
                    return;
                }
                notified.await;
            }
        })
    }
}
