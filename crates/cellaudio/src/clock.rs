//! Adaptive periodic driver.
//!
//! Runs a [`Ticker`] roughly once per period. A tick that finishes early is
//! followed by a sleep for the rest of the period; a tick that overruns is
//! followed immediately by the next one, which is handed a non-zero skip
//! count so it can relax its throttling.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

/// Nominal period of the streaming loop.
pub const TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Remainders shorter than this are not slept; the next tick starts at once.
pub const MIN_SLEEP: Duration = Duration::from_millis(100);

/// One step of a periodic loop.
#[async_trait]
pub trait Ticker: Send {
    type Error: Send;

    /// Run one tick. `skipped` is non-zero when the previous tick overran the
    /// period, 0 if it finished in time. Return `false` to stop.
    async fn tick(&mut self, skipped: u32) -> Result<bool, Self::Error>;
}

/// Drive `ticker` until it returns `false` or fails.
pub async fn run_clock<T: Ticker>(period: Duration, ticker: &mut T) -> Result<(), T::Error> {
    let mut skipped = 0;

    loop {
        let started = Instant::now();
        if !ticker.tick(skipped).await? {
            return Ok(());
        }
        let elapsed = started.elapsed();

        if elapsed < period {
            skipped = 0;
            let remainder = period - elapsed;
            if remainder >= MIN_SLEEP {
                tokio::time::sleep(remainder).await;
            }
        } else {
            skipped = overrun_periods(elapsed, period);
            trace!("tick overran the period ({:?}), skip count {}", elapsed, skipped);
        }
    }
}

/// Skip count after a tick that took `elapsed`: `ceil(period / elapsed)`.
///
/// Only called for overruns, where `elapsed >= period`, so this is 1.
fn overrun_periods(elapsed: Duration, period: Duration) -> u32 {
    let elapsed = elapsed.as_nanos().max(1);
    let periods = period.as_nanos().div_ceil(elapsed);
    u32::try_from(periods).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Returns `true` a fixed number of times, recording what it was passed.
    struct Countdown {
        remaining: u32,
        work: Vec<Duration>,
        calls: Vec<(u32, Instant)>,
    }

    impl Countdown {
        fn new(remaining: u32) -> Self {
            Self {
                remaining,
                work: Vec::new(),
                calls: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Ticker for Countdown {
        type Error = Infallible;

        async fn tick(&mut self, skipped: u32) -> Result<bool, Infallible> {
            self.calls.push((skipped, Instant::now()));
            if let Some(work) = self.work.get(self.calls.len() - 1) {
                tokio::time::sleep(*work).await;
            }
            if self.remaining == 0 {
                return Ok(false);
            }
            self.remaining -= 1;
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_false() {
        let mut ticker = Countdown::new(5);
        let started = Instant::now();

        run_clock(TICK_PERIOD, &mut ticker).await.unwrap();

        assert_eq!(ticker.calls.len(), 6);
        // Five full sleeps between six instant ticks, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= TICK_PERIOD * 5 && elapsed < TICK_PERIOD * 5 + MIN_SLEEP);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_reports_skipped_periods() {
        let mut ticker = Countdown::new(2);
        ticker.work = vec![Duration::from_millis(2500)];

        run_clock(TICK_PERIOD, &mut ticker).await.unwrap();

        let skipped: Vec<u32> = ticker.calls.iter().map(|(s, _)| *s).collect();
        assert_eq!(skipped, vec![0, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_remainders_are_not_slept() {
        let mut ticker = Countdown::new(1);
        ticker.work = vec![Duration::from_millis(950)];

        run_clock(TICK_PERIOD, &mut ticker).await.unwrap();

        let (_, first) = ticker.calls[0];
        let (_, second) = ticker.calls[1];
        let gap = second - first;
        assert!(gap >= Duration::from_millis(950) && gap < TICK_PERIOD, "gap was {gap:?}");
    }

    #[test]
    fn overrun_divides_period_by_tick_time() {
        assert_eq!(overrun_periods(Duration::from_millis(1000), TICK_PERIOD), 1);
        assert_eq!(overrun_periods(Duration::from_millis(2500), TICK_PERIOD), 1);
        assert_eq!(overrun_periods(Duration::from_secs(10), TICK_PERIOD), 1);
    }
}
