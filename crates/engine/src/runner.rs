use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use forgebi_core::AnalyticsResult;

/// One unit of periodic work (metric refresh, insight scan, ...).
///
/// `tick` is also the entry point tests use to drive the work
/// deterministically without a thread.
pub trait DriverTask: Send + 'static {
    fn name(&self) -> &'static str;

    fn tick(&mut self) -> AnalyticsResult<()>;
}

/// Cadence and retry policy for a driver thread.
#[derive(Debug, Clone)]
pub struct PeriodicDriver {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Run one tick immediately after start.
    pub run_on_start: bool,
}

impl PeriodicDriver {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
            run_on_start: true,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    pub fn without_initial_run(mut self) -> Self {
        self.run_on_start = false;
        self
    }

    /// Spawn `task` on its own named thread.
    ///
    /// - Schedule: ticks every `interval` on a stable cadence
    /// - Trigger: [`DriverHandle::trigger`] requests an extra tick; triggers
    ///   that arrive while one is pending are coalesced
    /// - Failures: logged and retried with bounded exponential backoff; they
    ///   never stop the loop
    pub fn spawn<T: DriverTask>(&self, task: T) -> std::io::Result<DriverHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);
        let name = task.name();

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(format!("forgebi-{name}"))
            .spawn(move || driver_loop(cfg, task, shutdown_rx, trigger_rx))?;

        Ok(DriverHandle {
            name,
            shutdown: shutdown_tx,
            trigger: Trigger(trigger_tx),
            join: Some(join),
        })
    }
}

/// Cloneable, coalescing "run soon" signal for a driver.
#[derive(Debug, Clone)]
pub struct Trigger(mpsc::SyncSender<()>);

impl Trigger {
    pub fn fire(&self) {
        // Capacity 1: a full channel already means "pending".
        let _ = self.0.try_send(());
    }
}

#[derive(Debug)]
pub struct DriverHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    trigger: Trigger,
    join: Option<thread::JoinHandle<()>>,
}

impl DriverHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn trigger(&self) {
        self.trigger.fire();
    }

    pub fn trigger_handle(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Stop the driver and wait for an in-progress tick to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(driver = self.name, "driver thread panicked");
            }
        }
    }
}

/// Granularity of the wait between ticks; bounds shutdown latency.
const POLL: Duration = Duration::from_millis(25);

fn driver_loop<T: DriverTask>(
    cfg: PeriodicDriver,
    mut task: T,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
) {
    let name = task.name();
    info!(driver = name, interval_ms = cfg.interval.as_millis() as u64, "driver started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = cfg.run_on_start;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        // Shutdown has priority; a dropped handle also stops the loop.
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(POLL);
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick.saturating_duration_since(Instant::now()).min(POLL);
            thread::sleep(sleep_for);
            continue;
        }
        pending = false;

        let outcome = match catch_unwind(AssertUnwindSafe(|| task.tick())) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };

        match outcome {
            Ok(()) => failures = 0,
            Err(error) => {
                failures += 1;
                warn!(driver = name, error = %error, attempt = failures, "driver tick failed");
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(driver = name, "driver stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tick panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tick panicked: {s}")
    } else {
        "tick panicked".to_string()
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use forgebi_core::{AnalyticsError, FetchError};
    use proptest::prelude::*;

    struct Counter {
        ticks: Arc<AtomicU32>,
        fail_first: u32,
    }

    impl DriverTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn tick(&mut self) -> AnalyticsResult<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(AnalyticsError::Fetch(FetchError::Unavailable("feed".into())));
            }
            Ok(())
        }
    }

    /// Panics on its first tick, succeeds afterwards.
    struct Flaky {
        ticks: Arc<AtomicU32>,
    }

    impl DriverTask for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn tick(&mut self) -> AnalyticsResult<()> {
            if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("feed returned garbage");
            }
            Ok(())
        }
    }

    fn wait_for(ticks: &AtomicU32, at_least: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if ticks.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
        assert_eq!(backoff(base, 30), Duration::from_millis(10_000));
    }

    proptest! {
        #[test]
        fn backoff_never_shrinks_and_stays_capped(base_ms in 1u64..2_000, attempt in 1u32..40) {
            let base = Duration::from_millis(base_ms);
            let this = backoff(base, attempt);
            let next = backoff(base, attempt + 1);
            prop_assert!(this <= next);
            prop_assert!(next <= Duration::from_secs(10));
        }
    }

    #[test]
    fn trigger_runs_a_tick_between_intervals() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = PeriodicDriver::every(Duration::from_secs(3600))
            .without_initial_run()
            .spawn(Counter {
                ticks: ticks.clone(),
                fail_first: 0,
            })
            .unwrap();

        handle.trigger();
        assert!(wait_for(&ticks, 1));
        handle.shutdown();
    }

    #[test]
    fn failing_ticks_are_retried() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = PeriodicDriver::every(Duration::from_secs(3600))
            .with_retries(3, Duration::from_millis(1))
            .spawn(Counter {
                ticks: ticks.clone(),
                fail_first: 2,
            })
            .unwrap();

        // initial run + two retries
        assert!(wait_for(&ticks, 3));
        handle.shutdown();
    }

    #[test]
    fn panicking_tick_is_retried_and_the_loop_survives() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = PeriodicDriver::every(Duration::from_millis(20))
            .with_retries(3, Duration::from_millis(1))
            .spawn(Flaky {
                ticks: ticks.clone(),
            })
            .unwrap();

        // panicked initial run, retry, then at least one scheduled tick
        assert!(wait_for(&ticks, 3));
        handle.trigger();
        assert!(wait_for(&ticks, 4));
        handle.shutdown();
    }

    #[test]
    fn panic_message_keeps_the_payload() {
        assert_eq!(panic_message(&"boom"), "tick panicked: boom");
        assert_eq!(panic_message(&String::from("bad row")), "tick panicked: bad row");
        assert_eq!(panic_message(&7u8), "tick panicked");
    }
}
