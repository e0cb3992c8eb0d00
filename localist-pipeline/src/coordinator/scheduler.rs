//! Interval scheduler
//!
//! Jobs run every minute, hour or day. Each schedule owns a cancellation
//! token (a child of the scheduler's root token), so one schedule can be
//! cancelled alone and `shutdown` stops them all. A cancelled schedule
//! never fires again.

use crate::error::{PipelineError, PipelineResult};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Coarse repeat interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleSpec {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl ScheduleSpec {
    /// Parse `"<n>m"`, `"<n>h"`, `"<n>d"`, `hourly` or `daily`
    pub fn parse(input: &str) -> PipelineResult<Self> {
        let value = input.trim().to_ascii_lowercase();
        match value.as_str() {
            "hourly" => return Ok(ScheduleSpec::Hours(1)),
            "daily" => return Ok(ScheduleSpec::Days(1)),
            _ => {}
        }

        let invalid = || PipelineError::Config(format!("invalid schedule '{}'", input));

        let split = value.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        let (digits, unit) = value.split_at(split);
        let count: u32 = digits.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(PipelineError::Config(format!("schedule '{}' must be positive", input)));
        }

        match unit.trim() {
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(ScheduleSpec::Minutes(count)),
            "h" | "hour" | "hours" => Ok(ScheduleSpec::Hours(count)),
            "d" | "day" | "days" => Ok(ScheduleSpec::Days(count)),
            _ => Err(invalid()),
        }
    }

    pub fn period(&self) -> Duration {
        match *self {
            ScheduleSpec::Minutes(n) => Duration::from_secs(u64::from(n) * 60),
            ScheduleSpec::Hours(n) => Duration::from_secs(u64::from(n) * 3_600),
            ScheduleSpec::Days(n) => Duration::from_secs(u64::from(n) * 86_400),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Minutes(n) => write!(f, "{}m", n),
            ScheduleSpec::Hours(n) => write!(f, "{}h", n),
            ScheduleSpec::Days(n) => write!(f, "{}d", n),
        }
    }
}

impl FromStr for ScheduleSpec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleSpec::parse(s)
    }
}

/// Cancel handle for one armed schedule
#[derive(Debug)]
pub struct ScheduleHandle {
    label: String,
    spec: ScheduleSpec,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn spec(&self) -> ScheduleSpec {
        self.spec
    }

    /// Stop the schedule; no further ticks fire
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for a job that is already running to return
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(schedule = %self.label, error = %e, "Schedule task ended abnormally");
        }
    }

    /// True once the schedule task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns interval jobs on the current tokio runtime
#[derive(Debug, Default)]
pub struct Scheduler {
    root: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `spec` period, first after one full period
    ///
    /// A tick that comes due while the previous job is still running is
    /// skipped.
    pub fn schedule<F, Fut>(&self, label: impl Into<String>, spec: ScheduleSpec, job: F) -> ScheduleHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        let token = self.root.child_token();
        let period = spec.period();

        let task = {
            let token = token.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            debug!(schedule = %label, "Schedule fired");
                            job().await;
                        }
                    }
                }
                debug!(schedule = %label, "Schedule stopped");
            })
        };

        ScheduleHandle {
            label,
            spec,
            token,
            task,
        }
    }

    /// Cancel every schedule created by this scheduler
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_schedule_strings() {
        assert_eq!(ScheduleSpec::parse("15m").unwrap(), ScheduleSpec::Minutes(15));
        assert_eq!(ScheduleSpec::parse("1h").unwrap(), ScheduleSpec::Hours(1));
        assert_eq!(ScheduleSpec::parse(" 2 days ").unwrap(), ScheduleSpec::Days(2));
        assert_eq!(ScheduleSpec::parse("hourly").unwrap(), ScheduleSpec::Hours(1));
        assert_eq!(ScheduleSpec::parse("DAILY").unwrap(), ScheduleSpec::Days(1));
        assert!(ScheduleSpec::parse("0m").is_err());
        assert!(ScheduleSpec::parse("15").is_err());
        assert!(ScheduleSpec::parse("m").is_err());
        assert!(ScheduleSpec::parse("5w").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for spec in [ScheduleSpec::Minutes(30), ScheduleSpec::Hours(6), ScheduleSpec::Days(1)] {
            assert_eq!(spec.to_string().parse::<ScheduleSpec>().unwrap(), spec);
        }
        assert_eq!(ScheduleSpec::Hours(2).period(), Duration::from_secs(7_200));
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_each_period() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let _handle = scheduler.schedule("tick", ScheduleSpec::Minutes(1), counting_job(&counter));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_schedule_never_fires() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule("tick", ScheduleSpec::Minutes(1), counting_job(&counter));

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_children() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = scheduler.schedule("a", ScheduleSpec::Minutes(1), counting_job(&counter));
        let b = scheduler.schedule("b", ScheduleSpec::Hours(1), counting_job(&counter));

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(7_200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(scheduler.is_shut_down());
    }
}
