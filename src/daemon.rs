use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use tracing::{error, info};

use crate::backup::{BackupRunner, Outcome};
use crate::schedule::{select_due, ClientRegistry};

pub const TICK_INTERVAL: Duration = Duration::from_secs(60);
const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub client: String,
    pub outcome: Outcome,
}

/// Owns the client registry and drives one client at a time.
pub struct Daemon<'a> {
    registry: ClientRegistry,
    runner: BackupRunner<'a>,
    delay: Duration,
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl<'a> Daemon<'a> {
    pub fn new(registry: ClientRegistry, runner: BackupRunner<'a>) -> Self {
        let delay = runner.global().delay;
        Self {
            registry,
            runner,
            delay,
            tick_interval: TICK_INTERVAL,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set to stop after the current client; a running workflow is never
    /// interrupted.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// One evaluation: select the due clients and back each up in order,
    /// pausing `delay` between clients.
    pub fn tick(&mut self, now: NaiveDateTime, explicit: Option<&[String]>) -> Vec<ClientReport> {
        let due = select_due(&mut self.registry, now, explicit);
        let mut reports = Vec::new();
        for (i, name) in due.iter().enumerate() {
            if i > 0 {
                self.sleep(self.delay);
            }
            if self.stopping() {
                info!("stop requested; {} client(s) left for later", due.len() - i);
                break;
            }
            let Some(state) = self.registry.get(name) else {
                continue;
            };
            let outcome = self
                .runner
                .run_client(&state.spec, Local::now().naive_local());
            match &outcome {
                Outcome::Failed { reason } => error!("backup of {} failed: {}", name, reason),
                other => info!("backup of {} {}", name, other),
            }
            reports.push(ClientReport {
                client: name.clone(),
                outcome,
            });
        }
        reports
    }

    /// Manual run of the named clients, ignoring their schedule windows.
    pub fn run_once(&mut self, names: &[String]) -> Vec<ClientReport> {
        self.tick(Local::now().naive_local(), Some(names))
    }

    pub fn run_forever(&mut self) {
        info!(
            "starting scheduler for {} client(s); checking every {}s",
            self.registry.len(),
            self.tick_interval.as_secs()
        );
        while !self.stopping() {
            let tick_start = Instant::now();
            self.tick(Local::now().naive_local(), None);
            self.sleep(until_next_tick(self.tick_interval, tick_start.elapsed()));
        }
        info!("scheduler stopped");
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Ticks start on a fixed cadence; a tick that overran starts the next at once.
fn until_next_tick(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
