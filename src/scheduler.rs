//! Thin scheduler: periodic sweeps plus daily digest runs.
//!
//! Digest generation is gated on the sweep it summarizes: both run on the
//! same driver loop, so a digest tick always observes a completed sweep.

use crate::digest::DigestEngine;
use crate::sweep::SweepRunner;
use crate::types::Result;
use chrono::{Local, NaiveDate, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct Scheduler {
    sweeper: Arc<SweepRunner>,
    digest: Option<Arc<DigestEngine>>,
    sweep_interval: Duration,
    digest_times: Vec<NaiveTime>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        sweeper: Arc<SweepRunner>,
        digest: Option<Arc<DigestEngine>>,
        sweep_interval: Duration,
        digest_times: Vec<NaiveTime>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sweeper,
            digest,
            sweep_interval,
            digest_times,
            shutdown,
        }
    }

    /// Run sweeps on the configured interval and digest runs at their daily
    /// times until shutdown is requested. The first sweep starts
    /// immediately.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            digest_times = self.digest_times.len(),
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_digest: Option<(NaiveDate, NaiveTime)> = None;

        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                info!("scheduler shutting down");
                return Ok(());
            }

            match self.sweeper.run().await {
                Ok(report) if report.items_failed() > 0 => {
                    error!(
                        failed = report.items_failed(),
                        processed = report.items_processed,
                        "sweep completed with failures"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "sweep failed"),
            }

            if self.shutdown.load(Ordering::Relaxed) {
                info!("scheduler shutting down");
                return Ok(());
            }

            // The sweep above has completed, so a due digest summarizes
            // fully written markers.
            if let Some(due) = self.due_digest(last_digest) {
                last_digest = Some(due);
                self.run_digest(due.0).await;
            }
        }
    }

    /// The most recent digest time that has passed today and has not run
    /// yet, if any.
    fn due_digest(&self, last: Option<(NaiveDate, NaiveTime)>) -> Option<(NaiveDate, NaiveTime)> {
        if self.digest.is_none() {
            return None;
        }
        let now = Local::now();
        let today = now.date_naive();
        let time_now = now.time();

        self.digest_times
            .iter()
            .copied()
            .filter(|t| *t <= time_now)
            .filter(|t| last != Some((today, *t)) && last.map_or(true, |(d, lt)| d < today || lt < *t))
            .max()
            .map(|t| (today, t))
    }

    async fn run_digest(&self, date: NaiveDate) {
        let Some(engine) = &self.digest else { return };
        match engine.generate_digest(date).await {
            Ok(Some(digest)) => {
                info!(entry_id = digest.entry_id, clusters = digest.clusters.len(), "digest run complete")
            }
            Ok(None) => info!("digest run produced no briefing"),
            // The failed run is dropped; the next scheduled tick retries.
            Err(e) => error!(error = %e, "digest run failed"),
        }
    }
}
