/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2024-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// An interval timer that never fires if no period is configured.
#[derive(Default)]
pub struct OptionalInterval {
    inner: Option<Interval>,
}

impl OptionalInterval {
    /// Create a timer whose first tick happens after one full `period`.
    pub fn new(period: Option<Duration>) -> Self {
        let inner = period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        OptionalInterval { inner }
    }

    pub fn period(&self) -> Option<Duration> {
        self.inner.as_ref().map(|interval| interval.period())
    }

    pub async fn tick(&mut self) -> Instant {
        match &mut self.inner {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}
