/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use flume::{Sender, TrySendError};
use slog::{Drain, OwnedKVList, Record};

use super::{LogStats, StdLogFormatter, StdLogValue};

#[derive(Clone, Debug)]
pub struct AsyncLogConfig {
    pub channel_capacity: usize,
    pub thread_name: String,
}

impl AsyncLogConfig {
    pub fn with_name(thread_name: &str) -> Self {
        AsyncLogConfig {
            channel_capacity: 1024,
            thread_name: thread_name.to_string(),
        }
    }
}

impl Default for AsyncLogConfig {
    fn default() -> Self {
        AsyncLogConfig::with_name("log-async")
    }
}

/// A slog drain that formats in place and hands the value to a background io thread.
///
/// Records are dropped instead of blocking the caller when the channel is full.
pub struct AsyncLogger {
    sender: Sender<StdLogValue>,
    formatter: StdLogFormatter,
    stats: Arc<LogStats>,
}

impl AsyncLogger {
    pub(crate) fn new(
        sender: Sender<StdLogValue>,
        formatter: StdLogFormatter,
        stats: Arc<LogStats>,
    ) -> Self {
        AsyncLogger {
            sender,
            formatter,
            stats,
        }
    }

    pub fn get_stats(&self) -> Arc<LogStats> {
        Arc::clone(&self.stats)
    }
}

impl Drain for AsyncLogger {
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        self.stats.add_total();

        match self.formatter.format_slog(record, logger_values) {
            Ok(v) => {
                match self.sender.try_send(v) {
                    Ok(_) => {}
                    Err(TrySendError::Full(_)) => self.stats.add_channel_overflow(),
                    Err(TrySendError::Disconnected(_)) => self.stats.add_channel_closed(),
                }
                Ok(())
            }
            Err(e) => {
                self.stats.add_format_failed();
                Err(e)
            }
        }
    }
}
