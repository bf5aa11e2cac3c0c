/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write};

use slog::{KV, Key, Level, OwnedKVList, Record, Serializer};

use super::StdLogValue;

#[derive(Default)]
struct KvCollector {
    pairs: Vec<(String, String)>,
}

impl Serializer for KvCollector {
    fn emit_arguments(&mut self, key: Key, val: &fmt::Arguments<'_>) -> slog::Result {
        self.pairs.push((key.to_string(), val.to_string()));
        Ok(())
    }
}

pub struct StdLogFormatter {
    append_code_position: bool,
}

impl StdLogFormatter {
    pub(crate) fn new(append_code_position: bool) -> Self {
        StdLogFormatter {
            append_code_position,
        }
    }

    pub(crate) fn format_slog(
        &self,
        record: &Record,
        logger_values: &OwnedKVList,
    ) -> Result<StdLogValue, slog::Error> {
        let mut collector = KvCollector::default();
        logger_values.serialize(record, &mut collector)?;
        record.kv().serialize(record, &mut collector)?;

        let location = if self.append_code_position {
            let mut s = String::with_capacity(64);
            let _ = write!(s, "{}:{}", record.module(), record.line());
            Some(s)
        } else {
            None
        };

        Ok(StdLogValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs: collector.pairs,
            location,
        })
    }
}

pub(crate) fn level_name(level: Level) -> &'static str {
    match level {
        Level::Critical => "CRIT",
        Level::Error => "ERROR",
        Level::Warning => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}
