/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use chrono::Local;
use flume::Receiver;
use slog::Level;

mod async_log;
pub use async_log::{AsyncLogConfig, AsyncLogger};

mod stats;
pub use stats::{LogDropSnapshot, LogSnapshot, LogStats};

mod format;
use format::{StdLogFormatter, level_name};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub struct StdLogValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

impl StdLogValue {
    fn message_str(&self) -> &str {
        if self.message.is_empty() {
            "()"
        } else {
            &self.message
        }
    }
}

pub fn new_async_logger(
    async_conf: &AsyncLogConfig,
    append_code_position: bool,
    use_stdout: bool,
) -> AsyncLogger {
    let (sender, receiver) = flume::bounded::<StdLogValue>(async_conf.channel_capacity);

    let stats = Arc::new(LogStats::default());

    let io_thread = AsyncIoThread {
        receiver,
        stats: Arc::clone(&stats),
    };

    let _detached_thread = std::thread::Builder::new()
        .name(async_conf.thread_name.clone())
        .spawn(move || {
            if use_stdout {
                io_thread.run_with_stdout();
            } else {
                io_thread.run_with_stderr();
            }
        });

    AsyncLogger::new(sender, StdLogFormatter::new(append_code_position), stats)
}

fn write_time<IO: Write>(io: &mut IO) -> io::Result<()> {
    write!(io, "{}", Local::now().format(TIME_FORMAT))
}

fn write_plain<IO: Write>(io: &mut IO, v: &StdLogValue) -> io::Result<()> {
    write!(io, " {}", level_name(v.level))?;
    for (k, v) in &v.kv_pairs {
        write!(io, " {k}: {v},")?;
    }
    write!(io, " {}", v.message_str())?;
    if let Some(location) = &v.location {
        write!(io, " <{location}>")?;
    }
    writeln!(io)
}

fn write_console<IO: Write>(io: &mut IO, v: &StdLogValue) -> io::Result<()> {
    use anstyle::{AnsiColor, Color, Style};

    const COLOR_MAGENTA: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta)));
    const COLOR_RED: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
    const COLOR_YELLOW: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
    const COLOR_GREEN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
    const COLOR_CYAN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    const COLOR_BLUE: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue)));
    const STYLE_BOLD: Style = Style::new().bold();
    const STYLE_ITALIC: Style = Style::new().italic();

    let bold_s = STYLE_BOLD.render();
    let bold_e = STYLE_BOLD.render_reset();

    let level_color = match v.level {
        Level::Critical => COLOR_MAGENTA,
        Level::Error => COLOR_RED,
        Level::Warning => COLOR_YELLOW,
        Level::Info => COLOR_GREEN,
        Level::Debug => COLOR_CYAN,
        Level::Trace => COLOR_BLUE,
    };
    write!(
        io,
        " {}{}{}",
        level_color.render(),
        level_name(v.level),
        level_color.render_reset(),
    )?;

    for (k, v) in &v.kv_pairs {
        write!(io, " {bold_s}{k}{bold_e}={v},")?;
    }

    write!(io, " {bold_s}{}{bold_e}", v.message_str())?;

    if let Some(location) = &v.location {
        write!(
            io,
            " <{}{location}{}>",
            STYLE_ITALIC.render(),
            STYLE_ITALIC.render_reset()
        )?;
    }
    writeln!(io)
}

type WriteFn = fn(&mut Vec<u8>, &StdLogValue) -> io::Result<()>;

struct AsyncIoThread {
    receiver: Receiver<StdLogValue>,
    stats: Arc<LogStats>,
}

impl AsyncIoThread {
    fn run_with_stderr(self) {
        let stderr = io::stderr();
        if stderr.is_terminal() {
            self.run(stderr, write_console)
        } else {
            self.run(stderr, write_plain)
        }
    }

    fn run_with_stdout(self) {
        let stdout = io::stdout();
        if stdout.is_terminal() {
            self.run(stdout, write_console)
        } else {
            self.run(stdout, write_plain)
        }
    }

    fn run<IO: Write>(&self, mut io: IO, format_fn: WriteFn) {
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        while let Ok(v) = self.receiver.recv() {
            self.write_value(&mut io, &mut buf, &v, format_fn);

            while let Ok(v) = self.receiver.try_recv() {
                self.write_value(&mut io, &mut buf, &v, format_fn);
            }

            let _ = io.flush();
        }
    }

    fn write_value<IO: Write>(
        &self,
        io: &mut IO,
        buf: &mut Vec<u8>,
        v: &StdLogValue,
        format_fn: WriteFn,
    ) {
        buf.clear();
        if write_time(buf).and_then(|_| format_fn(buf, v)).is_err() {
            self.stats.add_format_failed();
            return;
        }
        match io.write_all(buf) {
            Ok(_) => self.stats.add_passed(buf.len()),
            Err(_) => self.stats.add_peer_unreachable(),
        }
    }
}
