/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::ffi::OsString;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::builder::ArgPredicate;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use clap_complete::Shell;
use humanize_rs::ParseError;

use crate::target::Target;

const ARGS_COMPLETION: &str = "completion";
const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_PORT: &str = "port";
const ARGS_BIND: &str = "bind";
const ARGS_TARGET: &str = "target";
const ARGS_UDP_IDLE_TIMEOUT: &str = "udp-idle-timeout";

const DEFAULT_PORT: &str = "8080";

/// Long options that may also be written with a single dash, `-port 9000`.
const SINGLE_DASH_LONG_ARGS: &[&str] = &[
    ARGS_COMPLETION,
    ARGS_VERSION,
    ARGS_VERBOSE,
    ARGS_PORT,
    ARGS_BIND,
    ARGS_TARGET,
    ARGS_UDP_IDLE_TIMEOUT,
];

#[derive(Debug)]
pub struct ProcArgs {
    pub verbose_level: u8,
    pub listen_addr: SocketAddr,
    pub target: Target,
    pub udp_idle_timeout: Option<Duration>,
}

fn build_cli_args() -> Command {
    Command::new(crate::build::PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show verbose output")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long(ARGS_VERBOSE),
        )
        .arg(
            Arg::new(ARGS_COMPLETION)
                .num_args(1)
                .value_name("SHELL")
                .long(ARGS_COMPLETION)
                .value_parser(value_parser!(Shell))
                .exclusive(true),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long(ARGS_VERSION),
        )
        .arg(
            Arg::new(ARGS_PORT)
                .help("Local port to listen on")
                .num_args(1)
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .default_value(DEFAULT_PORT)
                .default_value_if(ARGS_COMPLETION, ArgPredicate::IsPresent, None)
                .short('p')
                .long(ARGS_PORT),
        )
        .arg(
            Arg::new(ARGS_BIND)
                .help("Local address to listen on")
                .num_args(1)
                .value_name("IP")
                .value_parser(value_parser!(IpAddr))
                .long(ARGS_BIND),
        )
        .arg(
            Arg::new(ARGS_TARGET)
                .help("Target to forward to, http(s)://host[:port], tcp://host:port or udp://host:port")
                .num_args(1)
                .value_name("TARGET")
                .short('t')
                .long(ARGS_TARGET),
        )
        .arg(
            Arg::new(ARGS_UDP_IDLE_TIMEOUT)
                .help("Close udp sessions that have been idle for this long")
                .num_args(1)
                .value_name("DURATION")
                .long(ARGS_UDP_IDLE_TIMEOUT),
        )
}

/// Rewrite `-name` and `-name=value` into `--name` forms for the known long options.
fn normalize_single_dash_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut end_of_options = false;
    args.into_iter()
        .map(|arg| {
            let arg = arg.into();
            if end_of_options {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            if s == "--" {
                end_of_options = true;
                return arg;
            }
            let Some(rest) = s.strip_prefix('-') else {
                return arg;
            };
            if rest.starts_with('-') {
                return arg;
            }
            let name = rest.split_once('=').map(|(name, _)| name).unwrap_or(rest);
            if SINGLE_DASH_LONG_ARGS.contains(&name) {
                OsString::from(format!("-{s}"))
            } else {
                arg
            }
        })
        .collect()
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let d = match humanize_rs::duration::parse(s) {
        Ok(d) => d,
        Err(ParseError::MissingUnit) => {
            let secs = u64::from_str(s).map_err(|_| anyhow!("unsupported duration string"))?;
            Duration::from_secs(secs)
        }
        Err(e) => return Err(anyhow!("invalid humanize duration string: {e}")),
    };
    if d.is_zero() {
        return Err(anyhow!("duration should be greater than zero"));
    }
    Ok(d)
}

fn parse_matches(args: &ArgMatches) -> anyhow::Result<ProcArgs> {
    let verbose_level = args.get_count(ARGS_VERBOSE);

    let Some(target) = args.get_one::<String>(ARGS_TARGET) else {
        return Err(anyhow!("no target given"));
    };
    let target = Target::from_str(target).context(format!("invalid target {target}"))?;

    let port = args
        .get_one::<u16>(ARGS_PORT)
        .copied()
        .ok_or_else(|| anyhow!("no listen port given"))?;
    let ip = args
        .get_one::<IpAddr>(ARGS_BIND)
        .copied()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let udp_idle_timeout = match args.get_one::<String>(ARGS_UDP_IDLE_TIMEOUT) {
        Some(s) => Some(parse_duration(s).context(format!("invalid udp idle timeout {s}"))?),
        None => None,
    };

    Ok(ProcArgs {
        verbose_level,
        listen_addr: SocketAddr::new(ip, port),
        target,
        udp_idle_timeout,
    })
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args_parser = build_cli_args();
    let args = args_parser.get_matches_from(normalize_single_dash_args(std::env::args_os()));

    if let Some(target) = args.get_one::<Shell>(ARGS_COMPLETION) {
        let mut app = build_cli_args();
        let bin_name = app.get_name().to_string();
        clap_complete::generate(*target, &mut app, bin_name, &mut io::stdout());
        return Ok(None);
    }

    if args.get_flag(ARGS_VERSION) {
        crate::build::print_version(args.get_count(ARGS_VERBOSE));
        return Ok(None);
    }

    parse_matches(&args).map(Some)
}
