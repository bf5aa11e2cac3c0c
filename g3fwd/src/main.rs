/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::error;

use g3fwd::opts::ProcArgs;

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        g3fwd::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    // set up process logger early, only proc args is used inside
    let _log_guard =
        g3fwd::log::setup(proc_args.verbose_level).context("failed to setup logger")?;

    match tokio_run(&proc_args) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}

fn tokio_run(args: &ProcArgs) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    rt.block_on(g3fwd::serve::run(args))
}
