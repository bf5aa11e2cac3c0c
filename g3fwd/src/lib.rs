/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub mod log;
pub mod opts;
pub mod serve;
pub mod target;

mod build;
