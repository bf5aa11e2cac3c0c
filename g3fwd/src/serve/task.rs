/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerTaskStage {
    Accepted,
    Connecting,
    Relaying,
    Closed,
}

impl ServerTaskStage {
    pub fn brief(&self) -> &'static str {
        match self {
            ServerTaskStage::Accepted => "Accepted",
            ServerTaskStage::Connecting => "Connecting",
            ServerTaskStage::Relaying => "Relaying",
            ServerTaskStage::Closed => "Closed",
        }
    }
}
