// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod goal_machine;
pub mod output_tail;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod stats_collector;
pub mod transition_log;

pub use registry::{Application, ApplicationRegistry, ApplicationStatus, OrchestratorError};
