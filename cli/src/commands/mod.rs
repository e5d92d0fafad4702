// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Marshal CLI

pub mod app;
pub mod config;

pub use self::app::AppCommand;
pub use self::config::ConfigCommand;
