// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Marshal CLI library - exposes testable components
//!
//! - [`daemon`]: the foreground daemon and the HTTP client talking to it
//! - [`commands`]: `app` and `config` subcommands

pub mod commands;
pub mod daemon;
