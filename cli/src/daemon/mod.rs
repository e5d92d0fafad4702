// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! The daemon runs in the foreground, serves the HTTP API and tears every
//! application down on shutdown. [`DaemonClient`] is the CLI side of that API.

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::start_daemon;
