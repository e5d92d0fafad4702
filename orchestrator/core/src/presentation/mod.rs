// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`marshal-core`)
//!
//! HTTP, WebSocket and SSE surface of the daemon. Handlers only translate
//! requests into [`ApplicationRegistry`](crate::application::ApplicationRegistry)
//! calls and errors into status codes.

pub mod api;

pub use api::app;
