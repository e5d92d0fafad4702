// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod docker;
pub mod event_bus;

pub use docker::DockerDriver;
pub use event_bus::{DomainEvent, EventBus};
