// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # marshal-core
//!
//! Goal orchestration engine for declarative multi-container applications.
//!
//! An application is a named set of goals. Each goal runs one container and
//! moves through its own state machine; `run_after` and `links` gate when a
//! goal may start, and a linked goal that stops running fails its observers.
//!
//! # Architecture
//!
//! - [`domain`]: goal states, application documents, the dependency graph,
//!   container parameter translation and the [`ContainerDriver`](domain::driver::ContainerDriver) port
//! - [`application`]: goal machines, the dependency resolver and the registry
//! - [`infrastructure`]: Docker driver and event bus
//! - [`presentation`]: HTTP API

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use application::{ApplicationRegistry, ApplicationStatus, OrchestratorError};
pub use domain::application::{ApplicationConfiguration, GoalSpec};
pub use domain::goal::{GoalState, GoalStatus};
