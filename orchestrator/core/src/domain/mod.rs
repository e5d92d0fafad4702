// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: the application document, goal lifecycle vocabulary, the
//! container-engine port and everything that can be computed without I/O.

pub mod application;
pub mod container_spec;
pub mod driver;
pub mod events;
pub mod goal;
pub mod graph;
pub mod node_config;
pub mod stats;
