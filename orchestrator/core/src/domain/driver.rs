// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::domain::application::AuthConfiguration;
use crate::domain::container_spec::ContainerParameters;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a container stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerExit {
    Code(i64),
    /// The engine lost the container without reporting an exit code.
    Vanished,
}

/// Raw engine stat samples, one JSON document per sample (must carry `read`).
pub type StatsStream = BoxStream<'static, Result<serde_json::Value, DriverError>>;

/// Raw stdout/stderr chunks.
pub type OutputStream = BoxStream<'static, Result<Bytes, DriverError>>;

/// Interactive terminal attached to a running container.
pub struct ExecSession {
    pub output: OutputStream,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Image not available: {0}")]
    ImageUnavailable(String),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container engine error: {0}")]
    Engine(String),
    #[error("Container engine did not answer within {0:?}")]
    Timeout(Duration),
}

impl DriverError {
    /// Errors worth retrying while the goal stays in its current state.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Engine(_) | DriverError::Timeout(_))
    }
}

/// Container engine surface consumed by the orchestration core.
///
/// Implementations must be cheap to share: every goal of every application
/// holds the same `Arc<dyn ContainerDriver>`.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&AuthConfiguration>,
    ) -> Result<(), DriverError>;

    async fn create(&self, params: &ContainerParameters) -> Result<ContainerId, DriverError>;

    async fn start(&self, id: &ContainerId) -> Result<(), DriverError>;

    /// Resolves once the container is no longer running.
    async fn wait(&self, id: &ContainerId) -> Result<ContainerExit, DriverError>;

    async fn stop(&self, id: &ContainerId) -> Result<(), DriverError>;

    /// Force-removes a container by id or name. Removing a container that does
    /// not exist is not an error.
    async fn remove(&self, id_or_name: &str) -> Result<(), DriverError>;

    /// Engine-native inspection document (`Config`, `HostConfig`, `State`, ...).
    async fn inspect(&self, id: &ContainerId) -> Result<serde_json::Value, DriverError>;

    async fn stats(&self, id: &ContainerId) -> Result<StatsStream, DriverError>;

    async fn logs(&self, id: &ContainerId) -> Result<OutputStream, DriverError>;

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecSession, DriverError>;
}
