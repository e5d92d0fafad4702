// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory container engine shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use marshal_core::application::ApplicationRegistry;
use marshal_core::domain::application::{ApplicationConfiguration, AuthConfiguration};
use marshal_core::domain::container_spec::ContainerParameters;
use marshal_core::domain::driver::{
    ContainerDriver, ContainerExit, ContainerId, DriverError, ExecSession, OutputStream, StatsStream,
};
use marshal_core::domain::goal::GoalState;
use marshal_core::domain::node_config::{BackoffConfig, OrchestrationConfig, RetryConfig};
use marshal_core::infrastructure::EventBus;

/// Exit code reported for containers stopped by the orchestrator.
pub const STOPPED_EXIT_CODE: i64 = 137;

struct MockContainer {
    name: String,
    started: bool,
    exit: watch::Sender<Option<ContainerExit>>,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    created: Vec<ContainerParameters>,
    pulled: Vec<String>,
    unavailable_images: HashSet<String>,
    stats: HashMap<String, Vec<Value>>,
    start_delays: HashMap<String, Duration>,
}

#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pulling `image` fails with `ImageUnavailable`.
    pub fn make_unavailable(&self, image: &str) {
        self.state.lock().unavailable_images.insert(image.to_string());
    }

    /// Stat documents streamed to the collector of the container named `name`.
    pub fn set_stats(&self, name: &str, samples: Vec<Value>) {
        self.state.lock().stats.insert(name.to_string(), samples);
    }

    /// Starting the container named `name` takes `delay`.
    pub fn delay_start(&self, name: &str, delay: Duration) {
        self.state.lock().start_delays.insert(name.to_string(), delay);
    }

    /// Makes the started container named `name` exit with `code`.
    /// Returns false when no such container is running.
    pub fn exit(&self, name: &str, code: i64) -> bool {
        let state = self.state.lock();
        let running = state
            .containers
            .values()
            .find(|c| c.name == name && c.started && c.exit.borrow().is_none());
        match running {
            Some(container) => {
                container.exit.send_replace(Some(ContainerExit::Code(code)));
                true
            }
            None => false,
        }
    }

    /// Names of containers that exist in the engine.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().containers.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    pub fn created(&self) -> Vec<ContainerParameters> {
        self.state.lock().created.clone()
    }

    pub fn created_count(&self, name: &str) -> usize {
        self.state.lock().created.iter().filter(|p| p.name == name).count()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.state.lock().pulled.clone()
    }

    fn with_container<T>(
        &self,
        id: &ContainerId,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        state
            .containers
            .get_mut(id.as_str())
            .map(f)
            .ok_or_else(|| DriverError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn pull_image(&self, image: &str, _credentials: Option<&AuthConfiguration>) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if state.unavailable_images.contains(image) {
            return Err(DriverError::ImageUnavailable(image.to_string()));
        }
        state.pulled.push(image.to_string());
        Ok(())
    }

    async fn create(&self, params: &ContainerParameters) -> Result<ContainerId, DriverError> {
        let mut state = self.state.lock();
        if state.containers.values().any(|c| c.name == params.name) {
            return Err(DriverError::Engine(format!("name {} is already in use", params.name)));
        }
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (exit, _) = watch::channel(None);
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: params.name.clone(),
                started: false,
                exit,
            },
        );
        state.created.push(params.clone());
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<(), DriverError> {
        let name = self.with_container(id, |c| c.name.clone())?;
        let delay = self.state.lock().start_delays.get(&name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_container(id, |c| c.started = true)
    }

    async fn wait(&self, id: &ContainerId) -> Result<ContainerExit, DriverError> {
        let mut exit = self.with_container(id, |c| c.exit.subscribe())?;
        let result = exit.wait_for(|e| e.is_some()).await.map(|e| *e);
        match result {
            Ok(Some(e)) => Ok(e),
            _ => Ok(ContainerExit::Vanished),
        }
    }

    async fn stop(&self, id: &ContainerId) -> Result<(), DriverError> {
        self.with_container(id, |c| {
            c.exit.send_if_modified(|e| {
                if e.is_none() {
                    *e = Some(ContainerExit::Code(STOPPED_EXIT_CODE));
                    true
                } else {
                    false
                }
            });
        })
    }

    async fn remove(&self, id_or_name: &str) -> Result<(), DriverError> {
        self.state
            .lock()
            .containers
            .retain(|id, c| id != id_or_name && c.name != id_or_name);
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<Value, DriverError> {
        self.with_container(id, |c| {
            json!({
                "Id": id.as_str(),
                "Name": format!("/{}", c.name),
                "State": { "Running": c.started && c.exit.borrow().is_none() },
            })
        })
    }

    async fn stats(&self, id: &ContainerId) -> Result<StatsStream, DriverError> {
        let name = self.with_container(id, |c| c.name.clone())?;
        let samples = self.state.lock().stats.get(&name).cloned().unwrap_or_default();
        Ok(stream::iter(samples.into_iter().map(Ok)).boxed())
    }

    async fn logs(&self, id: &ContainerId) -> Result<OutputStream, DriverError> {
        let name = self.with_container(id, |c| c.name.clone())?;
        let line = Bytes::from(format!("hello from {}\n", name));
        Ok(stream::iter(vec![Ok(line)]).boxed())
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecSession, DriverError> {
        self.with_container(id, |_| ())?;
        let echo = Bytes::from(command.join(" "));
        Ok(ExecSession {
            output: stream::iter(vec![Ok(echo)]).boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }
}

/// Orchestration settings with delays short enough for tests.
pub fn test_config() -> OrchestrationConfig {
    OrchestrationConfig {
        container_prefix: "test".to_string(),
        driver_timeout: Duration::from_secs(2),
        driver_retry: RetryConfig {
            attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        },
        restart_backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        ..OrchestrationConfig::default()
    }
}

pub fn registry(driver: &Arc<MockDriver>) -> Arc<ApplicationRegistry> {
    let driver: Arc<dyn ContainerDriver> = driver.clone();
    Arc::new(ApplicationRegistry::new(driver, test_config(), EventBus::with_default_capacity()))
}

pub fn container_name(application: &str, goal: &str) -> String {
    format!("test_{}_{}", application, goal)
}

pub fn document(json: Value) -> ApplicationConfiguration {
    serde_json::from_value(json).expect("valid application document")
}

/// Polls until the goal reaches `state`, panicking after five seconds.
pub async fn wait_for_state(registry: &ApplicationRegistry, application: &str, goal: &str, state: GoalState) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(status) = registry.goal_status(application, goal) {
                if status.status == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if reached.is_err() {
        panic!(
            "goal {} of {} never reached {}, last status {:?}",
            goal,
            application,
            state,
            registry.goal_status(application, goal)
        );
    }
}

/// Polls until `condition` holds, panicking after five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

/// States of the goal's transition log, oldest first.
pub fn states(registry: &ApplicationRegistry, application: &str, goal: &str) -> Vec<GoalState> {
    registry
        .transition_log(application, goal)
        .expect("goal exists")
        .into_iter()
        .map(|record| record.status)
        .collect()
}

/// Only the `running`/`failed`/`terminated` entries of the log.
pub fn outcomes(registry: &ApplicationRegistry, application: &str, goal: &str) -> Vec<GoalState> {
    states(registry, application, goal)
        .into_iter()
        .filter(|s| matches!(s, GoalState::Running | GoalState::Failed | GoalState::Terminated))
        .collect()
}

pub fn stat_document(read: &str, total: u64, previous: u64, memory: u64) -> Value {
    json!({
        "read": read,
        "cpu_stats": { "cpu_usage": { "total_usage": total } },
        "precpu_stats": { "cpu_usage": { "total_usage": previous } },
        "memory_stats": { "usage": memory },
    })
}
