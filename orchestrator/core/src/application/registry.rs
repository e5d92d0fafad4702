// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Registry
//!
//! Owns every live application of the daemon. Creation validates and
//! translates the whole document before anything is scheduled; deletion tears
//! the application down completely before its name becomes free again.
//!
//! A name maps to a [`Slot`]: `Live` while the application runs and `Deleting`
//! while it is being torn down. Operations on different names never contend;
//! a create racing a delete of the same name sees the `Deleting` slot and is
//! rejected.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::goal_machine::{GoalContext, GoalInstance, GoalMachine};
use crate::application::resolver::DependencyResolver;
use crate::application::retry::{RetryPolicy, StepError};
use crate::domain::application::{validate_application_name, ApplicationConfiguration, ConfigurationError};
use crate::domain::container_spec::{translate, TranslationContext};
use crate::domain::driver::{ContainerDriver, DriverError, ExecSession};
use crate::domain::events::ApplicationEvent;
use crate::domain::goal::{GoalState, GoalStatus, TransitionRecord};
use crate::domain::graph::DependencyGraph;
use crate::domain::node_config::OrchestrationConfig;
use crate::domain::stats::StatsSeries;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Application {0:?} already exists")]
    ApplicationAlreadyExists(String),

    #[error("Application {0:?} not found")]
    ApplicationNotFound(String),

    #[error("Goal {goal:?} not found in application {application:?}")]
    GoalNotFound { application: String, goal: String },

    #[error("Goal {0:?} has no container")]
    NoContainer(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl From<StepError> for OrchestratorError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Driver(e) => OrchestratorError::Driver(e),
            StepError::Cancelled => OrchestratorError::Driver(DriverError::Engine("operation cancelled".to_string())),
        }
    }
}

/// Externally visible state of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub name: String,
    pub goals: BTreeMap<String, GoalStatus>,
    pub main_goal: String,
}

pub struct Application {
    pub name: String,
    pub configuration: ApplicationConfiguration,
    pub created_at: DateTime<Utc>,
    goals: Vec<Arc<GoalInstance>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Application {
    pub fn status(&self) -> ApplicationStatus {
        ApplicationStatus {
            name: self.name.clone(),
            goals: self
                .goals
                .iter()
                .map(|goal| (goal.name.clone(), goal.status()))
                .collect(),
            main_goal: self.configuration.main_goal.clone(),
        }
    }

    pub fn goal(&self, name: &str) -> Option<&Arc<GoalInstance>> {
        self.goals.iter().find(|goal| goal.name == name)
    }

    pub fn goals(&self) -> &[Arc<GoalInstance>] {
        &self.goals
    }
}

enum Slot {
    Live(Arc<Application>),
    Deleting,
}

pub struct ApplicationRegistry {
    applications: DashMap<String, Slot>,
    driver: Arc<dyn ContainerDriver>,
    config: OrchestrationConfig,
    policy: RetryPolicy,
    events: EventBus,
}

impl ApplicationRegistry {
    pub fn new(driver: Arc<dyn ContainerDriver>, config: OrchestrationConfig, events: EventBus) -> Self {
        Self {
            applications: DashMap::new(),
            driver,
            policy: RetryPolicy::from_config(&config),
            config,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validates, translates and schedules a new application.
    pub fn create(
        &self,
        name: &str,
        configuration: ApplicationConfiguration,
    ) -> Result<ApplicationStatus, OrchestratorError> {
        validate_application_name(name)?;
        configuration.validate()?;
        let graph = DependencyGraph::build(&configuration.goals)?;

        let mut translation = TranslationContext::new(name, self.config.container_prefix.clone());
        if let Some(base_dir) = &self.config.base_dir {
            translation = translation.with_base_dir(base_dir);
        }
        let goals = configuration
            .goals
            .iter()
            .enumerate()
            .map(|(index, (goal, spec))| {
                let parameters = translate(goal, spec, &configuration.goals, &translation).map_err(|source| {
                    ConfigurationError::Translation {
                        goal: goal.to_string(),
                        source,
                    }
                })?;
                Ok(Arc::new(GoalInstance::new(index, goal, spec.clone(), parameters)))
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        let status = match self.applications.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(OrchestratorError::ApplicationAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let application = self.launch(name, configuration, graph, goals);
                let status = application.status();
                slot.insert(Slot::Live(application));
                status
            }
        };

        info!(application = %name, goals = status.goals.len(), "Application created");
        metrics::gauge!("marshal_applications").set(self.applications.len() as f64);
        self.events.publish_application_event(ApplicationEvent::ApplicationCreated {
            application: name.to_string(),
            main_goal: status.main_goal.clone(),
            goals: status.goals.keys().cloned().collect(),
            created_at: Utc::now(),
        });
        Ok(status)
    }

    fn launch(
        &self,
        name: &str,
        configuration: ApplicationConfiguration,
        graph: DependencyGraph,
        goals: Vec<Arc<GoalInstance>>,
    ) -> Arc<Application> {
        let cancel = CancellationToken::new();
        let resolver = Arc::new(DependencyResolver::new(
            name,
            graph,
            goals.iter().map(|goal| goal.subscribe()).collect(),
            goals.iter().map(|goal| goal.waker()).collect(),
        ));
        let (transitions, queue) = mpsc::channel(self.config.event_queue_capacity.max(1));

        let mut tasks = Vec::with_capacity(goals.len() + 1);
        tasks.push(tokio::spawn(Arc::clone(&resolver).run(queue, cancel.clone())));

        let context = GoalContext {
            application: name.to_string(),
            driver: Arc::clone(&self.driver),
            resolver,
            transitions,
            events: self.events.clone(),
            policy: self.policy.clone(),
            restart_backoff: self.config.restart_backoff.clone(),
            restart_reset_after: self.config.restart_reset_after,
            cancel: cancel.clone(),
        };
        for goal in &goals {
            let machine = GoalMachine::new(Arc::clone(goal), context.clone());
            tasks.push(tokio::spawn(machine.run()));
        }

        Arc::new(Application {
            name: name.to_string(),
            configuration,
            created_at: Utc::now(),
            goals,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Stops every goal, removes every container and forgets the application.
    pub async fn delete(&self, name: &str) -> Result<(), OrchestratorError> {
        let application = {
            let Some(mut slot) = self.applications.get_mut(name) else {
                return Err(OrchestratorError::ApplicationNotFound(name.to_string()));
            };
            match std::mem::replace(&mut *slot, Slot::Deleting) {
                Slot::Live(application) => application,
                Slot::Deleting => return Err(OrchestratorError::ApplicationNotFound(name.to_string())),
            }
        };

        info!(application = %name, "Deleting application");
        self.tear_down(&application).await;

        self.applications.remove(name);
        metrics::gauge!("marshal_applications").set(self.applications.len() as f64);
        self.events.publish_application_event(ApplicationEvent::ApplicationDeleted {
            application: name.to_string(),
            deleted_at: Utc::now(),
        });
        info!(application = %name, "Application deleted");
        Ok(())
    }

    async fn tear_down(&self, application: &Application) {
        application.cancel.cancel();
        let tasks = std::mem::take(&mut *application.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(application = %application.name, "Goal task ended abnormally: {}", e);
            }
        }

        // Goal tasks are gone; this is now the only writer.
        let never = CancellationToken::new();
        for goal in &application.goals {
            let snapshot = goal.snapshot();
            if let Some(id) = &snapshot.container {
                if snapshot.state == GoalState::Running {
                    if let Err(e) = self.policy.run("stop", &never, || self.driver.stop(id)).await {
                        warn!(application = %application.name, goal = %goal.name, "Could not stop container: {}", e);
                    }
                    if let Err(e) = goal.advance(GoalState::Terminated, |_| {}) {
                        warn!(application = %application.name, goal = %goal.name, "Could not record termination: {}", e);
                    }
                }
            }
            let container = &goal.parameters.name;
            if let Err(e) = self.policy.run("remove", &never, || self.driver.remove(container)).await {
                warn!(application = %application.name, goal = %goal.name, "Could not remove container: {}", e);
            }
        }
    }

    /// Deletes every application.
    pub async fn shutdown(&self) {
        for name in self.names() {
            if let Err(e) = self.delete(&name).await {
                warn!(application = %name, "Could not delete application on shutdown: {}", e);
            }
        }
    }

    fn live(&self, name: &str) -> Result<Arc<Application>, OrchestratorError> {
        match self.applications.get(name).as_deref() {
            Some(Slot::Live(application)) => Ok(Arc::clone(application)),
            _ => Err(OrchestratorError::ApplicationNotFound(name.to_string())),
        }
    }

    fn goal(&self, application: &str, goal: &str) -> Result<Arc<GoalInstance>, OrchestratorError> {
        self.live(application)?
            .goal(goal)
            .cloned()
            .ok_or_else(|| OrchestratorError::GoalNotFound {
                application: application.to_string(),
                goal: goal.to_string(),
            })
    }

    /// Sorted names of live applications.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .applications
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Live(_)))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn application(&self, name: &str) -> Result<Arc<Application>, OrchestratorError> {
        self.live(name)
    }

    pub fn status(&self, name: &str) -> Result<ApplicationStatus, OrchestratorError> {
        Ok(self.live(name)?.status())
    }

    pub fn goal_status(&self, application: &str, goal: &str) -> Result<GoalStatus, OrchestratorError> {
        Ok(self.goal(application, goal)?.status())
    }

    pub fn transition_log(&self, application: &str, goal: &str) -> Result<Vec<TransitionRecord>, OrchestratorError> {
        Ok(self.goal(application, goal)?.log.records())
    }

    pub fn stats(
        &self,
        application: &str,
        goal: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<StatsSeries, OrchestratorError> {
        Ok(self.goal(application, goal)?.stats.series(since))
    }

    pub fn current_stats(&self, application: &str, goal: &str) -> Result<Option<serde_json::Value>, OrchestratorError> {
        Ok(self.goal(application, goal)?.stats.current())
    }

    pub fn logs(&self, application: &str, goal: &str) -> Result<String, OrchestratorError> {
        Ok(self.goal(application, goal)?.tail.text())
    }

    pub async fn inspect(&self, application: &str, goal: &str) -> Result<serde_json::Value, OrchestratorError> {
        let goal = self.goal(application, goal)?;
        let id = goal
            .snapshot()
            .container
            .ok_or_else(|| OrchestratorError::NoContainer(goal.name.clone()))?;
        let never = CancellationToken::new();
        Ok(self.policy.run("inspect", &never, || self.driver.inspect(&id)).await?)
    }

    pub async fn exec(
        &self,
        application: &str,
        goal: &str,
        command: &[String],
    ) -> Result<ExecSession, OrchestratorError> {
        let goal = self.goal(application, goal)?;
        let snapshot = goal.snapshot();
        let id = match (&snapshot.container, snapshot.state) {
            (Some(id), GoalState::Running) => id.clone(),
            _ => return Err(OrchestratorError::NoContainer(goal.name.clone())),
        };
        let never = CancellationToken::new();
        Ok(self.policy.run("exec", &never, || self.driver.exec(&id, command)).await?)
    }
}
