// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Goal State Machine
//!
//! Every goal is driven by exactly one task running [`GoalMachine::run`]. The
//! task is the only writer of the goal's state; each transition is appended to
//! the [`TransitionLog`], published on the goal's `watch` channel and queued for
//! the [`DependencyResolver`], strictly in that order.
//!
//! Engine calls go through [`RetryPolicy`]: transient errors keep the goal in
//! its current state while the call is retried, and only an exhausted step
//! moves it to `failed`. A `failed` goal with `smart_restart` waits out its
//! backoff, discards its container and re-enters its initial gating state, so
//! the resolver admits it again exactly like the first time.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::output_tail::OutputTail;
use crate::application::resolver::{DependencyResolver, LinkEpochs, Readiness, TransitionEvent};
use crate::application::retry::{RetryPolicy, StepError};
use crate::application::stats_collector::StatsCollector;
use crate::application::transition_log::TransitionLog;
use crate::domain::application::GoalSpec;
use crate::domain::container_spec::ContainerParameters;
use crate::domain::driver::{ContainerDriver, ContainerExit, ContainerId};
use crate::domain::events::GoalEvent;
use crate::domain::goal::{GoalSnapshot, GoalState, GoalStatus, TransitionError, TransitionRecord};
use crate::domain::node_config::BackoffConfig;
use crate::infrastructure::event_bus::EventBus;

/// Runtime state of one goal, shared between its machine, the resolver and readers.
pub struct GoalInstance {
    pub index: usize,
    pub name: String,
    pub spec: GoalSpec,
    pub parameters: ContainerParameters,
    pub log: TransitionLog,
    pub stats: Arc<StatsCollector>,
    pub tail: Arc<OutputTail>,
    state: watch::Sender<GoalSnapshot>,
    wake: Arc<Notify>,
}

impl GoalInstance {
    pub fn new(index: usize, name: impl Into<String>, spec: GoalSpec, parameters: ContainerParameters) -> Self {
        let initial = GoalState::initial(spec.has_dependencies());
        let log = TransitionLog::new();
        log.append(initial);
        let (state, _) = watch::channel(GoalSnapshot::new(initial));
        Self {
            index,
            name: name.into(),
            spec,
            parameters,
            log,
            stats: Arc::new(StatsCollector::new()),
            tail: Arc::new(OutputTail::new()),
            state,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn snapshot(&self) -> GoalSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> GoalStatus {
        self.state.borrow().status(&self.name)
    }

    pub fn subscribe(&self) -> watch::Receiver<GoalSnapshot> {
        self.state.subscribe()
    }

    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Moves the goal to `next`, logging before publishing. Only the goal's
    /// owner may call this.
    pub fn advance(
        &self,
        next: GoalState,
        update: impl FnOnce(&mut GoalSnapshot),
    ) -> Result<TransitionRecord, TransitionError> {
        let mut snapshot = self.snapshot();
        if !snapshot.state.can_transition_to(next) {
            return Err(TransitionError {
                goal: self.name.clone(),
                from: snapshot.state,
                to: next,
            });
        }
        let record = self.log.append(next);
        snapshot.state = next;
        update(&mut snapshot);
        self.state.send_replace(snapshot);
        Ok(record)
    }
}

/// Collaborators shared by every goal of one application.
#[derive(Clone)]
pub struct GoalContext {
    pub application: String,
    pub driver: Arc<dyn ContainerDriver>,
    pub resolver: Arc<DependencyResolver>,
    pub transitions: mpsc::Sender<TransitionEvent>,
    pub events: EventBus,
    pub policy: RetryPolicy,
    pub restart_backoff: BackoffConfig,
    pub restart_reset_after: Duration,
    pub cancel: CancellationToken,
}

pub struct GoalMachine {
    goal: Arc<GoalInstance>,
    context: GoalContext,
}

/// Smart-restart delay driven by consecutive failures. A run that lasted at
/// least `reset_after` clears the streak.
struct RestartBackoff {
    config: BackoffConfig,
    reset_after: Duration,
    failures: u32,
}

impl RestartBackoff {
    fn new(config: BackoffConfig, reset_after: Duration) -> Self {
        Self {
            config,
            reset_after,
            failures: 0,
        }
    }

    fn ran_for(&mut self, uptime: Duration) {
        if uptime >= self.reset_after {
            self.failures = 0;
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }
}

/// Where a step left the goal.
enum Step {
    Next(GoalState),
    Stop,
}

impl GoalMachine {
    pub fn new(goal: Arc<GoalInstance>, context: GoalContext) -> Self {
        Self { goal, context }
    }

    pub async fn run(self) {
        if let Err(e) = self.drive().await {
            warn!(application = %self.context.application, "Goal machine stopped: {}", e);
        }
        debug!(application = %self.context.application, goal = %self.goal.name, "Goal task finished");
    }

    async fn drive(&self) -> Result<(), TransitionError> {
        let mut state = self.goal.snapshot().state;
        let mut admitted: LinkEpochs = Vec::new();
        let mut backoff = RestartBackoff::new(
            self.context.restart_backoff.clone(),
            self.context.restart_reset_after,
        );

        loop {
            let step = match state {
                GoalState::WaitingForDependencies => match self.await_admission().await {
                    Some(epochs) => {
                        admitted = epochs;
                        self.transition(GoalState::FetchingImage, |_| {}).await?
                    }
                    None => Step::Stop,
                },
                GoalState::FetchingImage => match self.prepare_container().await {
                    Ok(id) => {
                        self.transition(GoalState::Starting, |s| s.container = Some(id)).await?
                    }
                    Err(StepError::Cancelled) => Step::Stop,
                    Err(StepError::Driver(e)) => {
                        warn!(
                            application = %self.context.application,
                            goal = %self.goal.name,
                            "Could not prepare container: {}", e
                        );
                        self.transition(GoalState::Failed, |s| s.exit_code = None).await?
                    }
                },
                GoalState::Starting => self.start_container(&admitted).await?,
                GoalState::Running => {
                    let started = Instant::now();
                    let step = self.supervise(&admitted).await?;
                    backoff.ran_for(started.elapsed());
                    step
                }
                GoalState::Failed if self.goal.spec.smart_restart => {
                    self.restart(backoff.next_delay()).await?
                }
                GoalState::Failed | GoalState::Terminated => Step::Stop,
            };

            match step {
                Step::Next(next) => state = next,
                Step::Stop => return Ok(()),
            }
        }
    }

    async fn transition(
        &self,
        next: GoalState,
        update: impl FnOnce(&mut GoalSnapshot),
    ) -> Result<Step, TransitionError> {
        let from = self.goal.snapshot().state;
        let record = self.goal.advance(next, update)?;
        let snapshot = self.goal.snapshot();

        debug!(
            application = %self.context.application,
            goal = %self.goal.name,
            from = %from,
            to = %next,
            "Goal transitioned"
        );
        metrics::counter!("marshal_goal_transitions_total", "state" => next.as_str()).increment(1);

        self.context.events.publish_goal_event(GoalEvent::GoalTransitioned {
            application: self.context.application.clone(),
            goal: self.goal.name.clone(),
            from,
            to: next,
            exit_code: snapshot.exit_code,
            transitioned_at: record.time,
        });

        // A closed queue means the application is being torn down.
        let _ = self
            .context
            .transitions
            .send(TransitionEvent { goal: self.goal.index, state: next })
            .await;

        Ok(Step::Next(next))
    }

    /// Waits until the resolver admits the goal; `None` when cancelled.
    async fn await_admission(&self) -> Option<LinkEpochs> {
        let resolver = &self.context.resolver;
        loop {
            match resolver.readiness(self.goal.index) {
                Readiness::Ready => return Some(resolver.link_epochs(self.goal.index)),
                Readiness::Pending(pending) => {
                    debug!(
                        application = %self.context.application,
                        goal = %self.goal.name,
                        ?pending,
                        "Waiting for dependencies"
                    );
                }
            }
            tokio::select! {
                _ = self.context.cancel.cancelled() => return None,
                _ = self.goal.wake.notified() => {}
            }
        }
    }

    async fn prepare_container(&self) -> Result<ContainerId, StepError> {
        let context = &self.context;
        let driver = &context.driver;
        let spec = &self.goal.spec;
        let parameters = &self.goal.parameters;

        info!(application = %context.application, goal = %self.goal.name, image = %spec.image, "Fetching image");
        context
            .policy
            .run("pull_image", &context.cancel, || {
                driver.pull_image(&spec.image, spec.auth_config.as_ref())
            })
            .await?;

        // a container left over under the same name would make creation fail
        context
            .policy
            .run("remove", &context.cancel, || driver.remove(&parameters.name))
            .await?;

        let id = context
            .policy
            .run("create", &context.cancel, || driver.create(parameters))
            .await?;

        context.events.publish_goal_event(GoalEvent::ContainerCreated {
            application: context.application.clone(),
            goal: self.goal.name.clone(),
            container_id: id.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Starts the created container. Links are checked again on both sides
    /// of the start call, so a goal never runs next to a linked goal that
    /// failed while it was being prepared.
    async fn start_container(&self, admitted: &[(usize, u64)]) -> Result<Step, TransitionError> {
        let context = &self.context;
        let Some(id) = self.goal.snapshot().container else {
            return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
        };

        if let Some(link) = context.resolver.broken_link(admitted) {
            warn!(application = %context.application, goal = %self.goal.name, link = %link, "Linked goal stopped running before start");
            return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
        }

        match context
            .policy
            .run("start", &context.cancel, || context.driver.start(&id))
            .await
        {
            Ok(()) => {}
            Err(StepError::Cancelled) => return Ok(Step::Stop),
            Err(StepError::Driver(e)) => {
                warn!(application = %context.application, goal = %self.goal.name, "Could not start container: {}", e);
                return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
            }
        }

        if let Some(link) = context.resolver.broken_link(admitted) {
            warn!(application = %context.application, goal = %self.goal.name, link = %link, "Linked goal stopped running during start");
            self.stop_container(&id).await;
            return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
        }

        info!(application = %context.application, goal = %self.goal.name, container = %id, "Goal running");
        self.transition(GoalState::Running, |s| s.run_epoch += 1).await
    }

    async fn stop_container(&self, id: &ContainerId) {
        let context = &self.context;
        if let Err(StepError::Driver(e)) = context
            .policy
            .run("stop", &context.cancel, || context.driver.stop(id))
            .await
        {
            warn!(application = %context.application, goal = %self.goal.name, "Could not stop container: {}", e);
        }
    }

    /// Watches a running container until it exits, a link breaks or the
    /// application goes away.
    async fn supervise(&self, admitted: &[(usize, u64)]) -> Result<Step, TransitionError> {
        let context = &self.context;
        let Some(id) = self.goal.snapshot().container else {
            return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
        };

        // collectors live exactly as long as this run
        let run = context.cancel.child_token();
        let _run_guard = run.clone().drop_guard();
        self.goal
            .stats
            .spawn_collection(Arc::clone(&context.driver), id.clone(), run.clone());
        self.goal
            .tail
            .spawn_follow(Arc::clone(&context.driver), id.clone(), run.clone());

        let mut exit = context.driver.wait(&id);
        loop {
            if let Some(link) = context.resolver.broken_link(admitted) {
                warn!(
                    application = %context.application,
                    goal = %self.goal.name,
                    link = %link,
                    "Linked goal stopped running, failing goal"
                );
                self.stop_container(&id).await;
                return self.transition(GoalState::Failed, |s| s.exit_code = None).await;
            }

            tokio::select! {
                _ = context.cancel.cancelled() => return Ok(Step::Stop),
                _ = self.goal.wake.notified() => continue,
                result = &mut exit => {
                    return match result {
                        Ok(ContainerExit::Code(0)) => {
                            info!(application = %context.application, goal = %self.goal.name, "Goal terminated");
                            self.transition(GoalState::Terminated, |s| s.exit_code = Some(0)).await
                        }
                        Ok(ContainerExit::Code(code)) => {
                            warn!(application = %context.application, goal = %self.goal.name, code, "Container exited with error");
                            self.transition(GoalState::Failed, |s| s.exit_code = Some(code)).await
                        }
                        Ok(ContainerExit::Vanished) => {
                            warn!(application = %context.application, goal = %self.goal.name, "Container disappeared");
                            self.transition(GoalState::Failed, |s| s.exit_code = None).await
                        }
                        Err(e) => {
                            warn!(application = %context.application, goal = %self.goal.name, "Lost track of container: {}", e);
                            self.transition(GoalState::Failed, |s| s.exit_code = None).await
                        }
                    };
                }
            }
        }
    }

    async fn restart(&self, delay: Duration) -> Result<Step, TransitionError> {
        let context = &self.context;
        let snapshot = self.goal.snapshot();
        info!(
            application = %context.application,
            goal = %self.goal.name,
            restarts = snapshot.restarts,
            ?delay,
            "Restarting failed goal"
        );

        tokio::select! {
            _ = context.cancel.cancelled() => return Ok(Step::Stop),
            _ = tokio::time::sleep(delay) => {}
        }

        let name = &self.goal.parameters.name;
        match context
            .policy
            .run("remove", &context.cancel, || context.driver.remove(name))
            .await
        {
            Ok(()) => {}
            Err(StepError::Cancelled) => return Ok(Step::Stop),
            // creation removes stale containers again
            Err(StepError::Driver(e)) => {
                warn!(application = %context.application, goal = %self.goal.name, "Could not remove old container: {}", e);
            }
        }

        metrics::counter!("marshal_goal_restarts_total").increment(1);
        context.events.publish_goal_event(GoalEvent::GoalRestarting {
            application: context.application.clone(),
            goal: self.goal.name.clone(),
            restarts: snapshot.restarts + 1,
            restarting_at: Utc::now(),
        });

        let initial = GoalState::initial(self.goal.spec.has_dependencies());
        self.transition(initial, |s| {
            s.restarts += 1;
            s.exit_code = None;
            s.container = None;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(spec: GoalSpec) -> GoalInstance {
        let parameters = ContainerParameters {
            name: "marshal_shop_web".to_string(),
            config: Default::default(),
            host_config: Default::default(),
        };
        GoalInstance::new(0, "web", spec, parameters)
    }

    #[test]
    fn test_restart_backoff_resets_after_stable_run() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
        };
        let mut backoff = RestartBackoff::new(config, Duration::from_secs(60));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        backoff.ran_for(Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        backoff.ran_for(Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));

        backoff.ran_for(Duration::from_secs(3600));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_initial_state_is_logged() {
        let goal = instance(GoalSpec::new("nginx:1.27"));
        assert_eq!(goal.snapshot().state, GoalState::FetchingImage);
        assert_eq!(goal.log.records()[0].status, GoalState::FetchingImage);

        let mut spec = GoalSpec::new("nginx:1.27");
        spec.run_after = vec!["migrate".to_string()];
        let goal = instance(spec);
        assert_eq!(goal.status().status, GoalState::WaitingForDependencies);
    }

    #[test]
    fn test_advance_logs_before_publishing() {
        let goal = instance(GoalSpec::new("nginx:1.27"));
        let mut watcher = goal.subscribe();

        goal.advance(GoalState::Starting, |s| s.container = Some(ContainerId::new("c1")))
            .unwrap();
        assert!(watcher.has_changed().unwrap());
        let seen = watcher.borrow_and_update().clone();
        assert_eq!(seen.state, GoalState::Starting);
        assert_eq!(seen.container, Some(ContainerId::new("c1")));
        assert_eq!(goal.log.records().last().unwrap().status, GoalState::Starting);
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let goal = instance(GoalSpec::new("nginx:1.27"));
        let err = goal.advance(GoalState::Terminated, |_| {}).unwrap_err();
        assert_eq!(err.from, GoalState::FetchingImage);
        assert_eq!(err.to, GoalState::Terminated);
        assert_eq!(goal.log.len(), 1);
    }
}
