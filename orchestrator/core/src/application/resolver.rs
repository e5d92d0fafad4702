// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dependency Resolver
//!
//! Decides, for one goal of an application, whether it may leave
//! `waiting_for_dependencies` and whether a running goal must fail because a
//! linked goal went away.
//!
//! Goals publish their [`GoalSnapshot`] through a `watch` channel, so every
//! evaluation reads a consistent view of the other goals without taking any
//! lock their owners hold. Transitions arrive on a bounded queue; for each one
//! the resolver wakes the observers of the goal that moved, and the woken goals
//! re-evaluate on their own tasks.
//!
//! ## Cascade detection
//!
//! When a goal is admitted it records the `run_epoch` of every linked goal.
//! While it runs, a linked goal that is not `running`, or whose epoch moved on
//! (it failed and came back between two evaluations), breaks the link.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::goal::{GoalSnapshot, GoalState};
use crate::domain::graph::DependencyGraph;

/// A goal changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub goal: usize,
    pub state: GoalState,
}

/// Outcome of a readiness evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Names of the goals still holding this one back.
    Pending(Vec<String>),
}

/// `run_epoch` of each linked goal at admission time, keyed by goal index.
pub type LinkEpochs = Vec<(usize, u64)>;

pub struct DependencyResolver {
    application: String,
    graph: DependencyGraph,
    snapshots: Vec<watch::Receiver<GoalSnapshot>>,
    wakers: Vec<Arc<Notify>>,
}

impl DependencyResolver {
    /// `snapshots` and `wakers` are indexed like the graph's nodes.
    pub fn new(
        application: impl Into<String>,
        graph: DependencyGraph,
        snapshots: Vec<watch::Receiver<GoalSnapshot>>,
        wakers: Vec<Arc<Notify>>,
    ) -> Self {
        debug_assert_eq!(graph.len(), snapshots.len());
        debug_assert_eq!(graph.len(), wakers.len());
        Self {
            application: application.into(),
            graph,
            snapshots,
            wakers,
        }
    }

    fn snapshot(&self, index: usize) -> GoalSnapshot {
        self.snapshots[index].borrow().clone()
    }

    pub fn waker(&self, index: usize) -> Arc<Notify> {
        Arc::clone(&self.wakers[index])
    }

    /// Ready once every `run_after` goal terminated cleanly and every linked goal runs.
    pub fn readiness(&self, index: usize) -> Readiness {
        let node = self.graph.node(index);
        let mut pending = Vec::new();

        for &target in &node.run_after {
            if !self.snapshot(target).succeeded() {
                pending.push(self.graph.node(target).name.clone());
            }
        }
        for &target in &node.links {
            if self.snapshot(target).state != GoalState::Running {
                pending.push(self.graph.node(target).name.clone());
            }
        }

        if pending.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Pending(pending)
        }
    }

    /// Current epochs of the goal's links, recorded on admission.
    pub fn link_epochs(&self, index: usize) -> LinkEpochs {
        self.graph
            .node(index)
            .links
            .iter()
            .map(|&target| (target, self.snapshot(target).run_epoch))
            .collect()
    }

    /// Name of the first linked goal that stopped running since admission.
    pub fn broken_link(&self, admitted: &[(usize, u64)]) -> Option<String> {
        admitted.iter().find_map(|&(target, epoch)| {
            let snapshot = self.snapshot(target);
            if snapshot.state != GoalState::Running || snapshot.run_epoch != epoch {
                Some(self.graph.node(target).name.clone())
            } else {
                None
            }
        })
    }

    pub fn notify_observers(&self, index: usize) {
        for &observer in self.graph.observers(index) {
            self.wakers[observer].notify_one();
        }
    }

    /// Fans transitions out to observers until the queue closes or `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        mut transitions: mpsc::Receiver<TransitionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = transitions.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            debug!(
                application = %self.application,
                goal = %self.graph.node(event.goal).name,
                state = %event.state,
                observers = self.graph.observers(event.goal).len(),
                "Dispatching transition"
            );
            self.notify_observers(event.goal);
        }
        debug!(application = %self.application, "Dependency resolver stopped");
    }
}
