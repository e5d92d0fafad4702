// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Goal Lifecycle
//!
//! States a goal moves through and the status objects exposed to callers.
//!
//! ```text
//! waiting_for_dependencies ──► fetching_image ──► starting ──► running ──► terminated
//!          ▲                        │  ▲              │           │
//!          │                        ▼  │              ▼           ▼
//!          └───────────────────── failed ◄────────────┴───────────┘
//!                 (smart_restart only)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::driver::ContainerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    WaitingForDependencies,
    FetchingImage,
    Starting,
    Running,
    Terminated,
    Failed,
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GoalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalState::WaitingForDependencies => "waiting_for_dependencies",
            GoalState::FetchingImage => "fetching_image",
            GoalState::Starting => "starting",
            GoalState::Running => "running",
            GoalState::Terminated => "terminated",
            GoalState::Failed => "failed",
        }
    }

    /// State a goal enters on creation and after every smart restart.
    pub fn initial(has_dependencies: bool) -> Self {
        if has_dependencies {
            GoalState::WaitingForDependencies
        } else {
            GoalState::FetchingImage
        }
    }

    /// Whether moving from this state to `next` is a legal lifecycle step.
    ///
    /// `failed` only leads back into the gating states; whether the goal is
    /// allowed to take that edge (`smart_restart`) is decided by the caller.
    pub fn can_transition_to(&self, next: GoalState) -> bool {
        matches!(
            (self, next),
            (GoalState::WaitingForDependencies, GoalState::FetchingImage)
                | (GoalState::FetchingImage, GoalState::Starting)
                | (GoalState::FetchingImage, GoalState::Failed)
                | (GoalState::Starting, GoalState::Running)
                | (GoalState::Starting, GoalState::Failed)
                | (GoalState::Running, GoalState::Terminated)
                | (GoalState::Running, GoalState::Failed)
                | (GoalState::Failed, GoalState::FetchingImage)
                | (GoalState::Failed, GoalState::WaitingForDependencies)
        )
    }
}

#[derive(Debug, Error)]
#[error("invalid transition from {from} to {to} for goal {goal}")]
pub struct TransitionError {
    pub goal: String,
    pub from: GoalState,
    pub to: GoalState,
}

/// One entry of a goal's transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub status: GoalState,
    pub time: DateTime<Utc>,
}

/// Externally visible status of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub name: String,
    pub status: GoalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

/// Full per-goal snapshot shared between goal tasks through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalSnapshot {
    pub state: GoalState,
    pub exit_code: Option<i64>,
    pub container: Option<ContainerId>,
    pub restarts: u32,
    /// Incremented every time the goal enters `running`.
    pub run_epoch: u64,
}

impl GoalSnapshot {
    pub fn new(state: GoalState) -> Self {
        Self {
            state,
            exit_code: None,
            container: None,
            restarts: 0,
            run_epoch: 0,
        }
    }

    /// Terminated with a zero exit code: the only state that satisfies `run_after`.
    pub fn succeeded(&self) -> bool {
        self.state == GoalState::Terminated && self.exit_code.unwrap_or(0) == 0
    }

    pub fn status(&self, name: &str) -> GoalStatus {
        GoalStatus {
            name: name.to_string(),
            status: self.state,
            exit_code: self.exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_depends_on_dependencies() {
        assert_eq!(GoalState::initial(true), GoalState::WaitingForDependencies);
        assert_eq!(GoalState::initial(false), GoalState::FetchingImage);
    }

    #[test]
    fn test_lifecycle_edges() {
        assert!(GoalState::WaitingForDependencies.can_transition_to(GoalState::FetchingImage));
        assert!(GoalState::Running.can_transition_to(GoalState::Failed));
        assert!(GoalState::Failed.can_transition_to(GoalState::WaitingForDependencies));

        assert!(!GoalState::WaitingForDependencies.can_transition_to(GoalState::Running));
        assert!(!GoalState::Terminated.can_transition_to(GoalState::FetchingImage));
        assert!(!GoalState::Failed.can_transition_to(GoalState::Running));
        assert!(!GoalState::Running.can_transition_to(GoalState::Starting));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let mut snapshot = GoalSnapshot::new(GoalState::WaitingForDependencies);
        let json = serde_json::to_value(snapshot.status("web")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "web", "status": "waiting_for_dependencies"}));

        snapshot.state = GoalState::Failed;
        snapshot.exit_code = Some(3);
        let json = serde_json::to_value(snapshot.status("web")).unwrap();
        assert_eq!(json["exit_code"], 3);
    }

    #[test]
    fn test_only_clean_termination_succeeds() {
        let mut snapshot = GoalSnapshot::new(GoalState::Terminated);
        snapshot.exit_code = Some(0);
        assert!(snapshot.succeeded());

        snapshot.state = GoalState::Failed;
        snapshot.exit_code = Some(1);
        assert!(!snapshot.succeeded());
    }
}
