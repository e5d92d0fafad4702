// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::goal::GoalState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApplicationEvent {
    ApplicationCreated {
        application: String,
        main_goal: String,
        goals: Vec<String>,
        created_at: DateTime<Utc>,
    },
    ApplicationDeleted {
        application: String,
        deleted_at: DateTime<Utc>,
    },
}

/// Per-goal lifecycle events, streamed to API clients as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GoalEvent {
    GoalTransitioned {
        application: String,
        goal: String,
        from: GoalState,
        to: GoalState,
        exit_code: Option<i64>,
        transitioned_at: DateTime<Utc>,
    },
    ContainerCreated {
        application: String,
        goal: String,
        container_id: String,
        created_at: DateTime<Utc>,
    },
    GoalRestarting {
        application: String,
        goal: String,
        restarts: u32,
        restarting_at: DateTime<Utc>,
    },
}

impl GoalEvent {
    pub fn application(&self) -> &str {
        match self {
            GoalEvent::GoalTransitioned { application, .. }
            | GoalEvent::ContainerCreated { application, .. }
            | GoalEvent::GoalRestarting { application, .. } => application,
        }
    }
}
