// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::goal::{GoalState, TransitionRecord};

/// Append-only history of one goal's states.
#[derive(Debug, Default)]
pub struct TransitionLog {
    records: Mutex<Vec<TransitionRecord>>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, status: GoalState) -> TransitionRecord {
        let record = TransitionRecord {
            status,
            time: Utc::now(),
        };
        self.records.lock().push(record.clone());
        record
    }

    pub fn records(&self) -> Vec<TransitionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_keep_append_order() {
        let log = TransitionLog::new();
        assert!(log.is_empty());

        log.append(GoalState::FetchingImage);
        log.append(GoalState::Starting);
        let last = log.append(GoalState::Running);

        let statuses: Vec<GoalState> = log.records().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![GoalState::FetchingImage, GoalState::Starting, GoalState::Running]
        );
        assert_eq!(log.records().last(), Some(&last));
        assert!(log.records().windows(2).all(|w| w[0].time <= w[1].time));
    }
}
