// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-goal resource usage history, fed from the engine's stats stream while
//! the goal's container runs. History outlives the container.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::driver::{ContainerDriver, ContainerId};
use crate::domain::stats::{StatSample, StatsSeries};

#[derive(Debug, Default)]
struct StatsBuffer {
    samples: Vec<StatSample>,
    latest: Option<Value>,
}

#[derive(Debug, Default)]
pub struct StatsCollector {
    buffer: Mutex<StatsBuffer>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers one raw engine sample. Documents without a `read` timestamp are ignored.
    pub fn record(&self, raw: Value) {
        let Some(sample) = StatSample::from_engine(&raw) else {
            debug!("Ignoring stats document without read timestamp");
            return;
        };
        let mut buffer = self.buffer.lock();
        let position = buffer.samples.partition_point(|s| s.time <= sample.time);
        buffer.samples.insert(position, sample);
        buffer.latest = Some(raw);
    }

    /// All buffered samples, or those at or after `since`.
    pub fn series(&self, since: Option<DateTime<Utc>>) -> StatsSeries {
        let buffer = self.buffer.lock();
        let start = since
            .map(|since| buffer.samples.partition_point(|s| s.time < since))
            .unwrap_or(0);
        StatsSeries::from_samples(&buffer.samples[start..])
    }

    /// Most recently received raw sample, including its `read` field.
    pub fn current(&self) -> Option<Value> {
        self.buffer.lock().latest.clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().samples.is_empty()
    }

    /// Consumes the container's stats stream on its own task until the stream
    /// ends, errors or `cancel` fires.
    pub fn spawn_collection(
        self: &Arc<Self>,
        driver: Arc<dyn ContainerDriver>,
        container: ContainerId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = tokio::select! {
                _ = cancel.cancelled() => return,
                stream = driver.stats(&container) => match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!(container = %container, "Stats stream unavailable: {}", e);
                        return;
                    }
                },
            };

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(raw)) => collector.record(raw),
                    Some(Err(e)) => {
                        debug!(container = %container, "Stats stream failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            debug!(container = %container, "Stats collection stopped");
        })
    }
}
