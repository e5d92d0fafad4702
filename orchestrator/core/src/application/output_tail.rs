// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::driver::{ContainerDriver, ContainerId};

/// Chunks of container output kept per goal.
pub const TAIL_CAPACITY: usize = 400;

/// Bounded tail of a goal's stdout/stderr across all of its containers.
#[derive(Debug, Default)]
pub struct OutputTail {
    chunks: Mutex<VecDeque<String>>,
}

impl OutputTail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: impl Into<String>) {
        let mut chunks = self.chunks.lock();
        if chunks.len() == TAIL_CAPACITY {
            chunks.pop_front();
        }
        chunks.push_back(chunk.into());
    }

    pub fn text(&self) -> String {
        self.chunks.lock().iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Follows the container's output until it closes or `cancel` fires.
    pub fn spawn_follow(
        self: &Arc<Self>,
        driver: Arc<dyn ContainerDriver>,
        container: ContainerId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tail = Arc::clone(self);
        tokio::spawn(async move {
            tail.push("----------\n");
            tail.push(format!("Container with ID {:?} started\n", container.as_str()));

            let mut stream = tokio::select! {
                _ = cancel.cancelled() => return,
                stream = driver.logs(&container) => match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tail.push(format!("Could not tail output: {}\n", e));
                        return;
                    }
                },
            };

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(bytes)) => tail.push(String::from_utf8_lossy(&bytes).into_owned()),
                    Some(Err(e)) => {
                        tail.push(format!("Could not tail output: {}\n", e));
                        return;
                    }
                    None => {
                        tail.push("output closed...\n");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_latest_chunks() {
        let tail = OutputTail::new();
        for i in 0..(TAIL_CAPACITY + 10) {
            tail.push(format!("{}\n", i));
        }
        assert_eq!(tail.len(), TAIL_CAPACITY);
        let text = tail.text();
        assert!(text.starts_with("10\n"));
        assert!(text.ends_with(&format!("{}\n", TAIL_CAPACITY + 9)));
    }
}
