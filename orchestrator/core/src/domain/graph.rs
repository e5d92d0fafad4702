// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dependency graph over the goals of one application, keyed by goal index.
//!
//! Edges point from a goal to what it depends on (`run_after` and `links`);
//! every node also keeps the reverse edges (`observers`) so that a transition
//! can be fanned out to exactly the goals that care about it.

use crate::domain::application::{ConfigurationError, GoalTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    pub run_after: Vec<usize>,
    pub links: Vec<usize>,
    pub observers: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn push_unique(list: &mut Vec<usize>, value: usize) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl DependencyGraph {
    /// Builds the graph, rejecting unknown references and cycles.
    pub fn build(goals: &GoalTable) -> Result<Self, ConfigurationError> {
        let mut nodes: Vec<DependencyNode> = goals
            .names()
            .map(|name| DependencyNode {
                name: name.to_string(),
                ..Default::default()
            })
            .collect();

        for (index, (name, spec)) in goals.iter().enumerate() {
            for target in &spec.run_after {
                let target_index = goals.index_of(target).ok_or_else(|| {
                    ConfigurationError::UnknownRunAfter {
                        goal: name.to_string(),
                        target: target.clone(),
                    }
                })?;
                push_unique(&mut nodes[index].run_after, target_index);
            }
            for link in spec.linked_goals() {
                let target_index = goals.index_of(&link.name).ok_or_else(|| {
                    ConfigurationError::UnknownLink {
                        goal: name.to_string(),
                        target: link.name.clone(),
                    }
                })?;
                push_unique(&mut nodes[index].links, target_index);
            }
        }

        for index in 0..nodes.len() {
            let dependencies: Vec<usize> = nodes[index]
                .run_after
                .iter()
                .chain(nodes[index].links.iter())
                .copied()
                .collect();
            for dependency in dependencies {
                push_unique(&mut nodes[dependency].observers, index);
            }
        }

        let graph = Self { nodes };
        if let Some(cycle) = graph.find_cycle() {
            return Err(ConfigurationError::CircularDependency(cycle));
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &DependencyNode {
        &self.nodes[index]
    }

    pub fn observers(&self, index: usize) -> &[usize] {
        &self.nodes[index].observers
    }

    fn dependencies(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let node = &self.nodes[index];
        node.run_after.iter().chain(node.links.iter()).copied()
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        (0..self.nodes.len()).find_map(|start| self.visit(start, &mut marks, &mut path))
    }

    fn visit(&self, index: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
        match marks[index] {
            Mark::Done => return None,
            Mark::InProgress => {
                let start = path.iter().position(|&p| p == index)?;
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&i| self.nodes[i].name.clone())
                    .collect();
                cycle.push(self.nodes[index].name.clone());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }

        marks[index] = Mark::InProgress;
        path.push(index);
        let dependencies: Vec<usize> = self.dependencies(index).collect();
        for dependency in dependencies {
            if let Some(cycle) = self.visit(dependency, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks[index] = Mark::Done;
        None
    }
}
