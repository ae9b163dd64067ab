//! Query views over the derived plan state.
//!
//! `TaskView` indexes tasks for the common lookups; `GraphView` answers
//! dependency questions over the edge set. Both are snapshots: build them
//! from the log, query, throw away.

use std::collections::{HashMap, HashSet, VecDeque};

use swarm_core::types::{TaskId, TaskState};

use crate::store::TaskRow;

/// Materialized task index.
pub struct TaskView {
    tasks: HashMap<TaskId, TaskRow>,
    by_state: HashMap<TaskState, HashSet<TaskId>>,
    by_thread: HashMap<String, HashSet<TaskId>>,
}

impl TaskView {
    pub fn new(rows: Vec<TaskRow>) -> Self {
        let mut tasks = HashMap::new();
        let mut by_state: HashMap<TaskState, HashSet<TaskId>> = HashMap::new();
        let mut by_thread: HashMap<String, HashSet<TaskId>> = HashMap::new();
        for row in rows {
            by_state.entry(row.state).or_default().insert(row.task_id.clone());
            by_thread
                .entry(row.thread_id.clone())
                .or_default()
                .insert(row.task_id.clone());
            tasks.insert(row.task_id.clone(), row);
        }
        Self {
            tasks,
            by_state,
            by_thread,
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<&TaskRow> {
        self.tasks.get(task_id)
    }

    pub fn tasks_by_state(&self, state: TaskState) -> Vec<&TaskRow> {
        self.by_state
            .get(&state)
            .map(|ids| ids.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn tasks_by_thread(&self, thread_id: &str) -> Vec<&TaskRow> {
        self.by_thread
            .get(thread_id)
            .map(|ids| ids.iter().filter_map(|id| self.tasks.get(id)).collect())
            .unwrap_or_default()
    }

    /// Tasks that can execute now: DRAFT with every parent VERIFIED or
    /// FINAL.
    pub fn ready_tasks(&self, graph: &GraphView) -> Vec<&TaskRow> {
        self.tasks_by_state(TaskState::Draft)
            .into_iter()
            .filter(|task| {
                graph.parents(&task.task_id).iter().all(|parent| {
                    matches!(
                        self.tasks.get(parent).map(|t| t.state),
                        None | Some(TaskState::Verified) | Some(TaskState::Final)
                    )
                })
            })
            .collect()
    }

    pub fn count_by_state(&self) -> HashMap<TaskState, usize> {
        self.by_state.iter().map(|(s, ids)| (*s, ids.len())).collect()
    }
}

/// Dependency-graph view: traversal, topological order, cycle detection.
pub struct GraphView {
    children: HashMap<TaskId, Vec<TaskId>>,
    parents: HashMap<TaskId, Vec<TaskId>>,
}

impl GraphView {
    pub fn new(edges: &[(String, String)]) -> Self {
        let mut children: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut parents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for (parent, child) in edges {
            children.entry(parent.clone()).or_default().push(child.clone());
            parents.entry(child.clone()).or_default().push(parent.clone());
        }
        Self { children, parents }
    }

    pub fn children(&self, task_id: &str) -> &[TaskId] {
        self.children.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, task_id: &str) -> &[TaskId] {
        self.parents.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn all_nodes(&self) -> HashSet<TaskId> {
        self.children
            .keys()
            .chain(self.parents.keys())
            .cloned()
            .collect()
    }

    /// Transitive parents of `task_id`.
    pub fn ancestors(&self, task_id: &str) -> HashSet<TaskId> {
        self.walk(task_id, |id| self.parents(id))
    }

    /// Transitive children of `task_id`.
    pub fn descendants(&self, task_id: &str) -> HashSet<TaskId> {
        self.walk(task_id, |id| self.children(id))
    }

    fn walk<'a, F>(&'a self, start: &str, next: F) -> HashSet<TaskId>
    where
        F: Fn(&str) -> &'a [TaskId],
    {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TaskId> = next(start).iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current.clone()) {
                queue.extend(next(&current).iter().cloned());
            }
        }
        seen
    }

    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        self.descendants(from).contains(to)
    }

    /// Kahn's algorithm. Errors if the graph has a cycle.
    pub fn topological_sort(&self) -> Result<Vec<TaskId>, String> {
        let nodes = self.all_nodes();
        let mut in_degree: HashMap<&TaskId, usize> =
            nodes.iter().map(|n| (n, self.parents(n).len())).collect();

        let mut queue: VecDeque<&TaskId> = {
            let mut roots: Vec<&TaskId> = in_degree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(n, _)| *n)
                .collect();
            roots.sort(); // deterministic order
            roots.into_iter().collect()
        };

        let mut result = Vec::new();
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());
            for child in self.children(node) {
                if let Some(d) = in_degree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if result.len() != nodes.len() {
            return Err("graph contains a cycle".into());
        }
        Ok(result)
    }

    /// DFS cycle scan. Returns one witness path per cycle found.
    pub fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        for node in self.all_nodes() {
            if !visited.contains(&node) {
                let mut stack = HashSet::new();
                let mut path = Vec::new();
                self.dfs_cycles(&node, &mut visited, &mut stack, &mut path, &mut cycles);
            }
        }
        cycles
    }

    fn dfs_cycles(
        &self,
        node: &TaskId,
        visited: &mut HashSet<TaskId>,
        stack: &mut HashSet<TaskId>,
        path: &mut Vec<TaskId>,
        cycles: &mut Vec<Vec<TaskId>>,
    ) -> bool {
        visited.insert(node.clone());
        stack.insert(node.clone());
        path.push(node.clone());

        for child in self.children(node) {
            if !visited.contains(child) {
                if self.dfs_cycles(child, visited, stack, path, cycles) {
                    return true;
                }
            } else if stack.contains(child) {
                if let Some(start) = path.iter().position(|n| n == child) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(child.clone());
                    cycles.push(cycle);
                }
                return true;
            }
        }

        path.pop();
        stack.remove(node);
        false
    }

    pub fn root_tasks(&self) -> Vec<TaskId> {
        let mut roots: Vec<TaskId> = self
            .all_nodes()
            .into_iter()
            .filter(|n| self.parents(n).is_empty())
            .collect();
        roots.sort();
        roots
    }

    pub fn leaf_tasks(&self) -> Vec<TaskId> {
        let mut leaves: Vec<TaskId> = self
            .all_nodes()
            .into_iter()
            .filter(|n| self.children(n).is_empty())
            .collect();
        leaves.sort();
        leaves
    }
}
