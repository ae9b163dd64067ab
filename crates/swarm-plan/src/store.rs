use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use swarm_core::types::{Lamport, TaskId, TaskState, ThreadId};
use swarm_core::SwarmError;

use crate::op::{OpType, PlanOp};

/// Derived view row for one task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskRow {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
    pub task_type: Option<String>,
    pub state: TaskState,
    pub last_lamport: Lamport,
}

/// Latest-writer-wins cell for one annotation key.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct AnnotationCell {
    lamport: Lamport,
    op_id: String,
    value: Value,
}

/// Append-only CRDT op log with derived task / edge / annotation views.
///
/// Named trees:
///   ops         — op_id bytes                    → json(PlanOp)
///   order       — thread \0 lamport_be \0 op_id  → op_id (replay index)
///   tasks       — task_id bytes                  → bincode(TaskRow)
///   edges       — parent \0 child                → [] (membership set)
///   annotations — task_id \0 key                 → json(AnnotationCell)
///
/// Every apply rule is idempotent (insert-or-ignore, monotonic update,
/// last-writer-wins), so a crashed append can be retried with the same
/// op_id without corrupting the views. An async mutex serializes writers so
/// async handlers never contend on blocking storage.
pub struct PlanLog {
    _db: sled::Db,
    ops: sled::Tree,
    order: sled::Tree,
    tasks: sled::Tree,
    edges: sled::Tree,
    annotations: sled::Tree,
    write_lock: Mutex<()>,
}

fn storage(e: sled::Error) -> SwarmError {
    SwarmError::Storage(e.to_string())
}

impl PlanLog {
    /// Open or create the plan log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::open(path).map_err(storage)?;
        let ops = db.open_tree("ops").map_err(storage)?;
        let order = db.open_tree("order").map_err(storage)?;
        let tasks = db.open_tree("tasks").map_err(storage)?;
        let edges = db.open_tree("edges").map_err(storage)?;
        let annotations = db.open_tree("annotations").map_err(storage)?;
        Ok(Self {
            _db: db,
            ops,
            order,
            tasks,
            edges,
            annotations,
            write_lock: Mutex::new(()),
        })
    }

    // ── Append ───────────────────────────────────────────────────────────────

    /// Append an op and fold it into the derived views. Idempotent on
    /// `op_id`: a duplicate append is a no-op returning `false`.
    pub async fn append_op(&self, op: &PlanOp) -> Result<bool, SwarmError> {
        let _guard = self.write_lock.lock().await;

        if self.ops.contains_key(op.op_id.as_bytes()).map_err(storage)? {
            debug!(op_id = %op.op_id, "duplicate op ignored");
            return Ok(false);
        }

        // The op row is written last: every earlier write (views, replay
        // index) is idempotent, so a crash mid-append is repaired by
        // retrying with the same op_id.
        self.apply_op(op)?;
        self.order
            .insert(order_key(&op.thread_id, op.lamport, &op.op_id), op.op_id.as_bytes())
            .map_err(storage)?;

        let bytes = serde_json::to_vec(op)?;
        self.ops.insert(op.op_id.as_bytes(), bytes).map_err(storage)?;
        self._db.flush().map_err(storage)?;
        Ok(true)
    }

    fn apply_op(&self, op: &PlanOp) -> Result<(), SwarmError> {
        match op.op_type {
            OpType::AddTask => {
                if self.tasks.get(op.task_id.as_bytes()).map_err(storage)?.is_none() {
                    let row = TaskRow {
                        task_id: op.task_id.clone(),
                        thread_id: op.thread_id.clone(),
                        task_type: op.payload["type"].as_str().map(String::from),
                        state: TaskState::Draft,
                        last_lamport: op.lamport,
                    };
                    self.put_task(&row)?;
                }
            }
            OpType::State => {
                let mut row = match self.read_task(&op.task_id)? {
                    Some(row) => row,
                    None => TaskRow {
                        task_id: op.task_id.clone(),
                        thread_id: op.thread_id.clone(),
                        task_type: None,
                        state: TaskState::Draft,
                        last_lamport: 0,
                    },
                };
                // Monotonic: only a strictly newer lamport advances state.
                if row.last_lamport < op.lamport {
                    if let Some(state) =
                        op.payload["state"].as_str().and_then(TaskState::parse)
                    {
                        row.state = state;
                        row.last_lamport = op.lamport;
                    }
                }
                self.put_task(&row)?;
            }
            OpType::Link => {
                if let (Some(parent), Some(child)) =
                    (op.payload["parent"].as_str(), op.payload["child"].as_str())
                {
                    self.edges
                        .insert(edge_key(parent, child), &[][..])
                        .map_err(storage)?;
                }
            }
            OpType::Annotate => {
                if let Value::Object(map) = &op.payload {
                    for (key, value) in map {
                        self.apply_annotation(&op.task_id, key, value, op.lamport, &op.op_id)?;
                    }
                }
            }
            // Recorded as ops; the views expose them through annotations on
            // demand rather than dedicated tables.
            OpType::Requires | OpType::Produces => {}
        }
        Ok(())
    }

    fn apply_annotation(
        &self,
        task_id: &str,
        key: &str,
        value: &Value,
        lamport: Lamport,
        op_id: &str,
    ) -> Result<(), SwarmError> {
        let cell_key = annotation_key(task_id, key);
        let replace = match self.annotations.get(&cell_key).map_err(storage)? {
            Some(existing) => {
                let cell: AnnotationCell = serde_json::from_slice(&existing)?;
                // Last writer wins in (lamport, op_id) order — the op_id
                // tiebreak keeps concurrent equal-lamport writes convergent.
                (lamport, op_id) > (cell.lamport, cell.op_id.as_str())
            }
            None => true,
        };
        if replace {
            let cell = AnnotationCell {
                lamport,
                op_id: op_id.to_string(),
                value: value.clone(),
            };
            self.annotations
                .insert(cell_key, serde_json::to_vec(&cell)?)
                .map_err(storage)?;
        }
        Ok(())
    }

    /// Record an ANNOTATE op setting every key of `fields` on `task_id`.
    pub async fn annotate_task(
        &self,
        task_id: &str,
        thread_id: &str,
        lamport: Lamport,
        actor_id: &str,
        fields: Value,
    ) -> Result<(), SwarmError> {
        let op = PlanOp::new(thread_id, lamport, actor_id, OpType::Annotate, task_id, fields);
        self.append_op(&op).await?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Current derived state of one task.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRow>, SwarmError> {
        self.read_task(task_id)
    }

    /// All ops for a thread, ordered by (lamport, op_id) ascending. This is
    /// the canonical replay order.
    pub async fn get_ops_for_thread(&self, thread_id: &str) -> Result<Vec<PlanOp>, SwarmError> {
        let mut prefix = thread_id.as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.order.scan_prefix(&prefix) {
            let (_, op_id) = item.map_err(storage)?;
            if let Some(bytes) = self.ops.get(&op_id).map_err(storage)? {
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }

    /// All derived task rows for a thread.
    pub async fn tasks_for_thread(&self, thread_id: &str) -> Result<Vec<TaskRow>, SwarmError> {
        let mut out = Vec::new();
        for item in self.tasks.iter() {
            let (_, bytes) = item.map_err(storage)?;
            let row: TaskRow =
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?;
            if row.thread_id == thread_id {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// All edges in the derived graph.
    pub async fn get_edges(&self) -> Result<Vec<(String, String)>, SwarmError> {
        let mut out = Vec::new();
        for item in self.edges.iter() {
            let (key, _) = item.map_err(storage)?;
            if let Some(pos) = key.iter().position(|b| *b == 0) {
                let parent = String::from_utf8_lossy(&key[..pos]).into_owned();
                let child = String::from_utf8_lossy(&key[pos + 1..]).into_owned();
                out.push((parent, child));
            }
        }
        Ok(out)
    }

    /// Latest annotation value per key for one task.
    pub async fn get_annotations(&self, task_id: &str) -> Result<BTreeMap<String, Value>, SwarmError> {
        let mut prefix = task_id.as_bytes().to_vec();
        prefix.push(0);
        let mut out = BTreeMap::new();
        for item in self.annotations.scan_prefix(&prefix) {
            let (key, bytes) = item.map_err(storage)?;
            let cell: AnnotationCell = serde_json::from_slice(&bytes)?;
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            out.insert(name, cell.value);
        }
        Ok(out)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn read_task(&self, task_id: &str) -> Result<Option<TaskRow>, SwarmError> {
        match self.tasks.get(task_id.as_bytes()).map_err(storage)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SwarmError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn put_task(&self, row: &TaskRow) -> Result<(), SwarmError> {
        let bytes =
            bincode::serialize(row).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        self.tasks.insert(row.task_id.as_bytes(), bytes).map_err(storage)?;
        Ok(())
    }
}

fn order_key(thread_id: &str, lamport: Lamport, op_id: &str) -> Vec<u8> {
    let mut key = thread_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&lamport.to_be_bytes());
    key.push(0);
    key.extend_from_slice(op_id.as_bytes());
    key
}

fn edge_key(parent: &str, child: &str) -> Vec<u8> {
    let mut key = parent.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(child.as_bytes());
    key
}

fn annotation_key(task_id: &str, name: &str) -> Vec<u8> {
    let mut key = task_id.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(name.as_bytes());
    key
}
