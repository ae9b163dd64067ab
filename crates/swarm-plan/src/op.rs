use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use swarm_core::types::{AgentId, Lamport, TaskId, ThreadId, TimestampNs};
use swarm_core::now_ns;

/// Kinds of plan operation. Ops are facts: once appended they are never
/// deleted, and every derived view is a fold over them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    AddTask,
    Requires,
    Produces,
    State,
    Link,
    Annotate,
}

/// Single CRDT operation in the plan log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanOp {
    pub op_id: String,
    pub thread_id: ThreadId,
    pub lamport: Lamport,
    pub actor_id: AgentId,
    pub op_type: OpType,
    pub task_id: TaskId,
    pub payload: Value,
    pub ts_ns: TimestampNs,
}

impl PlanOp {
    /// Build an op with a fresh id and the current wall clock.
    pub fn new(
        thread_id: impl Into<ThreadId>,
        lamport: Lamport,
        actor_id: impl Into<AgentId>,
        op_type: OpType,
        task_id: impl Into<TaskId>,
        payload: Value,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            lamport,
            actor_id: actor_id.into(),
            op_type,
            task_id: task_id.into(),
            payload,
            ts_ns: now_ns(),
        }
    }
}
