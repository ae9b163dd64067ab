pub mod op;
pub mod store;
pub mod views;

pub use op::{OpType, PlanOp};
pub use store::{PlanLog, TaskRow};
pub use views::{GraphView, TaskView};
