pub mod monitor;
pub mod supervisor;
pub mod task;

pub use monitor::{LogMonitor, MonitorState, TASK_BASE_LOG_MONITOR, TickOutcome};
pub use supervisor::Supervisor;
pub use task::Task;
