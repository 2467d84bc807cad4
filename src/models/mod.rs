pub mod interaction_config;
pub mod loaders;
pub mod task;

pub use interaction_config::{CalibrationLock, InteractionConfig};
pub use loaders::load_dataset;
pub use task::{Outcome, Task, TaskStatus, WorkerAssignment};
