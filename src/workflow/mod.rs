pub mod interaction_flow;
pub mod task_ctx;

pub use interaction_flow::{InteractionFlow, InteractionState};
pub use task_ctx::TaskCtx;
