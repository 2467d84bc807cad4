//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务切分和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pool` - Worker 池
//! - 管理应用生命周期（加载配置、加载数据集、写报告）
//! - 一次性切分任务（`partition`）
//! - 每个 worker 一个 tokio 任务，独占一个会话
//! - 运行超时 / Ctrl-C 取消
//! - 汇总全局结果（`report`）
//!
//! ### `worker` - 单个 worker
//! - 按顺序处理自己的切片（Vec<Task>）
//! - 复用同一个 SessionHandle
//! - 登录失败 / 会话降级时整片兜底
//!
//! ## 层次关系
//!
//! ```text
//! pool (处理 Vec<Task>，切成 N 片)
//!     ↓
//! worker (处理一个切片)
//!     ↓
//! workflow::InteractionFlow (处理单个 Task)
//!     ↓
//! services (能力层：resolver / completion / result_writer)
//!     ↓
//! infrastructure (基础设施：SessionHandle / AutomationEngine)
//! ```

pub mod partition;
pub mod pool;
pub mod report;
pub mod worker;

// 重新导出主要类型
pub use partition::partition;
pub use pool::{App, PoolRun, WorkerPool};
pub use report::{RunReport, RunStats};
pub use worker::{run_worker, WorkerShared, WorkerSummary};
