//! # Image Prompt Runner
//!
//! 一个用浏览器会话批量执行"源图 + 提示词 → 生成图"的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Browser / Page），只暴露能力
//! - `AutomationEngine` - 引擎能力接口（导航、上传、输入、点击、截图）
//! - `ChromeEngine` - chromiumoxide 实现，唯一的 page owner
//! - `SessionHandle` - 每个 worker 独占的会话，持有登录状态
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个元素或单个任务
//! - `Resolver` - 元素名 → 选择器或坐标
//! - `CompletionDetector` - "生成完成"判定
//! - `ResultWriter` - 解码、缩放、落盘
//! - `Calibrator` - 坐标标定
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个任务"的完整处理流程
//! - `TaskCtx` - 上下文封装（worker + 任务编号）
//! - `InteractionFlow` - 状态机（登录 → 上传 → 提交 → 等待 → 提取 → 保存）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pool` - Worker 池，切分任务并管理并发
//! - `orchestrator/worker` - 单个 worker，按顺序处理自己的切片
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, FailureReason};
pub use infrastructure::{AutomationEngine, EngineFactory, SessionHandle};
pub use models::{InteractionConfig, Outcome, Task, TaskStatus};
pub use orchestrator::{App, RunReport, WorkerPool};
pub use workflow::{InteractionFlow, InteractionState, TaskCtx};
