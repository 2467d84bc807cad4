//! 任务处理上下文
//!
//! 封装"哪个 worker 正在处理第几个任务"这一信息

use std::fmt::Display;

/// 任务处理上下文
#[derive(Debug, Clone)]
pub struct TaskCtx {
    pub worker_id: usize,

    pub task_id: u64,

    /// 数据目录名（仅用于日志显示）
    pub name: String,

    /// 进入本任务前是否需要重新确认登录状态
    pub verify_auth: bool,
}

impl TaskCtx {
    pub fn new(worker_id: usize, task_id: u64, name: impl Into<String>) -> Self {
        Self {
            worker_id,
            task_id,
            name: name.into(),
            verify_auth: false,
        }
    }

    pub fn with_auth_check(mut self, verify_auth: bool) -> Self {
        self.verify_auth = verify_auth;
        self
    }
}

impl Display for TaskCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[worker {} 任务 #{} {}]",
            self.worker_id, self.task_id, self.name
        )
    }
}
