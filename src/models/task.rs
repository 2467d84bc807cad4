//! 任务数据模型
//!
//! 一个 Task 就是一组 (源图, 提示词)，最终一定落在 succeeded / failed 之一。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::FailureReason;

/// 任务状态
///
/// 只允许 `Pending → InProgress → {Succeeded, Failed}` 单向推进，
/// `Pending` 也可以直接进入 `Failed`（例如登录超时、worker 崩溃）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    fn can_advance_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Succeeded)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 非法状态迁移（终态不可逆）
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("非法状态迁移: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// 单个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务编号（从 1 开始，按目录名排序分配）
    pub id: u64,
    /// 数据集中的目录名
    pub name: String,
    /// 源图路径
    pub source_image: PathBuf,
    /// 源图宽度
    pub width: u32,
    /// 源图高度
    pub height: u32,
    pub prompt: String,
    pub status: TaskStatus,
    /// 已尝试次数（每进入一次 InProgress 加一）
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReason>,
}

impl Task {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        source_image: PathBuf,
        (width, height): (u32, u32),
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source_image,
            width,
            height,
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            output_path: None,
            error: None,
        }
    }

    fn advance(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::InProgress)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn succeed(&mut self, output: PathBuf) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Succeeded)?;
        self.output_path = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<(), InvalidTransition> {
        self.advance(TaskStatus::Failed)?;
        self.error = Some(reason);
        Ok(())
    }
}

/// 一个 worker 拥有的任务切片（按处理顺序）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    pub task_ids: Vec<u64>,
}

/// 状态机的一次状态进入记录
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: String,
    pub at: DateTime<Local>,
}

/// 单个任务的最终结果，只用于汇报
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub task_id: u64,
    pub name: String,
    pub worker_id: usize,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// 所有状态内重试次数之和
    pub retries: u32,
    pub processing_secs: f64,
    pub trail: Vec<Transition>,
}

impl Outcome {
    /// 未进入状态机就失败的任务（登录失败、崩溃、取消）
    pub fn failed_without_run(task: &Task, worker_id: usize, reason: FailureReason) -> Self {
        Self {
            task_id: task.id,
            name: task.name.clone(),
            worker_id,
            status: TaskStatus::Failed,
            reason: Some(reason),
            output_path: None,
            retries: 0,
            processing_secs: 0.0,
            trail: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task::new(1, "0001", PathBuf::from("in.jpg"), (64, 48), "make it blue")
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut task = sample();
        task.start().unwrap();
        assert_eq!(task.attempts, 1);
        task.succeed(PathBuf::from("out.png")).unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);

        // 终态之后任何迁移都被拒绝
        assert!(task.fail(FailureReason::Cancelled).is_err());
        assert!(task.start().is_err());
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut task = sample();
        task.fail(FailureReason::AuthTimeout).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error, Some(FailureReason::AuthTimeout));
        assert!(task.succeed(PathBuf::from("x.png")).is_err());
    }

    #[test]
    fn test_pending_cannot_succeed_without_running() {
        let mut task = sample();
        let err = task.succeed(PathBuf::from("x.png")).unwrap_err();
        assert_eq!(err.from, TaskStatus::Pending);
        assert_eq!(err.to, TaskStatus::Succeeded);
    }
}
