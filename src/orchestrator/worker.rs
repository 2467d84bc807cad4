//! 单个 worker - 编排层
//!
//! ## 职责
//!
//! 本模块负责一个 worker 的整个生命周期，是切片级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **独占会话**：打开并持有唯一的 SessionHandle，结束时释放
//! 2. **顺序处理**：按分配顺序逐个交给 `InteractionFlow`
//! 3. **登录兜底**：首个任务登录超时则整片失败；中途掉登录则剩余任务失败
//! 4. **即时上报**：每个任务结束立刻通过 channel 上报 Outcome

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::FailureReason;
use crate::infrastructure::engine::EngineFactory;
use crate::infrastructure::session::{ActionPacing, SessionHandle, SessionState};
use crate::models::task::{Outcome, Task};
use crate::utils::logging::{log_worker_complete, log_worker_start};
use crate::workflow::{InteractionFlow, TaskCtx};

/// 所有 worker 共享的只读依赖
pub struct WorkerShared {
    pub flow: InteractionFlow,
    pub factory: Arc<dyn EngineFactory>,
    pub pacing: ActionPacing,
    /// 每处理多少个任务重新确认一次登录，0 表示不检查
    pub reauth_check_every: usize,
    pub cancel: CancellationToken,
}

/// worker 结束时的汇总
#[derive(Debug, Default, Clone)]
pub struct WorkerSummary {
    pub worker_id: usize,
    /// 首个任务前没能进入已登录状态（含会话打不开）
    pub auth_failed: bool,
    pub succeeded: usize,
    pub total: usize,
}

/// 运行一个 worker
///
/// # 参数
/// - `worker_id`: worker 编号
/// - `tasks`: 分配给该 worker 的任务（按处理顺序）
/// - `shared`: 共享依赖
/// - `outcomes`: 结果上报通道
pub async fn run_worker(
    worker_id: usize,
    tasks: Vec<Task>,
    shared: Arc<WorkerShared>,
    outcomes: UnboundedSender<Outcome>,
) -> WorkerSummary {
    let mut summary = WorkerSummary {
        worker_id,
        total: tasks.len(),
        ..Default::default()
    };
    let (Some(first), Some(last)) = (tasks.first(), tasks.last()) else {
        return summary;
    };
    log_worker_start(worker_id, first.id, last.id, tasks.len());

    let report = |outcome: Outcome| {
        if outcomes.send(outcome).is_err() {
            warn!("[worker {}] 结果通道已关闭", worker_id);
        }
    };

    let engine = match shared.factory.open(worker_id).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("[worker {}] ❌ 打开会话失败: {:#}", worker_id, e);
            summary.auth_failed = true;
            for task in &tasks {
                report(Outcome::failed_without_run(task, worker_id, FailureReason::WorkerCrash));
            }
            return summary;
        }
    };
    let mut session = SessionHandle::new(worker_id, engine, shared.pacing);

    let mut remaining = tasks.into_iter().enumerate();
    while let Some((index, mut task)) = remaining.next() {
        if shared.cancel.is_cancelled() {
            report(Outcome::failed_without_run(&task, worker_id, FailureReason::Cancelled));
            continue;
        }
        if let SessionState::Degraded(reason) = session.state() {
            warn!("[worker {}] 任务 #{} 跳过：会话已降级 ({})", worker_id, task.id, reason);
            report(Outcome::failed_without_run(&task, worker_id, FailureReason::AuthRequired));
            continue;
        }

        let verify_auth = shared.reauth_check_every > 0
            && index > 0
            && index % shared.reauth_check_every == 0;
        let ctx = TaskCtx::new(worker_id, task.id, task.name.as_str()).with_auth_check(verify_auth);

        let outcome = match shared.flow.run(&mut session, &mut task, &ctx, &shared.cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} 状态异常: {}", ctx, e);
                Outcome::failed_without_run(&task, worker_id, FailureReason::WorkerCrash)
            }
        };
        let auth_timed_out = outcome.reason == Some(FailureReason::AuthTimeout);
        if outcome.succeeded() {
            summary.succeeded += 1;
        }
        report(outcome);

        if auth_timed_out {
            error!("[worker {}] 🔐 登录超时，放弃该 worker 的全部任务", worker_id);
            summary.auth_failed = true;
            for (_, task) in remaining.by_ref() {
                report(Outcome::failed_without_run(&task, worker_id, FailureReason::AuthTimeout));
            }
        }
    }

    session.release().await;
    log_worker_complete(worker_id, summary.succeeded, summary.total);
    info!("[worker {}] 👋 已退出", worker_id);
    summary
}
