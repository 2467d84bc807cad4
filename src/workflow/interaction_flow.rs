//! 单任务交互流程 - 流程层
//!
//! 核心职责：定义"一个任务"的完整交互状态机
//!
//! 状态顺序：
//! 1. Idle → 打开新对话
//! 2. Authenticating →（AwaitingManualLogin）
//! 3. UploadingImage → SubmittingPrompt → WaitingForGeneration
//! 4. ExtractingResult → Saving → Done
//!
//! 任意状态失败都进入 Failed，并且只带一个失败原因。

use anyhow::Result as AnyResult;
use chrono::Local;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppResult, FailureReason};
use crate::infrastructure::engine::{ActionTarget, Locator};
use crate::infrastructure::session::{wait_until, SessionHandle, SessionState, WaitOutcome};
use crate::models::interaction_config::elements;
use crate::models::task::{InvalidTransition, Outcome, Task, Transition};
use crate::models::InteractionConfig;
use crate::services::completion::{detector_for, CompletionDetector, Observation};
use crate::services::resolver::{Resolver, Strategy};
use crate::services::ResultWriter;
use crate::utils::logging::truncate_text;
use crate::workflow::task_ctx::TaskCtx;

/// 交互状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Authenticating,
    AwaitingManualLogin,
    UploadingImage,
    SubmittingPrompt,
    WaitingForGeneration,
    ExtractingResult,
    Saving,
    Done,
    Failed,
}

impl InteractionState {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::Authenticating => "authenticating",
            InteractionState::AwaitingManualLogin => "awaiting_manual_login",
            InteractionState::UploadingImage => "uploading_image",
            InteractionState::SubmittingPrompt => "submitting_prompt",
            InteractionState::WaitingForGeneration => "waiting_for_generation",
            InteractionState::ExtractingResult => "extracting_result",
            InteractionState::Saving => "saving",
            InteractionState::Done => "done",
            InteractionState::Failed => "failed",
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态轨迹与重试计数
#[derive(Debug, Default)]
struct Trace {
    trail: Vec<Transition>,
    retries: u32,
}

impl Trace {
    fn enter(&mut self, ctx: &TaskCtx, state: InteractionState) {
        debug!("{} → {}", ctx, state);
        self.trail.push(Transition {
            state: state.as_str().to_string(),
            at: Local::now(),
        });
    }
}

/// 单任务交互流程
///
/// - 编排一个任务从上传到落盘的全过程
/// - 不持有会话，会话由 worker 借给它
/// - 元素定位只通过 Resolver
pub struct InteractionFlow {
    config: Arc<InteractionConfig>,
    resolver: Resolver,
    writer: Arc<ResultWriter>,
    auth_url: Regex,
}

impl InteractionFlow {
    pub fn new(config: Arc<InteractionConfig>, writer: Arc<ResultWriter>) -> AppResult<Self> {
        let auth_url = config.auth_url_regex()?;
        Ok(Self {
            resolver: Resolver::new(Arc::clone(&config)),
            config,
            writer,
            auth_url,
        })
    }

    /// 处理一个任务，返回最终结果
    ///
    /// 只有任务不处于 pending 时才返回 `Err`。
    pub async fn run(
        &self,
        session: &mut SessionHandle,
        task: &mut Task,
        ctx: &TaskCtx,
        cancel: &CancellationToken,
    ) -> Result<Outcome, InvalidTransition> {
        let started = Instant::now();
        let mut trace = Trace::default();
        trace.enter(ctx, InteractionState::Idle);
        task.start()?;

        info!("{} ▶ 开始处理: {}", ctx, truncate_text(&task.prompt, 40));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            r = self.drive(session, task, ctx, &mut trace, started) => r,
        };

        let processing_secs = started.elapsed().as_secs_f64();
        match result {
            Ok(path) => {
                trace.enter(ctx, InteractionState::Done);
                task.succeed(path.clone())?;
                info!(
                    "{} ✅ 完成 ({:.1}s) → {}",
                    ctx,
                    processing_secs,
                    path.display()
                );
            }
            Err(reason) => {
                trace.enter(ctx, InteractionState::Failed);
                task.fail(reason)?;
                warn!("{} ❌ 失败: {} ({:.1}s)", ctx, reason, processing_secs);
            }
        }

        Ok(Outcome {
            task_id: task.id,
            name: task.name.clone(),
            worker_id: ctx.worker_id,
            status: task.status,
            reason: task.error,
            output_path: task.output_path.clone(),
            retries: trace.retries,
            processing_secs,
            trail: trace.trail,
        })
    }

    async fn drive(
        &self,
        session: &mut SessionHandle,
        task: &Task,
        ctx: &TaskCtx,
        trace: &mut Trace,
        started: Instant,
    ) -> Result<PathBuf, FailureReason> {
        if !matches!(session.state(), SessionState::Degraded(_)) {
            self.open_new_chat(session, ctx).await;
        }

        // ========== 登录 ==========
        trace.enter(ctx, InteractionState::Authenticating);
        self.authenticate(session, ctx, trace).await?;
        let session = &*session;

        // ========== 上传源图 ==========
        trace.enter(ctx, InteractionState::UploadingImage);
        let file = task.source_image.as_path();
        self.act(ctx, trace, elements::ATTACHMENT, FailureReason::UploadError, move |t| async move {
            anyhow::Ok(session.attach_file(&t, file).await?.found())
        })
        .await?;
        info!("{} 📎 源图已上传", ctx);

        // ========== 输入并提交提示词 ==========
        trace.enter(ctx, InteractionState::SubmittingPrompt);
        let prompt = task.prompt.as_str();
        self.act(ctx, trace, elements::TEXTAREA, FailureReason::SubmissionError, move |t| async move {
            anyhow::Ok(session.type_text(&t, prompt).await?.found())
        })
        .await?;

        // 提交前记下生成区域的样子，上传后的源图预览不能被当成生成结果
        let mut detector = detector_for(self.config.completion, self.config.timing.stable_polls);
        if detector.wants_region() {
            if let Some(region) = self.generation_region() {
                let baseline = session
                    .capture_region(&region, self.config.capture)
                    .await
                    .unwrap_or_default();
                detector.set_baseline(&baseline);
            }
        }

        let entered = self
            .act(ctx, trace, elements::TEXTAREA, FailureReason::SubmissionError, move |t| async move {
                anyhow::Ok(session.submit(&t).await?.found())
            })
            .await;
        if entered.is_err() {
            debug!("{} 回车提交失败，改点发送按钮", ctx);
            self.act(ctx, trace, elements::SEND_BUTTON, FailureReason::SubmissionError, move |t| async move {
                anyhow::Ok(session.click(&t).await?.found())
            })
            .await?;
        }
        info!("{} 📨 提示词已提交，等待生成...", ctx);

        // ========== 等待生成 ==========
        trace.enter(ctx, InteractionState::WaitingForGeneration);
        self.await_generation(session, ctx, trace, detector).await?;

        // ========== 提取结果 ==========
        trace.enter(ctx, InteractionState::ExtractingResult);
        let capture = self.config.capture;
        let bytes = self
            .act(ctx, trace, elements::GENERATED_IMAGE, FailureReason::ExtractError, move |t| async move {
                let bytes = session.capture_region(&t, capture).await?;
                anyhow::Ok((!bytes.is_empty()).then_some(bytes))
            })
            .await?;
        debug!("{} 提取到 {} 字节", ctx, bytes.len());

        // ========== 落盘 ==========
        trace.enter(ctx, InteractionState::Saving);
        let path = self.writer.save(task, &bytes)?;
        self.writer
            .write_status(task, &path, started.elapsed().as_secs_f64())?;
        Ok(path)
    }

    /// 每个任务从一个新对话开始
    async fn open_new_chat(&self, session: &SessionHandle, ctx: &TaskCtx) {
        if let Err(e) = session.navigate(&self.config.target_url).await {
            warn!("{} 打开新对话失败: {}", ctx, e);
        }
        let settle = Duration::from_millis(self.config.timing.page_settle_ms);
        if !settle.is_zero() {
            sleep(settle).await;
        }
    }

    async fn authenticate(
        &self,
        session: &mut SessionHandle,
        ctx: &TaskCtx,
        trace: &mut Trace,
    ) -> Result<(), FailureReason> {
        let marker = self
            .resolver
            .resolve(elements::AUTH_MARKER, Strategy::Structural)
            .map_err(|e| {
                warn!("{} {}", ctx, e);
                FailureReason::AuthRequired
            })?;

        match session.state().clone() {
            SessionState::Degraded(reason) => {
                warn!("{} 会话已降级 ({})，无法继续", ctx, reason);
                Err(FailureReason::AuthRequired)
            }
            SessionState::Authenticated => {
                if ctx.verify_auth && !session.probe_authenticated(&marker, &self.auth_url).await {
                    session.mark_degraded("登录状态丢失");
                    return Err(FailureReason::AuthRequired);
                }
                Ok(())
            }
            SessionState::Unauthenticated => {
                if session.probe_authenticated(&marker, &self.auth_url).await {
                    session.mark_authenticated();
                    info!("{} ✓ 已处于登录状态", ctx);
                    return Ok(());
                }

                trace.enter(ctx, InteractionState::AwaitingManualLogin);
                let timing = &self.config.timing;
                info!(
                    "{} 🔐 请在浏览器中手动登录（最多等待 {} 秒）...",
                    ctx,
                    timing.auth_timeout_ms / 1000
                );
                let logged_in = session
                    .await_login(
                        &marker,
                        &self.auth_url,
                        Duration::from_millis(timing.auth_timeout_ms),
                        Duration::from_millis(timing.auth_poll_ms),
                    )
                    .await;
                if logged_in {
                    info!("{} ✓ 登录成功", ctx);
                    Ok(())
                } else {
                    Err(FailureReason::AuthTimeout)
                }
            }
        }
    }

    /// 元素的候选目标：首选策略在前，后备策略在后
    fn targets(&self, element: &str) -> Vec<(Strategy, ActionTarget)> {
        let primary = self.resolver.primary();
        let mut targets = Vec::with_capacity(2);
        if let Ok(target) = self.resolver.resolve_primary(element) {
            targets.push((primary, target));
        }
        if let Some(target) = self.resolver.fallback(element) {
            targets.push((primary.other(), target));
        }
        targets
    }

    /// 轮询用的生成区域：结构化目标只取第一个选择器，避免命中其他图片
    fn generation_region(&self) -> Option<ActionTarget> {
        let (_, target) = self.targets(elements::GENERATED_IMAGE).into_iter().next()?;
        Some(match target {
            ActionTarget::Structural(locator) => ActionTarget::Structural(Locator {
                selectors: locator.selectors.into_iter().take(1).collect(),
            }),
            coordinate => coordinate,
        })
    }

    /// 对元素执行一次原语，带有界重试
    ///
    /// `op` 返回 `Ok(None)` 或出错时换下一个候选目标。
    /// 两种策略都没有配置时直接失败，不重试。
    async fn act<T, F, Fut>(
        &self,
        ctx: &TaskCtx,
        trace: &mut Trace,
        element: &str,
        failure: FailureReason,
        mut op: F,
    ) -> Result<T, FailureReason>
    where
        F: FnMut(ActionTarget) -> Fut,
        Fut: Future<Output = AnyResult<Option<T>>>,
    {
        let targets = self.targets(element);
        if targets.is_empty() {
            warn!("{} 元素 {} 没有任何定位配置", ctx, element);
            return Err(failure);
        }

        let attempts = self.config.retry.resolve_attempts.max(1);
        let backoff = Duration::from_millis(self.config.timing.resolve_backoff_ms);

        for attempt in 1..=attempts {
            if attempt > 1 {
                trace.retries += 1;
                debug!("{} 🔁 {} 第 {}/{} 次尝试", ctx, element, attempt, attempts);
                sleep(backoff).await;
            }

            for (i, (strategy, target)) in targets.iter().enumerate() {
                match op(target.clone()).await {
                    Ok(Some(value)) => {
                        if i > 0 {
                            info!("{} ↪ {} 通过后备策略 ({}) 完成", ctx, element, strategy);
                        }
                        return Ok(value);
                    }
                    Ok(None) => debug!("{} {} 未找到 ({})", ctx, element, strategy),
                    Err(e) => warn!("{} {} 操作出错 ({}): {}", ctx, element, strategy, e),
                }
            }
        }

        warn!("{} ⚠️ {} 尝试 {} 次后仍失败", ctx, element, attempts);
        Err(failure)
    }

    /// 有界轮询生成结果，最多 `generation_retries + 1` 轮
    async fn await_generation(
        &self,
        session: &SessionHandle,
        ctx: &TaskCtx,
        trace: &mut Trace,
        detector: Box<dyn CompletionDetector>,
    ) -> Result<(), FailureReason> {
        let timing = &self.config.timing;
        let marker = self
            .resolver
            .resolve(elements::COMPLETION_MARKER, Strategy::Structural)
            .ok()
            .filter(|_| detector.wants_marker());
        let region = self.generation_region().filter(|_| detector.wants_region());
        let capture = self.config.capture;
        let detector = Mutex::new(detector);

        let wait = Duration::from_millis(timing.generation_wait_ms);
        let interval = Duration::from_millis(timing.poll_interval_ms);
        let cycles = self.config.retry.generation_retries + 1;

        for cycle in 1..=cycles {
            if cycle > 1 {
                trace.retries += 1;
                info!("{} 🔁 生成等待超时，第 {}/{} 轮", ctx, cycle, cycles);
            }
            if let Ok(mut d) = detector.lock() {
                d.reset();
            }

            let (marker, region, detector) = (&marker, &region, &detector);
            let outcome = wait_until(wait, interval, move || async move {
                let observation = Observation {
                    marker_present: match marker {
                        Some(target) => session.is_present(target).await.unwrap_or(false),
                        None => false,
                    },
                    region: match region {
                        Some(target) => session
                            .capture_region(target, capture)
                            .await
                            .unwrap_or_default(),
                        None => Vec::new(),
                    },
                };
                let done = match detector.lock() {
                    Ok(mut d) => d.observe(&observation),
                    Err(_) => false,
                };
                done.then_some(())
            })
            .await;

            if outcome == WaitOutcome::Ready(()) {
                info!("{} ✓ 生成完成", ctx);
                return Ok(());
            }
        }

        Err(FailureReason::GenerationTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(InteractionState::AwaitingManualLogin.to_string(), "awaiting_manual_login");
        assert_eq!(InteractionState::WaitingForGeneration.as_str(), "waiting_for_generation");
    }
}
