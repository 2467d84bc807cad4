//! Session Handle - 基础设施层
//!
//! 每个 worker 独占一个会话：持有引擎、登录状态和操作节奏。
//! 登录状态只能通过这里的显式方法改变。

use anyhow::Result;
use rand::Rng;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::infrastructure::engine::{ActionTarget, AutomationEngine, PrimitiveOutcome};
use crate::models::interaction_config::{CaptureSize, Coordinate};

/// 会话登录状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Degraded(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Degraded(reason) => write!(f, "degraded({})", reason),
        }
    }
}

/// 操作之间的随机停顿
#[derive(Debug, Clone, Copy)]
pub struct ActionPacing {
    pub min: Duration,
    pub max: Duration,
}

impl ActionPacing {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms.min(max_ms)),
            max: Duration::from_millis(max_ms.max(min_ms)),
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }
}

/// 有界等待的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
}

/// 按固定间隔轮询，直到 `probe` 返回 `Some` 或超时
///
/// 至少轮询一次；超时是硬上限。
pub async fn wait_until<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> WaitOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return WaitOutcome::Ready(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// 单个会话
pub struct SessionHandle {
    worker_id: usize,
    engine: Box<dyn AutomationEngine>,
    state: SessionState,
    pacing: ActionPacing,
}

impl SessionHandle {
    pub fn new(worker_id: usize, engine: Box<dyn AutomationEngine>, pacing: ActionPacing) -> Self {
        Self {
            worker_id,
            engine,
            state: SessionState::Unauthenticated,
            pacing,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn mark_authenticated(&mut self) {
        debug!("[worker {}] 会话状态: {} → authenticated", self.worker_id, self.state);
        self.state = SessionState::Authenticated;
    }

    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("[worker {}] ⚠️ 会话降级: {}", self.worker_id, reason);
        self.state = SessionState::Degraded(reason);
    }

    /// 当前页面是否处于已登录界面
    ///
    /// URL 命中登录页正则视为未登录；否则以登录标记元素是否存在为准。
    pub async fn probe_authenticated(&self, marker: &ActionTarget, auth_url: &Regex) -> bool {
        match self.engine.current_url().await {
            Ok(Some(url)) if auth_url.is_match(&url) => return false,
            Ok(_) => {}
            Err(e) => {
                debug!("[worker {}] 读取当前 URL 失败: {}", self.worker_id, e);
                return false;
            }
        }
        self.engine.is_present(marker).await.unwrap_or(false)
    }

    /// 等待操作员手动登录，成功后标记为已登录
    pub async fn await_login(
        &mut self,
        marker: &ActionTarget,
        auth_url: &Regex,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        let handle = &*self;
        let outcome = wait_until(timeout, interval, move || async move {
            handle.probe_authenticated(marker, auth_url).await.then_some(())
        })
        .await;
        match outcome {
            WaitOutcome::Ready(()) => {
                self.mark_authenticated();
                true
            }
            WaitOutcome::TimedOut => false,
        }
    }

    async fn pace(&self) {
        let delay = self.pacing.next_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.engine.navigate(url).await
    }

    pub async fn attach_file(&self, target: &ActionTarget, file: &Path) -> Result<PrimitiveOutcome> {
        self.pace().await;
        self.engine.attach_file(target, file).await
    }

    pub async fn type_text(&self, target: &ActionTarget, text: &str) -> Result<PrimitiveOutcome> {
        self.pace().await;
        self.engine.type_text(target, text).await
    }

    pub async fn submit(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        self.pace().await;
        self.engine.submit(target).await
    }

    pub async fn click(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        self.pace().await;
        self.engine.click(target).await
    }

    pub async fn is_present(&self, target: &ActionTarget) -> Result<bool> {
        self.engine.is_present(target).await
    }

    pub async fn capture_region(&self, target: &ActionTarget, size: CaptureSize) -> Result<Vec<u8>> {
        self.engine.capture_region(target, size).await
    }

    /// 等待操作员点击一次，返回点击位置
    pub async fn await_pointer_click(&self, timeout: Duration, interval: Duration) -> Result<Option<Coordinate>> {
        self.engine.arm_pointer_capture().await?;
        let engine = self.engine.as_ref();
        let outcome = wait_until(timeout, interval, move || async move {
            engine.take_pointer_capture().await.ok().flatten()
        })
        .await;
        Ok(match outcome {
            WaitOutcome::Ready(c) => Some(c),
            WaitOutcome::TimedOut => None,
        })
    }

    /// 释放会话（关闭浏览器）
    pub async fn release(self) {
        if let Err(e) = self.engine.close().await {
            warn!("[worker {}] 关闭会话失败: {}", self.worker_id, e);
        } else {
            debug!("[worker {}] 会话已释放", self.worker_id);
        }
    }
}
