//! 自动化引擎能力接口 - 基础设施层
//!
//! 状态机只通过这组原语操作页面，不认识 chromiumoxide。
//! 目标 (`ActionTarget`) 由 Resolver 事先解析好。

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::models::interaction_config::{CaptureSize, Coordinate};

/// 单个结构化选择器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    /// `xpath:` 前缀或以 `//` 开头的视为 XPath，其余为 CSS
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("xpath:") {
            Selector::XPath(rest.to_string())
        } else if raw.starts_with("//") {
            Selector::XPath(raw.to_string())
        } else {
            Selector::Css(raw.to_string())
        }
    }
}

/// 按顺序尝试的一组选择器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub selectors: Vec<Selector>,
}

impl Locator {
    pub fn from_raw<S: AsRef<str>>(raw: &[S]) -> Self {
        Self {
            selectors: raw.iter().map(|s| Selector::parse(s.as_ref())).collect(),
        }
    }
}

/// 动作目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    Structural(Locator),
    Coordinate(Coordinate),
}

/// 原语执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOutcome {
    Ok,
    NotFound,
}

impl PrimitiveOutcome {
    /// 命中时返回 `Some(())`，便于和其他"可能找不到"的结果统一处理
    pub fn found(self) -> Option<()> {
        (self == PrimitiveOutcome::Ok).then_some(())
    }
}

/// 每个 Session Handle 背后的自动化引擎
///
/// `Err` 表示引擎本身出错（CDP 断开等），`NotFound` 表示目标不在页面上。
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<Option<String>>;

    /// 把本地文件挂到页面的文件控件上
    async fn attach_file(&self, target: &ActionTarget, file: &Path) -> Result<PrimitiveOutcome>;

    /// 清空目标输入框后输入文本
    async fn type_text(&self, target: &ActionTarget, text: &str) -> Result<PrimitiveOutcome>;

    /// 在目标上按回车提交
    async fn submit(&self, target: &ActionTarget) -> Result<PrimitiveOutcome>;

    async fn click(&self, target: &ActionTarget) -> Result<PrimitiveOutcome>;

    async fn is_present(&self, target: &ActionTarget) -> Result<bool>;

    /// 截取目标对应的图像字节，找不到时返回空
    async fn capture_region(&self, target: &ActionTarget, size: CaptureSize) -> Result<Vec<u8>>;

    /// 开始监听操作员的下一次点击（标定用）
    async fn arm_pointer_capture(&self) -> Result<()>;

    /// 取走已记录的点击位置
    async fn take_pointer_capture(&self) -> Result<Option<Coordinate>>;

    async fn close(&self) -> Result<()>;
}

/// 为每个 worker 打开独立会话
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn AutomationEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            Selector::parse("xpath://span[text()='x']"),
            Selector::XPath("//span[text()='x']".to_string())
        );
        assert_eq!(
            Selector::parse("//img"),
            Selector::XPath("//img".to_string())
        );
        assert_eq!(
            Selector::parse("textarea"),
            Selector::Css("textarea".to_string())
        );
    }
}
