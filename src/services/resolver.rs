//! 坐标/选择器解析服务 - 业务能力层
//!
//! 元素名 → ActionTarget。只读配置，不碰页面。

use std::fmt;
use std::sync::Arc;

use crate::infrastructure::engine::{ActionTarget, Locator};
use crate::models::InteractionConfig;

/// 定位策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// 选择器，能扛住小幅布局变化
    Structural,
    /// 坐标，能扛住 DOM 混淆，但怕窗口尺寸变化
    Coordinate,
}

impl Strategy {
    pub fn other(self) -> Self {
        match self {
            Strategy::Structural => Strategy::Coordinate,
            Strategy::Coordinate => Strategy::Structural,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Structural => f.write_str("structural"),
            Strategy::Coordinate => f.write_str("coordinate"),
        }
    }
}

/// 元素在该策略下没有配置
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("元素 {element} 没有 {strategy} 定位配置")]
pub struct Unresolvable {
    pub element: String,
    pub strategy: Strategy,
}

/// 解析器
#[derive(Debug, Clone)]
pub struct Resolver {
    config: Arc<InteractionConfig>,
    primary: Strategy,
}

impl Resolver {
    pub fn new(config: Arc<InteractionConfig>) -> Self {
        let primary = if config.use_coordinates {
            Strategy::Coordinate
        } else {
            Strategy::Structural
        };
        Self { config, primary }
    }

    /// 本次运行的首选策略
    pub fn primary(&self) -> Strategy {
        self.primary
    }

    pub fn resolve(&self, element: &str, strategy: Strategy) -> Result<ActionTarget, Unresolvable> {
        let unresolvable = || Unresolvable {
            element: element.to_string(),
            strategy,
        };
        let entry = self.config.element(element).ok_or_else(unresolvable)?;

        match strategy {
            Strategy::Structural if !entry.selectors.is_empty() => {
                Ok(ActionTarget::Structural(Locator::from_raw(&entry.selectors)))
            }
            Strategy::Coordinate => entry
                .coordinate
                .map(ActionTarget::Coordinate)
                .ok_or_else(unresolvable),
            Strategy::Structural => Err(unresolvable()),
        }
    }

    /// 按首选策略解析
    pub fn resolve_primary(&self, element: &str) -> Result<ActionTarget, Unresolvable> {
        self.resolve(element, self.primary)
    }

    /// 首选策略报"找不到"时的后备目标
    pub fn fallback(&self, element: &str) -> Option<ActionTarget> {
        self.resolve(element, self.primary.other()).ok()
    }
}
