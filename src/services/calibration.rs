//! 坐标标定 - 业务能力层
//!
//! 独立运行模式：操作员在浏览器里依次点击各元素，记录点击坐标并写回配置文件。
//! 标定期间持有配置锁，处理流程不能同时运行。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::infrastructure::engine::EngineFactory;
use crate::infrastructure::session::{ActionPacing, SessionHandle};
use crate::models::interaction_config::{elements, CalibrationLock, Coordinate};
use crate::models::InteractionConfig;
use crate::services::resolver::{Resolver, Strategy};

/// 轮询点击结果的间隔
const POINTER_POLL: Duration = Duration::from_millis(200);

/// 单个元素的标定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibratedElement {
    pub element: String,
    /// 超时未点击时为 None，原配置保持不变
    pub coordinate: Option<Coordinate>,
}

pub struct Calibrator {
    config: InteractionConfig,
    config_path: PathBuf,
    _lock: CalibrationLock,
}

impl Calibrator {
    /// 获取标定锁并加载配置
    pub fn begin(config_path: &Path, config: InteractionConfig) -> Result<Self> {
        let lock = CalibrationLock::acquire(config_path)?;
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
            _lock: lock,
        })
    }

    /// 标定单个元素：等待操作员点击，记录坐标并立即持久化
    pub async fn calibrate(
        &mut self,
        session: &SessionHandle,
        element: &str,
    ) -> Result<Option<Coordinate>> {
        info!("👉 请在浏览器中点击元素「{}」", element);
        let timeout = Duration::from_millis(self.config.timing.calibration_timeout_ms);
        let Some(coordinate) = session.await_pointer_click(timeout, POINTER_POLL).await? else {
            warn!("⚠️ 元素 {} 等待点击超时，保留原配置", element);
            return Ok(None);
        };

        info!("✓ {} → ({}, {})", element, coordinate.x, coordinate.y);
        self.config.set_coordinate(element, coordinate);
        self.config.save(&self.config_path)?;
        Ok(Some(coordinate))
    }

    /// 完整标定流程：打开会话 → 等待登录 → 逐个元素标定
    pub async fn run(mut self, factory: &dyn EngineFactory) -> Result<Vec<CalibratedElement>> {
        info!("========== 标定模式 ==========");
        info!("配置文件: {}", self.config_path.display());

        let engine = factory.open(0).await.context("打开标定会话失败")?;
        let mut session = SessionHandle::new(0, engine, ActionPacing::none());

        let result = self.calibrate_all(&mut session).await;
        session.release().await;
        let calibrated = result?;

        let recorded = calibrated.iter().filter(|c| c.coordinate.is_some()).count();
        info!("========== 标定完成: {}/{} ==========", recorded, calibrated.len());
        info!(
            "使用坐标模式运行: --config {} --use-coordinates",
            self.config_path.display()
        );
        Ok(calibrated)
    }

    async fn calibrate_all(&mut self, session: &mut SessionHandle) -> Result<Vec<CalibratedElement>> {
        session.navigate(&self.config.target_url).await?;

        let resolver = Resolver::new(Arc::new(self.config.clone()));
        let marker = resolver.resolve(elements::AUTH_MARKER, Strategy::Structural)?;
        let auth_url = self.config.auth_url_regex()?;
        let timing = &self.config.timing;

        info!("🔐 请在浏览器中完成登录...");
        let logged_in = session
            .await_login(
                &marker,
                &auth_url,
                Duration::from_millis(timing.auth_timeout_ms),
                Duration::from_millis(timing.auth_poll_ms),
            )
            .await;
        if !logged_in {
            anyhow::bail!("等待登录超时（{} ms）", timing.auth_timeout_ms);
        }

        let mut calibrated = Vec::with_capacity(elements::CALIBRATED.len());
        for element in elements::CALIBRATED {
            let coordinate = self.calibrate(session, element).await?;
            calibrated.push(CalibratedElement {
                element: element.to_string(),
                coordinate,
            });
        }
        Ok(calibrated)
    }
}
