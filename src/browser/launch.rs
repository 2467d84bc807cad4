use std::path::Path;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{AppError, BrowserError};

/// 使用独立 profile 启动浏览器并打开目标页面
///
/// 返回的 `JoinHandle` 是后台事件循环，浏览器关闭后自然结束。
pub async fn launch_browser(
    profile_dir: &Path,
    headless: bool,
    url: &str,
) -> Result<(Browser, Page, JoinHandle<()>)> {
    info!("🚀 启动浏览器 (profile: {})...", profile_dir.display());
    debug!("目标 URL: {}, 无头模式: {}", url, headless);

    std::fs::create_dir_all(profile_dir)?;

    let builder = BrowserConfig::builder()
        .user_data_dir(profile_dir)
        .window_size(1280, 800)
        .args(vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-blink-features=AutomationControlled",
        ]);
    let builder = if headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    let config = builder.build().map_err(|message| {
        error!("配置浏览器失败: {}", message);
        AppError::Browser(BrowserError::ConfigurationFailed { message })
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        AppError::Browser(BrowserError::LaunchFailed {
            profile: profile_dir.display().to_string(),
            source: Box::new(e),
        })
    })?;
    debug!("浏览器启动成功");

    // 在后台处理浏览器事件
    let events = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let page = browser.new_page(url).await.map_err(|e| {
        error!("创建页面失败: {}", e);
        AppError::Browser(BrowserError::NavigationFailed {
            url: url.to_string(),
            source: Box::new(e),
        })
    })?;

    info!("✅ 浏览器已导航到: {}", url);
    Ok((browser, page, events))
}
