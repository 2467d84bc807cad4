//! chromiumoxide 引擎 - 基础设施层
//!
//! 持有唯一的 Browser / Page 资源，把能力接口翻译成 CDP 调用。

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser;
use crate::infrastructure::engine::{
    ActionTarget, AutomationEngine, EngineFactory, Locator, PrimitiveOutcome, Selector,
};
use crate::models::interaction_config::{CaptureSize, Coordinate};

const FILE_INPUT: &str = r#"input[type="file"]"#;

/// 记录操作员下一次点击的位置；捕获阶段拦截，避免误触发页面动作
const ARM_POINTER_JS: &str = r#"
(() => {
    window.__calibrationClick = null;
    if (!window.__calibrationArmed) {
        window.__calibrationArmed = true;
        document.addEventListener('click', (e) => {
            if (!window.__calibrationArmed) return;
            e.preventDefault();
            e.stopPropagation();
            window.__calibrationClick = { x: Math.round(e.clientX), y: Math.round(e.clientY) };
        }, true);
    }
    window.__calibrationArmed = true;
    return true;
})()
"#;

const TAKE_POINTER_JS: &str = r#"
(() => {
    const c = window.__calibrationClick || null;
    if (c) { window.__calibrationClick = null; window.__calibrationArmed = false; }
    return c;
})()
"#;

const CLEAR_INPUT_FN: &str = r#"
function() {
    this.focus();
    if ('value' in this) { this.value = ''; } else { this.textContent = ''; }
    this.dispatchEvent(new Event('input', { bubbles: true }));
}
"#;

/// chromiumoxide 实现
pub struct ChromeEngine {
    browser: Mutex<Browser>,
    page: Page,
    events: JoinHandle<()>,
    http: reqwest::Client,
    /// 自己启动的浏览器在关闭会话时一并退出；连接来的只断开
    owned: bool,
}

impl ChromeEngine {
    /// 以独立 profile 启动浏览器
    pub async fn launch(profile_dir: &Path, headless: bool, url: &str) -> Result<Self> {
        let (browser, page, events) = browser::launch_browser(profile_dir, headless, url).await?;
        Ok(Self::new(browser, page, events, true))
    }

    /// 连接到已开启调试端口的浏览器
    pub async fn connect(port: u16, url: &str) -> Result<Self> {
        let (browser, page, events) = browser::connect_to_browser_and_page(port, url).await?;
        Ok(Self::new(browser, page, events, false))
    }

    fn new(browser: Browser, page: Page, events: JoinHandle<()>, owned: bool) -> Self {
        Self {
            browser: Mutex::new(browser),
            page,
            events,
            http: reqwest::Client::new(),
            owned,
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 依次尝试选择器，返回第一个命中的元素
    async fn find(&self, locator: &Locator) -> Option<Element> {
        for selector in &locator.selectors {
            let found = match selector {
                Selector::Css(css) => self.page.find_element(css.as_str()).await,
                Selector::XPath(xpath) => self.page.find_xpath(xpath.as_str()).await,
            };
            match found {
                Ok(element) => return Some(element),
                Err(e) => debug!("选择器 {:?} 未命中: {}", selector, e),
            }
        }
        None
    }

    /// 解析出可输入的元素；坐标目标先点击再取焦点元素
    async fn focusable(&self, target: &ActionTarget) -> Result<Option<Element>> {
        match target {
            ActionTarget::Structural(locator) => Ok(self.find(locator).await),
            ActionTarget::Coordinate(c) => {
                self.page.click(point(*c)).await?;
                sleep(Duration::from_millis(300)).await;
                Ok(self.page.find_element(":focus").await.ok())
            }
        }
    }

    async fn set_files(&self, element: &Element, file: &Path) -> Result<()> {
        let absolute: PathBuf = std::fs::canonicalize(file)?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![absolute.to_string_lossy().to_string()])
            .backend_node_id(element.backend_node_id.clone())
            .build()
            .map_err(anyhow::Error::msg)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn file_input(&self) -> Option<Element> {
        self.page.find_element(FILE_INPUT).await.ok()
    }

    /// 生成图优先按 src 取原图：http(s) 直接下载，data: 直接解码，否则截元素
    async fn image_bytes(&self, element: &Element) -> Result<Vec<u8>> {
        if let Some(src) = element.attribute("src").await? {
            if src.starts_with("http://") || src.starts_with("https://") {
                match self.download(&src).await {
                    Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
                    Ok(_) => warn!("下载生成图返回空内容: {}", src),
                    Err(e) => warn!("下载生成图失败，改用元素截图: {}", e),
                }
            } else if let Some(payload) = src.strip_prefix("data:").and_then(|s| s.split_once(";base64,")) {
                return Ok(general_purpose::STANDARD.decode(payload.1)?);
            }
        }
        element.scroll_into_view().await?;
        Ok(element.screenshot(CaptureScreenshotFormat::Png).await?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn point(c: Coordinate) -> Point {
    Point::new(c.x as f64, c.y as f64)
}

#[async_trait]
impl AutomationEngine for ChromeEngine {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn attach_file(&self, target: &ActionTarget, file: &Path) -> Result<PrimitiveOutcome> {
        let input = match target {
            ActionTarget::Structural(locator) => {
                let Some(element) = self.find(locator).await else {
                    return Ok(PrimitiveOutcome::NotFound);
                };
                if element.attribute("type").await?.as_deref() == Some("file") {
                    Some(element)
                } else {
                    // 命中的是附件按钮，点开后再找文件控件
                    element.click().await?;
                    sleep(Duration::from_secs(1)).await;
                    self.file_input().await
                }
            }
            ActionTarget::Coordinate(c) => {
                self.page.click(point(*c)).await?;
                sleep(Duration::from_secs(1)).await;
                self.file_input().await
            }
        };

        match input {
            Some(element) => {
                self.set_files(&element, file).await?;
                Ok(PrimitiveOutcome::Ok)
            }
            None => Ok(PrimitiveOutcome::NotFound),
        }
    }

    async fn type_text(&self, target: &ActionTarget, text: &str) -> Result<PrimitiveOutcome> {
        let Some(element) = self.focusable(target).await? else {
            return Ok(PrimitiveOutcome::NotFound);
        };
        element.call_js_fn(CLEAR_INPUT_FN, false).await?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(PrimitiveOutcome::Ok)
    }

    async fn submit(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        let element = match target {
            ActionTarget::Structural(locator) => self.find(locator).await,
            // 刚输入过文本，焦点仍在输入框上
            ActionTarget::Coordinate(_) => self.page.find_element(":focus").await.ok(),
        };
        match element {
            Some(element) => {
                element.press_key("Enter").await?;
                Ok(PrimitiveOutcome::Ok)
            }
            None => Ok(PrimitiveOutcome::NotFound),
        }
    }

    async fn click(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        match target {
            ActionTarget::Structural(locator) => match self.find(locator).await {
                Some(element) => {
                    element.scroll_into_view().await?;
                    element.click().await?;
                    Ok(PrimitiveOutcome::Ok)
                }
                None => Ok(PrimitiveOutcome::NotFound),
            },
            ActionTarget::Coordinate(c) => {
                self.page.move_mouse(point(*c)).await?;
                self.page.click(point(*c)).await?;
                Ok(PrimitiveOutcome::Ok)
            }
        }
    }

    async fn is_present(&self, target: &ActionTarget) -> Result<bool> {
        match target {
            ActionTarget::Structural(locator) => Ok(self.find(locator).await.is_some()),
            ActionTarget::Coordinate(c) => {
                self.eval_as::<bool>(format!(
                    "document.elementFromPoint({}, {}) !== null",
                    c.x, c.y
                ))
                .await
            }
        }
    }

    async fn capture_region(&self, target: &ActionTarget, size: CaptureSize) -> Result<Vec<u8>> {
        match target {
            ActionTarget::Structural(locator) => match self.find(locator).await {
                Some(element) => self.image_bytes(&element).await,
                None => Ok(Vec::new()),
            },
            ActionTarget::Coordinate(c) => {
                let params = ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .clip(Viewport {
                        x: c.x as f64,
                        y: c.y as f64,
                        width: size.width as f64,
                        height: size.height as f64,
                        scale: 1.0,
                    })
                    .build();
                Ok(self.page.screenshot(params).await?)
            }
        }
    }

    async fn arm_pointer_capture(&self) -> Result<()> {
        self.eval(ARM_POINTER_JS).await?;
        Ok(())
    }

    async fn take_pointer_capture(&self) -> Result<Option<Coordinate>> {
        self.eval_as::<Option<Coordinate>>(TAKE_POINTER_JS).await
    }

    async fn close(&self) -> Result<()> {
        if self.owned {
            let mut browser = self.browser.lock().await;
            browser.close().await?;
            browser.wait().await?;
        }
        self.events.abort();
        Ok(())
    }
}

/// 为每个 worker 启动独立浏览器；profile 目录按 worker 区分，避免共享 cookie
pub struct ChromeFactory {
    pub profile_root: PathBuf,
    pub headless: bool,
    pub target_url: String,
    /// 设置后连接已有浏览器（仅适用于单 worker）
    pub debug_port: Option<u16>,
}

impl ChromeFactory {
    pub fn profile_for(&self, worker_id: usize) -> PathBuf {
        self.profile_root.join(format!("worker-{}", worker_id))
    }
}

#[async_trait]
impl EngineFactory for ChromeFactory {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn AutomationEngine>> {
        let engine = match self.debug_port {
            Some(port) => ChromeEngine::connect(port, &self.target_url).await?,
            None => {
                ChromeEngine::launch(&self.profile_for(worker_id), self.headless, &self.target_url)
                    .await?
            }
        };
        Ok(Box::new(engine))
    }
}
