//! 测试用的内存引擎
//!
//! 按提示词编排页面行为：正常生成、永不完成、输入时 panic；
//! 可以模拟未登录、中途掉登录和操作员的标定点击。

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use image_prompt_runner::infrastructure::engine::{
    ActionTarget, AutomationEngine, EngineFactory, PrimitiveOutcome, Selector,
};
use image_prompt_runner::models::interaction_config::{CaptureSize, Coordinate, InteractionConfig, RetryPolicy, Timing};
use image_prompt_runner::models::Task;
use image_prompt_runner::services::Strategy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BASE_URL: &str = "https://fake.test/";
pub const LOGIN_URL: &str = "https://fake.test/auth/login";

/// 引擎原语
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Attach,
    Type,
    Submit,
    Click,
    Capture,
}

/// 页面剧本
#[derive(Debug, Default, Clone)]
pub struct Script {
    /// 这些提示词永远等不到生成完成
    pub stall_prompts: HashSet<String>,
    /// 输入这个提示词时引擎 panic
    pub panic_prompt: Option<String>,
    /// 这些 worker 永远不会登录
    pub never_login: HashSet<usize>,
    /// 提交这么多次之后掉登录
    pub logout_after_submits: Option<usize>,
    /// 这些 worker 打不开会话
    pub fail_open: HashSet<usize>,
    /// 标定时操作员依次点击的位置
    pub pointer_clicks: Vec<Coordinate>,
    /// 这些 (原语, 策略) 组合报告目标不在页面上
    pub not_found: HashSet<(Primitive, Strategy)>,
    /// 这些 (原语, 策略) 组合引擎直接出错
    pub failing: HashSet<(Primitive, Strategy)>,
    /// 上传后生成区域一直显示源图预览
    pub upload_preview: bool,
}

impl Script {
    pub fn missing(mut self, primitive: Primitive, strategies: &[Strategy]) -> Self {
        for s in strategies {
            self.not_found.insert((primitive, *s));
        }
        self
    }

    pub fn broken(mut self, primitive: Primitive, strategies: &[Strategy]) -> Self {
        for s in strategies {
            self.failing.insert((primitive, *s));
        }
        self
    }
}

/// 所有引擎共享的观测数据
#[derive(Debug, Default)]
pub struct Recorder {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    /// 每个提示词的完成标记轮询次数
    pub marker_polls: Mutex<HashMap<String, usize>>,
    /// 上传时使用的目标
    pub attach_targets: Mutex<Vec<ActionTarget>>,
    /// 点击（发送按钮）使用的目标
    pub click_targets: Mutex<Vec<ActionTarget>>,
    /// (worker, 提示词) 按处理顺序
    pub typed: Mutex<Vec<(usize, String)>>,
}

impl Recorder {
    pub fn polls_for(&self, prompt: &str) -> usize {
        self.marker_polls
            .lock()
            .unwrap()
            .get(prompt)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    logged_in: bool,
    prompt: Option<String>,
    attached: bool,
    submitted: bool,
    submits: usize,
}

pub struct FakeEngine {
    worker_id: usize,
    script: Arc<Script>,
    recorder: Arc<Recorder>,
    page: Mutex<PageState>,
    clicks: Mutex<VecDeque<Coordinate>>,
    generated: Vec<u8>,
    preview: Vec<u8>,
}

fn strategy_of(target: &ActionTarget) -> Strategy {
    match target {
        ActionTarget::Structural(_) => Strategy::Structural,
        ActionTarget::Coordinate(_) => Strategy::Coordinate,
    }
}

impl FakeEngine {
    /// 按剧本决定原语是出错、找不到还是正常执行
    fn scripted(&self, primitive: Primitive, target: &ActionTarget) -> Result<Option<PrimitiveOutcome>> {
        let key = (primitive, strategy_of(target));
        if self.script.failing.contains(&key) {
            anyhow::bail!("{:?} 在 {:?} 目标上出错", primitive, key.1);
        }
        if self.script.not_found.contains(&key) {
            return Ok(Some(PrimitiveOutcome::NotFound));
        }
        Ok(None)
    }

    fn is_completion_marker(target: &ActionTarget) -> bool {
        match target {
            ActionTarget::Structural(locator) => locator.selectors.iter().any(|s| match s {
                Selector::XPath(x) => x.contains("Image created"),
                Selector::Css(_) => false,
            }),
            ActionTarget::Coordinate(_) => false,
        }
    }

    fn generation_done(&self, page: &PageState) -> bool {
        match &page.prompt {
            Some(prompt) => page.submitted && !self.script.stall_prompts.contains(prompt),
            None => false,
        }
    }
}

#[async_trait]
impl AutomationEngine for FakeEngine {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut page = self.page.lock().unwrap();
        page.url = if page.logged_in { url.to_string() } else { LOGIN_URL.to_string() };
        page.prompt = None;
        page.attached = false;
        page.submitted = false;
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        let page = self.page.lock().unwrap();
        Ok(Some(if page.logged_in { page.url.clone() } else { LOGIN_URL.to_string() }))
    }

    async fn attach_file(&self, target: &ActionTarget, _file: &Path) -> Result<PrimitiveOutcome> {
        self.recorder.attach_targets.lock().unwrap().push(target.clone());
        if let Some(outcome) = self.scripted(Primitive::Attach, target)? {
            return Ok(outcome);
        }
        self.page.lock().unwrap().attached = true;
        Ok(PrimitiveOutcome::Ok)
    }

    async fn type_text(&self, target: &ActionTarget, text: &str) -> Result<PrimitiveOutcome> {
        if self.script.panic_prompt.as_deref() == Some(text) {
            panic!("引擎在输入 {} 时崩溃", text);
        }
        if let Some(outcome) = self.scripted(Primitive::Type, target)? {
            return Ok(outcome);
        }
        self.recorder
            .typed
            .lock()
            .unwrap()
            .push((self.worker_id, text.to_string()));
        self.page.lock().unwrap().prompt = Some(text.to_string());
        Ok(PrimitiveOutcome::Ok)
    }

    async fn submit(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        if let Some(outcome) = self.scripted(Primitive::Submit, target)? {
            return Ok(outcome);
        }
        let mut page = self.page.lock().unwrap();
        page.submitted = true;
        page.submits += 1;
        if let Some(limit) = self.script.logout_after_submits {
            if page.submits >= limit {
                page.logged_in = false;
            }
        }
        Ok(PrimitiveOutcome::Ok)
    }

    async fn click(&self, target: &ActionTarget) -> Result<PrimitiveOutcome> {
        self.recorder.click_targets.lock().unwrap().push(target.clone());
        if let Some(outcome) = self.scripted(Primitive::Click, target)? {
            return Ok(outcome);
        }
        // 页面上唯一会被点击的是发送按钮
        let mut page = self.page.lock().unwrap();
        if page.prompt.is_some() {
            page.submitted = true;
        }
        Ok(PrimitiveOutcome::Ok)
    }

    async fn is_present(&self, target: &ActionTarget) -> Result<bool> {
        let page = self.page.lock().unwrap();
        if Self::is_completion_marker(target) {
            if let Some(prompt) = &page.prompt {
                *self
                    .recorder
                    .marker_polls
                    .lock()
                    .unwrap()
                    .entry(prompt.clone())
                    .or_default() += 1;
            }
            return Ok(self.generation_done(&page));
        }
        Ok(page.logged_in)
    }

    async fn capture_region(&self, target: &ActionTarget, _size: CaptureSize) -> Result<Vec<u8>> {
        if self.scripted(Primitive::Capture, target)?.is_some() {
            return Ok(Vec::new());
        }
        let page = self.page.lock().unwrap();
        if self.generation_done(&page) {
            Ok(self.generated.clone())
        } else if self.script.upload_preview && page.attached {
            Ok(self.preview.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn arm_pointer_capture(&self) -> Result<()> {
        Ok(())
    }

    async fn take_pointer_capture(&self) -> Result<Option<Coordinate>> {
        Ok(self.clicks.lock().unwrap().pop_front())
    }

    async fn close(&self) -> Result<()> {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeFactory {
    pub script: Arc<Script>,
    pub recorder: Arc<Recorder>,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            recorder: Arc::new(Recorder::default()),
        }
    }
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn open(&self, worker_id: usize) -> Result<Box<dyn AutomationEngine>> {
        if self.script.fail_open.contains(&worker_id) {
            anyhow::bail!("worker {} 的浏览器启动失败", worker_id);
        }
        self.recorder.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            worker_id,
            script: Arc::clone(&self.script),
            recorder: Arc::clone(&self.recorder),
            page: Mutex::new(PageState {
                url: BASE_URL.to_string(),
                logged_in: !self.script.never_login.contains(&worker_id),
                ..Default::default()
            }),
            clicks: Mutex::new(self.script.pointer_clicks.iter().copied().collect()),
            generated: png_bytes(64, 48),
            preview: png_bytes(32, 32),
        }))
    }
}

pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([20, 120, 220])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// 毫秒级时间参数，测试不需要真实等待
pub fn fast_config(output_dir: &Path) -> InteractionConfig {
    InteractionConfig {
        target_url: BASE_URL.to_string(),
        output_dir: output_dir.to_path_buf(),
        timing: Timing {
            generation_wait_ms: 40,
            poll_interval_ms: 10,
            stable_polls: 3,
            auth_timeout_ms: 60,
            auth_poll_ms: 5,
            page_settle_ms: 0,
            action_delay_min_ms: 0,
            action_delay_max_ms: 0,
            resolve_backoff_ms: 1,
            calibration_timeout_ms: 100,
        },
        retry: RetryPolicy {
            resolve_attempts: 2,
            generation_retries: 1,
        },
        reauth_check_every: 0,
        ..InteractionConfig::default()
    }
}

/// 构造 n 个任务，第 i 个的提示词为 `prompt-i`
pub fn tasks(n: u64, (w, h): (u32, u32)) -> Vec<Task> {
    (1..=n)
        .map(|i| {
            Task::new(
                i,
                format!("{:04}", i),
                PathBuf::from(format!("{:04}/input.png", i)),
                (w, h),
                format!("prompt-{}", i),
            )
        })
        .collect()
}

/// 在磁盘上写一个数据集条目
pub fn write_dataset_item(root: &Path, name: &str, (w, h): (u32, u32), prompt: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    DynamicImage::ImageRgb8(RgbImage::new(w, h))
        .save(dir.join("input.png"))
        .unwrap();
    std::fs::write(dir.join("prompt.txt"), prompt).unwrap();
}
