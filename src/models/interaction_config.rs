//! 交互配置（持久化文档）
//!
//! 元素名 → {结构化选择器 | 坐标}，外加全局时间参数。
//! 默认 JSON 格式，路径以 `.toml` 结尾时使用 TOML。
//! 未识别的键原样保留，保证标定写回时不丢信息。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ConfigError};

/// 状态机使用的元素名
pub mod elements {
    pub const ATTACHMENT: &str = "attachment";
    pub const TEXTAREA: &str = "textarea";
    pub const GENERATED_IMAGE: &str = "generated_image";
    /// 回车提交失败时点击的发送按钮
    pub const SEND_BUTTON: &str = "send_button";
    pub const COMPLETION_MARKER: &str = "completion_marker";
    pub const AUTH_MARKER: &str = "auth_marker";

    /// 标定模式依次采集的元素
    pub const CALIBRATED: [&str; 3] = [ATTACHMENT, TEXTAREA, GENERATED_IMAGE];
}

/// 屏幕坐标（视口内 CSS 像素）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 单个元素的定位描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementTarget {
    /// 结构化选择器，按顺序尝试；`xpath:` 前缀或以 `//` 开头的按 XPath 处理
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
}

impl ElementTarget {
    fn new(selectors: &[&str], coordinate: Option<Coordinate>) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            coordinate,
        }
    }
}

/// 时间参数（毫秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// 单轮等待生成完成的上限
    pub generation_wait_ms: u64,
    pub poll_interval_ms: u64,
    /// 区域校验和连续不变多少次视为完成
    pub stable_polls: u32,
    /// 等待人工登录的上限
    pub auth_timeout_ms: u64,
    pub auth_poll_ms: u64,
    /// 打开新对话后等待页面稳定
    pub page_settle_ms: u64,
    pub action_delay_min_ms: u64,
    pub action_delay_max_ms: u64,
    /// 定位重试之间的退避
    pub resolve_backoff_ms: u64,
    /// 标定时每个元素等待操作员点击的上限
    pub calibration_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            generation_wait_ms: 120_000,
            poll_interval_ms: 2_000,
            stable_polls: 3,
            auth_timeout_ms: 300_000,
            auth_poll_ms: 1_000,
            page_settle_ms: 5_000,
            action_delay_min_ms: 500,
            action_delay_max_ms: 1_500,
            resolve_backoff_ms: 1_000,
            calibration_timeout_ms: 120_000,
        }
    }
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 可定位步骤（上传、输入、提取）最多进入次数
    pub resolve_attempts: u32,
    /// 等待生成超时后额外重试的轮数
    pub generation_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            resolve_attempts: 3,
            generation_retries: 1,
        }
    }
}

/// 坐标模式下截取的区域大小
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureSize {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

/// "生成完成"判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    Marker,
    Stability,
    #[default]
    MarkerOrStability,
}

/// 持久化的交互配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub target_url: String,
    pub headless: bool,
    pub browser_profile: PathBuf,
    pub dataset_dir: PathBuf,
    pub output_dir: PathBuf,
    /// 默认并发数
    pub concurrency: usize,
    /// 每个 worker 最多处理的任务数，0 表示不限
    pub max_items_per_worker: usize,
    pub use_coordinates: bool,
    pub elements: BTreeMap<String, ElementTarget>,
    pub timing: Timing,
    pub retry: RetryPolicy,
    pub capture: CaptureSize,
    pub completion: CompletionMode,
    /// 当前 URL 命中该正则时视为掉登录
    pub auth_url_pattern: String,
    /// 每处理多少个任务检查一次登录状态，0 表示不检查
    pub reauth_check_every: usize,
    /// 未识别的键
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            target_url: "https://chat.openai.com".to_string(),
            headless: false,
            browser_profile: PathBuf::from("chrome_profile"),
            dataset_dir: PathBuf::from("dataset"),
            output_dir: PathBuf::from("output"),
            concurrency: 1,
            max_items_per_worker: 0,
            use_coordinates: false,
            elements: default_elements(),
            timing: Timing::default(),
            retry: RetryPolicy::default(),
            capture: CaptureSize::default(),
            completion: CompletionMode::default(),
            auth_url_pattern: r"(?i)/(auth|login)\b".to_string(),
            reauth_check_every: 5,
            extra: BTreeMap::new(),
        }
    }
}

/// 内置元素表
fn default_elements() -> BTreeMap<String, ElementTarget> {
    let mut map = BTreeMap::new();
    map.insert(
        elements::ATTACHMENT.to_string(),
        ElementTarget::new(
            &[
                r#"input[type="file"]"#,
                r#"[data-testid="chat-composer-add-button"]"#,
            ],
            Some(Coordinate::new(740, 650)),
        ),
    );
    map.insert(
        elements::TEXTAREA.to_string(),
        ElementTarget::new(
            &[
                "#prompt-textarea",
                r#"textarea[placeholder*="Message"]"#,
                r#"[data-testid="chat-composer-textarea"] textarea"#,
                "textarea",
            ],
            Some(Coordinate::new(640, 650)),
        ),
    );
    map.insert(
        elements::SEND_BUTTON.to_string(),
        ElementTarget::new(
            &[
                r#"button[data-testid="send-button"]"#,
                "#composer-submit-button",
            ],
            None,
        ),
    );
    map.insert(
        elements::GENERATED_IMAGE.to_string(),
        ElementTarget::new(
            &[
                r#"img[alt="Generated image"]"#,
                r#"img[src*="oaiusercontent.com"]"#,
            ],
            Some(Coordinate::new(400, 500)),
        ),
    );
    map.insert(
        elements::COMPLETION_MARKER.to_string(),
        ElementTarget::new(&[r#"xpath://span[text()="Image created"]"#], None),
    );
    map.insert(
        elements::AUTH_MARKER.to_string(),
        ElementTarget::new(&["#prompt-textarea", "textarea"], None),
    );
    map
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

impl InteractionConfig {
    /// 从文件加载；文件不存在时返回默认配置
    ///
    /// 文件中的元素条目按名字覆盖内置元素表，其余字段缺省时取默认值。
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            info!("配置文件 {} 不存在，使用默认交互配置", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;

        let mut config: Self = if is_toml(path) {
            toml::from_str(&content)
                .map_err(|e| AppError::parse_failed(path.display().to_string(), e))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| AppError::parse_failed(path.display().to_string(), e))?
        };

        let mut merged = default_elements();
        merged.append(&mut config.elements);
        config.elements = merged;

        debug!(
            "已加载交互配置: {} 个元素, 坐标模式: {}",
            config.elements.len(),
            config.use_coordinates
        );
        Ok(config)
    }

    /// 写回文件（先写临时文件再改名）
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| AppError::parse_failed(path.display().to_string(), e))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| AppError::parse_failed(path.display().to_string(), e))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::file_write_failed(parent.display().to_string(), e))?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)
            .map_err(|e| AppError::file_write_failed(tmp.display().to_string(), e))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("✓ 交互配置已保存至: {}", path.display());
        Ok(())
    }

    /// 登录页 URL 匹配规则
    pub fn auth_url_regex(&self) -> AppResult<Regex> {
        Regex::new(&self.auth_url_pattern)
            .map_err(|e| AppError::invalid_config("auth_url_pattern", e.to_string()))
    }

    pub fn element(&self, name: &str) -> Option<&ElementTarget> {
        self.elements.get(name)
    }

    /// 记录标定得到的坐标
    pub fn set_coordinate(&mut self, name: &str, coordinate: Coordinate) {
        self.elements
            .entry(name.to_string())
            .or_default()
            .coordinate = Some(coordinate);
    }
}

/// 标定锁
///
/// 标定期间持有 `<config>.lock`，处理流程启动前检查该文件。
#[derive(Debug)]
pub struct CalibrationLock {
    path: PathBuf,
}

impl CalibrationLock {
    pub fn lock_path(config_path: &Path) -> PathBuf {
        let mut name = config_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(config_path: &Path) -> AppResult<Self> {
        let path = Self::lock_path(config_path);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    AppError::Config(ConfigError::CalibrationInProgress {
                        lock_path: path.display().to_string(),
                    })
                } else {
                    AppError::file_write_failed(path.display().to_string(), e)
                }
            })?;
        Ok(Self { path })
    }

    /// 处理流程不能与标定同时运行
    pub fn ensure_unlocked(config_path: &Path) -> AppResult<()> {
        let path = Self::lock_path(config_path);
        if path.exists() {
            return Err(AppError::Config(ConfigError::CalibrationInProgress {
                lock_path: path.display().to_string(),
            }));
        }
        Ok(())
    }
}

impl Drop for CalibrationLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("删除标定锁失败 {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = InteractionConfig::load(&dir.path().join("none.json")).unwrap();
        assert_eq!(config, InteractionConfig::default());
        assert!(config.element(elements::TEXTAREA).is_some());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "use_coordinates": true,
                "elements": { "textarea": { "coordinate": { "x": 10, "y": 20 } } },
                "timing": { "poll_interval_ms": 50 },
                "operator_note": "laptop screen"
            }"#,
        )
        .unwrap();

        let config = InteractionConfig::load(&path).unwrap();
        assert!(config.use_coordinates);
        assert_eq!(
            config.element(elements::TEXTAREA).unwrap().coordinate,
            Some(Coordinate::new(10, 20))
        );
        // 未覆盖的元素仍来自内置表
        assert!(config.element(elements::GENERATED_IMAGE).is_some());
        assert_eq!(config.timing.poll_interval_ms, 50);
        assert_eq!(
            config.timing.generation_wait_ms,
            Timing::default().generation_wait_ms
        );
        assert_eq!(
            config.extra.get("operator_note"),
            Some(&serde_json::json!("laptop screen"))
        );
    }

    #[test]
    fn test_save_then_load_is_lossless_json_and_toml() {
        let dir = tempdir().unwrap();
        let mut config = InteractionConfig::default();
        config.set_coordinate(elements::ATTACHMENT, Coordinate::new(733, 641));
        config.concurrency = 4;
        config
            .extra
            .insert("operator_note".to_string(), serde_json::json!("desk"));

        for name in ["config.json", "config.toml"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = InteractionConfig::load(&path).unwrap();
            assert_eq!(loaded, config, "{} 往返后应一致", name);
        }
    }

    #[test]
    fn test_calibration_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let lock = CalibrationLock::acquire(&path).unwrap();
        assert!(CalibrationLock::acquire(&path).is_err());
        assert!(CalibrationLock::ensure_unlocked(&path).is_err());

        drop(lock);
        assert!(CalibrationLock::ensure_unlocked(&path).is_ok());
    }
}
