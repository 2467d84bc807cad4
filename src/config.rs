use std::path::PathBuf;
use std::time::Duration;

use crate::models::InteractionConfig;

/// 程序运行配置
///
/// 先取默认值，再由环境变量覆盖，最后由命令行参数覆盖。
#[derive(Clone, Debug)]
pub struct Config {
    /// 数据集根目录（每个子目录一个任务）
    pub input_dir: Option<PathBuf>,
    /// 输出根目录
    pub output_dir: Option<PathBuf>,
    /// 并发 worker 数
    pub concurrency: Option<usize>,
    /// 每个 worker 最多处理的任务数
    pub max_items_per_worker: Option<usize>,
    /// 浏览器 profile 根目录
    pub profile_dir: Option<PathBuf>,
    /// 交互配置文件路径
    pub config_path: PathBuf,
    /// 目标URL
    pub target_url: Option<String>,
    /// 是否使用坐标模式
    pub use_coordinates: bool,
    /// 是否进入标定模式
    pub calibrate: bool,
    /// 整个运行的超时（秒），0 表示不限
    pub run_timeout_secs: u64,
    /// 连接已有浏览器的调试端口
    pub browser_debug_port: Option<u16>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: None,
            concurrency: None,
            max_items_per_worker: None,
            profile_dir: None,
            config_path: PathBuf::from("interaction_config.json"),
            target_url: None,
            use_coordinates: false,
            calibrate: false,
            run_timeout_secs: 0,
            browser_debug_port: None,
            verbose_logging: false,
            output_log_file: "run_log.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            input_dir: std::env::var("INPUT_DIR").ok().map(PathBuf::from).or(default.input_dir),
            output_dir: std::env::var("OUTPUT_DIR").ok().map(PathBuf::from).or(default.output_dir),
            concurrency: std::env::var("CONCURRENCY").ok().and_then(|v| v.parse().ok()).or(default.concurrency),
            max_items_per_worker: std::env::var("MAX_ITEMS_PER_WORKER").ok().and_then(|v| v.parse().ok()).or(default.max_items_per_worker),
            profile_dir: std::env::var("PROFILE_DIR").ok().map(PathBuf::from).or(default.profile_dir),
            config_path: std::env::var("CONFIG_PATH").map(PathBuf::from).unwrap_or(default.config_path),
            target_url: std::env::var("TARGET_URL").ok().or(default.target_url),
            use_coordinates: std::env::var("USE_COORDINATES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.use_coordinates),
            calibrate: default.calibrate,
            run_timeout_secs: std::env::var("RUN_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.run_timeout_secs),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()).or(default.browser_debug_port),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    /// 把运行参数叠加到持久化配置上，得到本次运行实际使用的交互配置
    pub fn apply_to(&self, interaction: &mut InteractionConfig) {
        if let Some(dir) = &self.input_dir {
            interaction.dataset_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            interaction.output_dir = dir.clone();
        }
        if let Some(n) = self.concurrency {
            interaction.concurrency = n;
        }
        if let Some(k) = self.max_items_per_worker {
            interaction.max_items_per_worker = k;
        }
        if let Some(profile) = &self.profile_dir {
            interaction.browser_profile = profile.clone();
        }
        if let Some(url) = &self.target_url {
            interaction.target_url = url.clone();
        }
        if self.use_coordinates {
            interaction.use_coordinates = true;
        }
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_values_override_persisted_config() {
        let config = Config {
            concurrency: Some(4),
            max_items_per_worker: Some(2),
            use_coordinates: true,
            input_dir: Some(PathBuf::from("emu-dataset")),
            ..Config::default()
        };
        let mut interaction = InteractionConfig::default();
        config.apply_to(&mut interaction);

        assert_eq!(interaction.concurrency, 4);
        assert_eq!(interaction.max_items_per_worker, 2);
        assert!(interaction.use_coordinates);
        assert_eq!(interaction.dataset_dir, PathBuf::from("emu-dataset"));
        // 未指定的保持原值
        assert_eq!(interaction.output_dir, InteractionConfig::default().output_dir);
    }

    #[test]
    fn test_zero_run_timeout_means_unbounded() {
        assert!(Config::default().run_timeout().is_none());
        let config = Config {
            run_timeout_secs: 30,
            ..Config::default()
        };
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(30)));
    }
}
