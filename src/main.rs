use anyhow::Result;
use clap::Parser;
use image_prompt_runner::utils::logging;
use image_prompt_runner::{App, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// 用浏览器会话批量生成图片
#[derive(Parser, Debug)]
#[command(name = "image-prompt-runner", version, about)]
struct Cli {
    /// 数据集根目录（每个子目录包含 input.jpg 和 prompt.txt）
    #[arg(long)]
    input: Option<PathBuf>,

    /// 输出根目录
    #[arg(long)]
    output: Option<PathBuf>,

    /// 并发 worker 数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 每个 worker 最多处理的任务数（0 表示不限）
    #[arg(long = "max-items")]
    max_items: Option<usize>,

    /// 浏览器 profile 根目录
    #[arg(long)]
    profile: Option<PathBuf>,

    /// 交互配置文件（.json 或 .toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 使用坐标定位代替选择器
    #[arg(long)]
    use_coordinates: bool,

    /// 进入坐标标定模式
    #[arg(long)]
    calibrate: bool,

    /// 整个运行的超时（秒）
    #[arg(long)]
    run_timeout: Option<u64>,

    /// 连接已开启远程调试的浏览器
    #[arg(long)]
    debug_port: Option<u16>,

    /// 输出 debug 日志
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// 命令行参数覆盖环境变量
    fn apply(self, config: &mut Config) {
        if self.input.is_some() {
            config.input_dir = self.input;
        }
        if self.output.is_some() {
            config.output_dir = self.output;
        }
        if self.concurrency.is_some() {
            config.concurrency = self.concurrency;
        }
        if self.max_items.is_some() {
            config.max_items_per_worker = self.max_items;
        }
        if self.profile.is_some() {
            config.profile_dir = self.profile;
        }
        if let Some(path) = self.config {
            config.config_path = path;
        }
        if let Some(secs) = self.run_timeout {
            config.run_timeout_secs = secs;
        }
        if self.debug_port.is_some() {
            config.browser_debug_port = self.debug_port;
        }
        config.use_coordinates |= self.use_coordinates;
        config.calibrate = self.calibrate;
        config.verbose_logging |= self.verbose;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 加载配置
    let mut config = Config::from_env();
    cli.apply(&mut config);

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("❌ 运行失败: {:#}", e);
            eprintln!("运行失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<bool> {
    // 初始化日志
    logging::init_log_file(&config.output_log_file)?;
    logging::init(config.verbose_logging, &config.output_log_file)?;

    let calibrate = config.calibrate;
    let app = App::initialize(config)?;

    if calibrate {
        let calibrated = app.calibrate().await?;
        return Ok(calibrated.iter().any(|c| c.coordinate.is_some()));
    }

    let report = app.run().await?;
    if !report.is_success() {
        info!("存在未登录的 worker 或没有可处理的任务，以非零状态退出");
    }
    Ok(report.is_success())
}
