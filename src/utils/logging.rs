use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化和输出的辅助函数
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志
///
/// 同时输出到终端和日志文件；`RUST_LOG` 优先于 `verbose`。
///
/// # 参数
/// - `verbose`: 是否输出 debug 日志
/// - `log_file_path`: 日志文件路径（先由 `init_log_file` 写入文件头）
pub fn init(verbose: bool, log_file_path: &str) -> Result<()> {
    let default_level = if verbose {
        "image_prompt_runner=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;
    Ok(())
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n图片生成处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(concurrency: usize, max_items_per_worker: usize, use_coordinates: bool) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多 worker 图片生成模式");
    info!("📊 并发 worker 数: {}", concurrency);
    if max_items_per_worker > 0 {
        info!("📋 每个 worker 最多处理: {} 个", max_items_per_worker);
    }
    info!(
        "🎯 定位策略: {}",
        if use_coordinates { "坐标" } else { "选择器" }
    );
    info!("{}", "=".repeat(60));
}

/// 记录任务加载信息
///
/// # 参数
/// - `total`: 待处理任务数
/// - `skipped`: 已有结果而跳过的条目数
pub fn log_tasks_loaded(total: usize, skipped: usize) {
    info!("✓ 找到 {} 个待处理的任务", total);
    if skipped > 0 {
        info!("⏭ 跳过 {} 个已处理的条目", skipped);
    }
}

/// 记录 worker 开始信息
pub fn log_worker_start(worker_id: usize, first: u64, last: u64, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 worker {} 开始处理", worker_id);
    info!("📄 任务 #{}-#{} / 共 {} 个", first, last, total);
    info!("{}", "=".repeat(60));
}

/// 记录 worker 完成信息
pub fn log_worker_complete(worker_id: usize, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ worker {} 完成: 成功 {}/{}", worker_id, success, total);
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("水彩风格的猫", 2), "水彩...");
    }
}
