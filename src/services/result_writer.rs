//! 结果写入服务 - 业务能力层
//!
//! 只负责"把生成图落盘"能力，不关心流程

use chrono::Local;
use image::imageops::FilterType;
use image::ImageFormat;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::FailureReason;
use crate::models::task::Task;

pub const OUTPUT_FILE: &str = "output.png";
pub const STATUS_FILE: &str = "status.json";

/// 结果写入服务
///
/// 职责：
/// - 解码生成图并缩放到源图尺寸
/// - 原子写入 `<output>/<name>/output.png`
/// - 成功后写 status.json
pub struct ResultWriter {
    output_root: PathBuf,
}

/// status.json 内容
#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    task_id: u64,
    name: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    output: &'a Path,
    attempts: u32,
    processing_secs: f64,
    finished_at: String,
}

impl ResultWriter {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// 任务的输出目录
    pub fn slot(&self, name: &str) -> PathBuf {
        self.output_root.join(name)
    }

    /// 该条目是否已有完整结果（用于跳过已处理的数据）
    pub fn is_complete(&self, name: &str) -> bool {
        let slot = self.slot(name);
        let output_ok = fs::metadata(slot.join(OUTPUT_FILE))
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        output_ok && slot.join(STATUS_FILE).is_file()
    }

    /// 解码、缩放并写入生成图，返回输出路径
    ///
    /// 输出尺寸与源图严格一致；写入先落到 `.part` 再改名，
    /// 中途失败不会留下半张图。
    pub fn save(&self, task: &Task, bytes: &[u8]) -> Result<PathBuf, FailureReason> {
        if bytes.is_empty() {
            warn!("[任务 {}] 生成图为空", task.id);
            return Err(FailureReason::DecodeError);
        }

        let decoded = image::load_from_memory(bytes).map_err(|e| {
            warn!("[任务 {}] 生成图解码失败: {}", task.id, e);
            FailureReason::DecodeError
        })?;

        if task.width == 0 || task.height == 0 {
            warn!("[任务 {}] 源图尺寸非法: {}x{}", task.id, task.width, task.height);
            return Err(FailureReason::ResizeError);
        }

        let resized = decoded.resize_exact(task.width, task.height, FilterType::Lanczos3);
        if (resized.width(), resized.height()) != (task.width, task.height) {
            return Err(FailureReason::ResizeError);
        }
        debug!(
            "[任务 {}] 缩放 {}x{} → {}x{}",
            task.id,
            decoded.width(),
            decoded.height(),
            task.width,
            task.height
        );

        let slot = self.slot(&task.name);
        fs::create_dir_all(&slot).map_err(|e| {
            warn!("[任务 {}] 创建输出目录失败 {}: {}", task.id, slot.display(), e);
            FailureReason::WriteError
        })?;

        let target = slot.join(OUTPUT_FILE);
        let part = slot.join(format!("{}.part", OUTPUT_FILE));
        let written = resized
            .save_with_format(&part, ImageFormat::Png)
            .map_err(|e| e.to_string())
            .and_then(|_| fs::rename(&part, &target).map_err(|e| e.to_string()));

        if let Err(e) = written {
            warn!("[任务 {}] 写入结果失败 {}: {}", task.id, target.display(), e);
            let _ = fs::remove_file(&part);
            return Err(FailureReason::WriteError);
        }

        Ok(target)
    }

    /// 写入成功任务的元数据
    ///
    /// status.json 是续跑时判断"已完成"的依据；写不进去时删掉 output.png，
    /// 让该条目保持未完成状态。
    pub fn write_status(&self, task: &Task, output: &Path, processing_secs: f64) -> Result<(), FailureReason> {
        let record = StatusRecord {
            task_id: task.id,
            name: &task.name,
            prompt: &task.prompt,
            width: task.width,
            height: task.height,
            output,
            attempts: task.attempts,
            processing_secs,
            finished_at: Local::now().to_rfc3339(),
        };
        let path = self.slot(&task.name).join(STATUS_FILE);
        let written = serde_json::to_string_pretty(&record)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));

        if let Err(e) = written {
            warn!("[任务 {}] 写入 {} 失败: {}", task.id, path.display(), e);
            let _ = fs::remove_file(output);
            return Err(FailureReason::WriteError);
        }
        Ok(())
    }
}
