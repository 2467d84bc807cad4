//! 运行报告
//!
//! 汇总全部 Outcome 和统计数据，写成 `run_report_<时间戳>.json`。

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::task::{Outcome, WorkerAssignment};

/// 统计数据
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 已有结果而跳过的条目（不在 outcomes 里）
    pub skipped: usize,
    /// 成功任务的平均耗时（秒）
    pub avg_success_secs: f64,
    /// 按总耗时折算的每小时成功数
    pub hourly_rate: f64,
    pub total_secs: f64,
    pub failures_by_reason: BTreeMap<String, usize>,
}

impl RunStats {
    pub fn from_outcomes(outcomes: &[Outcome], skipped: usize, total_secs: f64) -> Self {
        let mut stats = RunStats {
            total: outcomes.len(),
            skipped,
            total_secs,
            ..Default::default()
        };

        let mut success_secs = 0.0;
        for outcome in outcomes {
            if outcome.succeeded() {
                stats.succeeded += 1;
                success_secs += outcome.processing_secs;
            } else {
                stats.failed += 1;
                let reason = outcome
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                *stats.failures_by_reason.entry(reason).or_default() += 1;
            }
        }

        if stats.succeeded > 0 {
            stats.avg_success_secs = success_secs / stats.succeeded as f64;
        }
        if total_secs > 0.0 {
            stats.hourly_rate = stats.succeeded as f64 * 3600.0 / total_secs;
        }
        stats
    }
}

/// 最终运行报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub assignments: Vec<WorkerAssignment>,
    /// 首个任务前未能登录的 worker
    pub auth_failures: Vec<usize>,
    pub stats: RunStats,
    /// 按任务编号排序，每个任务恰好一条
    pub outcomes: Vec<Outcome>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Local>,
        assignments: Vec<WorkerAssignment>,
        auth_failures: Vec<usize>,
        outcomes: Vec<Outcome>,
        skipped: usize,
    ) -> Self {
        let finished_at = Local::now();
        let total_secs = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            stats: RunStats::from_outcomes(&outcomes, skipped, total_secs),
            started_at,
            finished_at,
            assignments,
            auth_failures,
            outcomes,
        }
    }

    /// 切分为空或有 worker 登录失败时，进程应以非零状态退出
    pub fn is_success(&self) -> bool {
        self.stats.total > 0 && self.auth_failures.is_empty()
    }

    /// 写入输出目录，返回报告路径
    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;
        let path = output_dir.join(format!(
            "run_report_{}.json",
            self.finished_at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("无法写入运行报告: {}", path.display()))?;
        Ok(path)
    }

    /// 打印最终统计信息
    pub fn log_summary(&self, log_file_path: &str) {
        let stats = &self.stats;
        info!("\n{}", "=".repeat(60));
        info!("📊 全部处理完成统计");
        info!("完成时间: {}", self.finished_at.format("%Y-%m-%d %H:%M:%S"));
        info!("{}", "=".repeat(60));
        info!("✅ 成功: {}/{}", stats.succeeded, stats.total);
        info!("❌ 失败: {}", stats.failed);
        for (reason, count) in &stats.failures_by_reason {
            info!("   - {}: {}", reason, count);
        }
        if stats.skipped > 0 {
            info!("⏭ 跳过: {}", stats.skipped);
        }
        info!("⏱ 平均耗时: {:.1}s", stats.avg_success_secs);
        info!("⚡ 速率: {:.1} 个/小时", stats.hourly_rate);
        info!("🕒 总耗时: {:.1} 分钟", stats.total_secs / 60.0);
        if !self.auth_failures.is_empty() {
            warn!("🔐 登录失败的 worker: {:?}", self.auth_failures);
        }
        info!("{}", "=".repeat(60));
        info!("\n日志已保存至: {}", log_file_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::models::task::TaskStatus;
    use tempfile::tempdir;

    fn outcome(task_id: u64, reason: Option<FailureReason>, secs: f64) -> Outcome {
        Outcome {
            task_id,
            name: format!("{:04}", task_id),
            worker_id: 0,
            status: if reason.is_some() {
                TaskStatus::Failed
            } else {
                TaskStatus::Succeeded
            },
            reason,
            output_path: None,
            retries: 0,
            processing_secs: secs,
            trail: Vec::new(),
        }
    }

    #[test]
    fn test_stats() {
        let outcomes = vec![
            outcome(1, None, 10.0),
            outcome(2, None, 20.0),
            outcome(3, Some(FailureReason::GenerationTimeout), 99.0),
        ];
        let stats = RunStats::from_outcomes(&outcomes, 4, 3600.0);
        assert_eq!((stats.total, stats.succeeded, stats.failed, stats.skipped), (3, 2, 1, 4));
        assert!((stats.avg_success_secs - 15.0).abs() < f64::EPSILON);
        assert!((stats.hourly_rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.failures_by_reason.get("generation_timeout"), Some(&1));
    }

    #[test]
    fn test_exit_status_and_write() {
        let dir = tempdir().unwrap();
        let report = RunReport::new(Local::now(), Vec::new(), Vec::new(), vec![outcome(1, None, 1.0)], 0);
        assert!(report.is_success());
        let path = report.write(dir.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "succeeded");

        let empty = RunReport::new(Local::now(), Vec::new(), Vec::new(), Vec::new(), 3);
        assert!(!empty.is_success());

        let auth = RunReport::new(Local::now(), Vec::new(), vec![1], vec![outcome(1, None, 1.0)], 0);
        assert!(!auth.is_success());
    }
}
