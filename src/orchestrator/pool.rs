//! Worker 池 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责任务切分、并发调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：加载交互配置、叠加运行参数
//! 2. **任务加载**：扫描数据集，跳过已有结果的条目
//! 3. **任务切分**：一次性切成 N 个互不相交的连续切片
//! 4. **并发执行**：每个 worker 一个 tokio 任务，各自独占会话
//! 5. **崩溃隔离**：worker panic 只影响自己切片里没上报的任务
//! 6. **取消**：运行超时或 Ctrl-C 时取消所有进行中的任务
//! 7. **全局统计**：汇总每个任务的 Outcome
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个任务的细节
//! - **只读共享**：worker 之间只共享只读配置和切分结果

use anyhow::{Context, Result};
use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, FailureReason};
use crate::infrastructure::chrome_engine::ChromeFactory;
use crate::infrastructure::engine::EngineFactory;
use crate::infrastructure::session::ActionPacing;
use crate::models::interaction_config::CalibrationLock;
use crate::models::task::{Outcome, Task, WorkerAssignment};
use crate::models::{load_dataset, InteractionConfig};
use crate::orchestrator::partition::partition;
use crate::orchestrator::report::RunReport;
use crate::orchestrator::worker::{run_worker, WorkerShared};
use crate::services::{CalibratedElement, Calibrator, ResultWriter};
use crate::utils::logging::{log_startup, log_tasks_loaded};
use crate::workflow::InteractionFlow;

/// 一次池运行的结果
#[derive(Debug)]
pub struct PoolRun {
    pub assignments: Vec<WorkerAssignment>,
    pub auth_failures: Vec<usize>,
    /// 按任务编号排序
    pub outcomes: Vec<Outcome>,
}

/// Worker 池
pub struct WorkerPool {
    config: Arc<InteractionConfig>,
    factory: Arc<dyn EngineFactory>,
    writer: Arc<ResultWriter>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        config: Arc<InteractionConfig>,
        factory: Arc<dyn EngineFactory>,
        writer: Arc<ResultWriter>,
    ) -> Self {
        Self {
            config,
            factory,
            writer,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消令牌（外部中断时调用 `cancel()`）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 切分并处理任务，等待所有 worker 结束
    pub async fn run(&self, tasks: Vec<Task>, run_timeout: Option<Duration>) -> Result<PoolRun> {
        let ids: Vec<u64> = tasks.iter().map(|t| t.id).collect();
        let assignments = partition(&ids, self.config.concurrency, self.config.max_items_per_worker);
        let mut by_id: HashMap<u64, Task> = tasks.into_iter().map(|t| (t.id, t)).collect();

        let timing = &self.config.timing;
        let shared = Arc::new(WorkerShared {
            flow: InteractionFlow::new(Arc::clone(&self.config), Arc::clone(&self.writer))?,
            factory: Arc::clone(&self.factory),
            pacing: ActionPacing::new(timing.action_delay_min_ms, timing.action_delay_max_ms),
            reauth_check_every: self.config.reauth_check_every,
            cancel: self.cancel.clone(),
        });

        // 每个切片的任务副本，崩溃时用来补齐结果
        let mut slices: Vec<(usize, Vec<Task>)> = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let slice: Vec<Task> = assignment
                .task_ids
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect();
            slices.push((assignment.worker_id, slice));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for (worker_id, slice) in &slices {
            if slice.is_empty() {
                continue;
            }
            let handle = tokio::spawn(run_worker(
                *worker_id,
                slice.clone(),
                Arc::clone(&shared),
                tx.clone(),
            ));
            handles.push((*worker_id, handle));
        }
        drop(tx);

        let watchdog = run_timeout.map(|limit| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        warn!("⏰ 运行超时（{} 秒），取消剩余任务", limit.as_secs());
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        });

        // ========== 等待所有 worker ==========
        let mut auth_failures = Vec::new();
        for (worker_id, handle) in handles {
            match handle.await {
                Ok(summary) => {
                    if summary.auth_failed {
                        auth_failures.push(worker_id);
                    }
                }
                Err(e) => error!("[worker {}] 💥 worker 崩溃: {}", worker_id, e),
            }
        }
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let mut outcomes: BTreeMap<u64, Outcome> = BTreeMap::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.entry(outcome.task_id).or_insert(outcome);
        }

        // 崩溃的 worker 没来得及上报的任务
        for (worker_id, slice) in &slices {
            for task in slice {
                outcomes.entry(task.id).or_insert_with(|| {
                    Outcome::failed_without_run(task, *worker_id, FailureReason::WorkerCrash)
                });
            }
        }

        Ok(PoolRun {
            assignments,
            auth_failures,
            outcomes: outcomes.into_values().collect(),
        })
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    interaction: InteractionConfig,
}

impl App {
    /// 初始化应用：加载持久化配置并叠加运行参数
    pub fn initialize(config: Config) -> Result<Self> {
        let mut interaction = InteractionConfig::load(&config.config_path)?;
        config.apply_to(&mut interaction);

        if interaction.concurrency == 0 {
            return Err(AppError::invalid_config("concurrency", "至少需要 1 个 worker").into());
        }
        if config.browser_debug_port.is_some() && interaction.concurrency > 1 {
            return Err(AppError::invalid_config(
                "debug_port",
                "连接已有浏览器时只能使用 1 个 worker",
            )
            .into());
        }

        Ok(Self {
            config,
            interaction,
        })
    }

    fn chrome_factory(&self, headless: bool) -> Arc<dyn EngineFactory> {
        Arc::new(ChromeFactory {
            profile_root: self.interaction.browser_profile.clone(),
            headless,
            target_url: self.interaction.target_url.clone(),
            debug_port: self.config.browser_debug_port,
        })
    }

    /// 使用真实浏览器运行
    pub async fn run(&self) -> Result<RunReport> {
        self.run_with(self.chrome_factory(self.interaction.headless)).await
    }

    /// 使用指定的引擎工厂运行
    pub async fn run_with(&self, factory: Arc<dyn EngineFactory>) -> Result<RunReport> {
        CalibrationLock::ensure_unlocked(&self.config.config_path)?;

        let started_at = Local::now();
        log_startup(
            self.interaction.concurrency,
            self.interaction.max_items_per_worker,
            self.interaction.use_coordinates,
        );

        info!("\n📁 正在扫描数据集: {}", self.interaction.dataset_dir.display());
        let writer = Arc::new(ResultWriter::new(self.interaction.output_dir.clone()));
        let all_tasks = load_dataset(&self.interaction.dataset_dir).await?;
        let (done, pending): (Vec<Task>, Vec<Task>) = all_tasks
            .into_iter()
            .partition(|task| writer.is_complete(&task.name));
        log_tasks_loaded(pending.len(), done.len());

        if pending.is_empty() {
            warn!("⚠️ 没有待处理的任务，程序结束");
        }

        let pool = WorkerPool::new(Arc::new(self.interaction.clone()), factory, writer);

        let cancel = pool.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 收到中断信号，取消进行中的任务...");
                cancel.cancel();
            }
        });

        let run = pool.run(pending, self.config.run_timeout()).await;
        interrupt.abort();
        let run = run?;

        let report = RunReport::new(
            started_at,
            run.assignments,
            run.auth_failures,
            run.outcomes,
            done.len(),
        );
        let path = report
            .write(&self.interaction.output_dir)
            .context("写入运行报告失败")?;
        report.log_summary(&self.config.output_log_file);
        info!("📝 运行报告: {}", path.display());
        Ok(report)
    }

    /// 标定模式（使用真实浏览器，必须有界面）
    pub async fn calibrate(&self) -> Result<Vec<CalibratedElement>> {
        self.calibrate_with(self.chrome_factory(false).as_ref()).await
    }

    pub async fn calibrate_with(&self, factory: &dyn EngineFactory) -> Result<Vec<CalibratedElement>> {
        // 写回的是文件里的配置，运行参数不落盘
        let persisted = InteractionConfig::load(&self.config.config_path)?;
        let calibrator = Calibrator::begin(&self.config.config_path, persisted)?;
        calibrator.run(factory).await
    }
}
