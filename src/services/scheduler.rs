//! 定时调度
//!
//! 每个任务一个独立的循环：按北京时间计算 cron 的下一次触发点，睡到点后执行。
//! 同一任务同一时刻只允许一个实例运行，定时触发和手动触发共用同一把锁，
//! 撞上时直接跳过并记日志。任务失败只记日志，不影响后续调度。

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Asia::Shanghai;
use cron::Schedule;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::services::jobs::{JobReport, SyncJob};

/// 任务运行状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub running: bool,
    pub last_started: Option<String>,
    pub last_finished: Option<String>,
    pub last_error: Option<String>,
    pub last_report: Option<JobReport>,
    pub next_run: Option<String>,
}

struct ScheduledJob {
    job: Arc<dyn SyncJob>,
    schedule: Schedule,
    cron: String,
    enabled: bool,
    guard: Mutex<()>,
    status: RwLock<JobStatus>,
}

fn now_rfc3339() -> String {
    Utc::now().with_timezone(&Shanghai).to_rfc3339()
}

impl ScheduledJob {
    /// 执行一次。正在运行时返回 Busy
    async fn execute(&self, cancel: &CancellationToken) -> Result<JobReport, JobError> {
        let name = self.job.name();
        let Ok(_running) = self.guard.try_lock() else {
            log::warn!("任务 {} 正在执行，跳过本次触发", name);
            return Err(JobError::Busy(name.to_string()));
        };

        {
            let mut status = self.status.write().await;
            status.running = true;
            status.last_started = Some(now_rfc3339());
        }

        log::info!("任务 {} 开始执行", name);
        let result = self.job.run(cancel).await;

        let mut status = self.status.write().await;
        status.running = false;
        status.last_finished = Some(now_rfc3339());

        match result {
            Ok(report) => {
                log::info!("任务 {} 执行成功", name);
                status.last_error = None;
                status.last_report = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log::error!("任务 {} 执行失败: {}", name, message);
                status.last_error = Some(message.clone());
                Err(JobError::Failed(message))
            }
        }
    }

    /// cron 循环，直到取消
    async fn run_loop(self: Arc<Self>, cancel: CancellationToken, run_on_start: bool) {
        let name = self.job.name();

        if run_on_start {
            log::info!("启动时立即执行任务 {}", name);
            let _ = self.execute(&cancel).await;
        }

        loop {
            let now = Utc::now().with_timezone(&Shanghai);
            let Some(next) = self.schedule.after(&now).next() else {
                log::warn!("任务 {} 的 cron 表达式没有后续触发时间，退出调度", name);
                return;
            };
            self.status.write().await.next_run = Some(next.to_rfc3339());

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("任务 {} 调度已停止", name);
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let _ = self.execute(&cancel).await;
        }
    }
}

/// 任务调度器
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<Vec<Arc<ScheduledJob>>>,
    cancel: CancellationToken,
    run_on_start: bool,
}

/// 调度器构建器
pub struct SchedulerBuilder {
    jobs: Vec<Arc<ScheduledJob>>,
    run_on_start: bool,
}

impl SchedulerBuilder {
    /// 注册任务，cron 为带秒的 6 段表达式，按北京时间解释
    pub fn job(mut self, job: Arc<dyn SyncJob>, cron: &str, enabled: bool) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(cron)
            .with_context(|| format!("任务 {} 的 cron 表达式无效: {}", job.name(), cron))?;

        let status = JobStatus {
            name: job.name().to_string(),
            cron: cron.to_string(),
            enabled,
            ..Default::default()
        };
        self.jobs.push(Arc::new(ScheduledJob {
            job,
            schedule,
            cron: cron.to_string(),
            enabled,
            guard: Mutex::new(()),
            status: RwLock::new(status),
        }));
        Ok(self)
    }

    pub fn build(self, cancel: CancellationToken) -> Scheduler {
        Scheduler {
            jobs: Arc::new(self.jobs),
            cancel,
            run_on_start: self.run_on_start,
        }
    }
}

impl Scheduler {
    pub fn builder(run_on_start: bool) -> SchedulerBuilder {
        SchedulerBuilder {
            jobs: Vec::new(),
            run_on_start,
        }
    }

    /// 为每个启用的任务启动调度循环
    pub fn start(&self) {
        for entry in self.jobs.iter() {
            if !entry.enabled {
                log::info!("任务 {} 未启用", entry.job.name());
                continue;
            }
            log::info!(
                "任务 {} 已加入调度: {}",
                entry.job.name(),
                entry.cron
            );
            actix_web::rt::spawn(entry.clone().run_loop(self.cancel.clone(), self.run_on_start));
        }
    }

    /// 手动触发一次，与定时触发共用单实例锁
    pub async fn trigger(&self, name: &str) -> Result<JobReport, JobError> {
        let entry = self
            .jobs
            .iter()
            .find(|entry| entry.job.name() == name)
            .ok_or_else(|| JobError::NotFound(name.to_string()))?;
        entry.execute(&self.cancel).await
    }

    /// 所有任务的状态
    pub async fn statuses(&self) -> Vec<JobStatus> {
        let mut statuses = Vec::with_capacity(self.jobs.len());
        for entry in self.jobs.iter() {
            statuses.push(entry.status.read().await.clone());
        }
        statuses
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
