//! 同步任务
//!
//! 每个任务：按配置的问句全量翻页查询 → 转换为实体 → 对账写库。
//! 只要有一页失败，本次运行就算失败，什么都不写。

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::WencaiConfig;
use crate::models::{BaseInfo, MarketStatistics, Stock, ZtInfo};
use crate::services::fields::Record;
use crate::services::projection::{
    market_statistics, project_base_info, project_stocks, project_zt_info, trade_date_today,
};
use crate::services::wencai::{PageLoop, QueryRequest, QueryResult, WencaiClient};
use crate::storage::{Database, EntityKind, ReconcileReport, Repository};

/// 一次任务运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub trade_date: NaiveDate,
    /// 查询到的原始记录数
    pub fetched: usize,
    /// 各表的写入结果
    pub tables: Vec<TableReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    #[serde(flatten)]
    pub report: ReconcileReport,
}

impl TableReport {
    fn new(kind: &EntityKind, report: ReconcileReport) -> Self {
        Self {
            table: kind.table,
            report,
        }
    }
}

/// 可被调度的同步任务
#[async_trait]
pub trait SyncJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<JobReport>;
}

/// 任务共享的查询环境
#[derive(Clone)]
pub struct Fetcher {
    client: WencaiClient,
    settings: WencaiConfig,
    /// 透传给每次查询，由客户端输出结果
    debug: bool,
}

impl Fetcher {
    pub fn new(client: WencaiClient, settings: WencaiConfig, debug: bool) -> Self {
        Self {
            client,
            settings,
            debug,
        }
    }

    pub fn client(&self) -> &WencaiClient {
        &self.client
    }

    pub fn settings(&self) -> &WencaiConfig {
        &self.settings
    }

    /// 按全局配置补齐一次查询的参数
    pub fn request(&self, query: &str) -> QueryRequest {
        let mut req = QueryRequest::new(query, self.settings.cookie.clone());
        req.per_page = self.settings.per_page;
        req.retry = self.settings.retry;
        req.sleep_ms = self.settings.sleep_ms;
        req.pro = self.settings.pro;
        req.debug = self.debug;
        if !self.settings.user_agent.is_empty() {
            req.user_agent = Some(self.settings.user_agent.clone());
        }
        req
    }

    /// 全量翻页获取表格数据
    pub async fn fetch_all(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Record>> {
        let req = self.request(query).with_loop(PageLoop::Flag(true));
        let result = self.client.get(&req, cancel).await.context("查询失败")?;

        let records = match result {
            QueryResult::Records(paged) => {
                if let Some(err) = &paged.error {
                    log::warn!(
                        "分页查询中断，已获取 {} 页 {} 条，本次不写库",
                        paged.pages,
                        paged.records.len()
                    );
                    return Err(anyhow!("查询失败: {}", err));
                }
                paged.records
            }
            QueryResult::Answer(_) | QueryResult::Empty => bail!("返回的不是表格数据"),
        };

        if records.is_empty() {
            bail!("没有数据");
        }
        Ok(records)
    }
}

/// 竞价选股 → zp_jj
pub struct StockJob {
    fetcher: Fetcher,
    query: String,
    repo: Repository<Stock>,
}

impl StockJob {
    pub fn new(fetcher: Fetcher, db: Database, query: impl Into<String>) -> Self {
        Self {
            fetcher,
            query: query.into(),
            repo: Repository::new(db, EntityKind::STOCK),
        }
    }
}

#[async_trait]
impl SyncJob for StockJob {
    fn name(&self) -> &'static str {
        "stock"
    }

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<JobReport> {
        log::info!("开始查询股票数据...");
        let trade_date = trade_date_today();
        let records = self.fetcher.fetch_all(&self.query, cancel).await?;

        let stocks = project_stocks(&records, trade_date);
        log::info!("查询到 {} 条股票数据", stocks.len());

        let report = self.repo.batch_save(stocks).await.context("保存数据失败")?;
        Ok(JobReport {
            job: self.name(),
            trade_date,
            fetched: records.len(),
            tables: vec![TableReport::new(self.repo.kind(), report)],
        })
    }
}

/// 基础数据 → base_info（快照）+ base_info_day（历史）
pub struct BaseInfoJob {
    fetcher: Fetcher,
    query: String,
    snapshot: Repository<BaseInfo>,
    history: Repository<BaseInfo>,
}

impl BaseInfoJob {
    pub fn new(fetcher: Fetcher, db: Database, query: impl Into<String>) -> Self {
        Self {
            fetcher,
            query: query.into(),
            snapshot: Repository::new(db.clone(), EntityKind::BASE_INFO),
            history: Repository::new(db, EntityKind::BASE_INFO_DAY),
        }
    }
}

#[async_trait]
impl SyncJob for BaseInfoJob {
    fn name(&self) -> &'static str {
        "base_info"
    }

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<JobReport> {
        log::info!("开始查询基础数据...");
        let trade_date = trade_date_today();
        let records = self.fetcher.fetch_all(&self.query, cancel).await?;

        let infos = project_base_info(&records, trade_date);
        log::info!("查询到 {} 条基础数据", infos.len());

        let history = self
            .history
            .batch_save(infos.clone())
            .await
            .context("保存 base_info_day 失败")?;
        let snapshot = self
            .snapshot
            .batch_save(infos)
            .await
            .context("保存 base_info 失败")?;

        Ok(JobReport {
            job: self.name(),
            trade_date,
            fetched: records.len(),
            tables: vec![
                TableReport::new(self.snapshot.kind(), snapshot),
                TableReport::new(self.history.kind(), history),
            ],
        })
    }
}

/// 涨停数据 → zt_day，并汇总当天的 market_statistics
pub struct ZtInfoJob {
    fetcher: Fetcher,
    query: String,
    zt: Repository<ZtInfo>,
    statistics: Repository<MarketStatistics>,
}

impl ZtInfoJob {
    pub fn new(fetcher: Fetcher, db: Database, query: impl Into<String>) -> Self {
        Self {
            fetcher,
            query: query.into(),
            zt: Repository::new(db.clone(), EntityKind::ZT_INFO),
            statistics: Repository::new(db, EntityKind::MARKET_STATISTICS),
        }
    }
}

#[async_trait]
impl SyncJob for ZtInfoJob {
    fn name(&self) -> &'static str {
        "zt_info"
    }

    async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<JobReport> {
        log::info!("开始查询涨停数据...");
        let trade_date = trade_date_today();
        let records = self.fetcher.fetch_all(&self.query, cancel).await?;

        let infos = project_zt_info(&records, trade_date);
        log::info!("查询到 {} 条涨停数据", infos.len());

        let stats = market_statistics(&infos, trade_date);
        log::info!(
            "市场统计: 涨停 {}, 跌停 {}, 开板 {}, 连板高度 {}, 二连板 {}",
            stats.limit_up_count,
            stats.limit_down_count,
            stats.broken_count,
            stats.max_consecutive_days,
            stats.two_consecutive_count
        );

        let zt = self.zt.batch_save(infos).await.context("保存涨停数据失败")?;
        let statistics = self
            .statistics
            .save(stats)
            .await
            .context("保存市场统计失败")?;

        Ok(JobReport {
            job: self.name(),
            trade_date,
            fetched: records.len(),
            tables: vec![
                TableReport::new(self.zt.kind(), zt),
                TableReport::new(self.statistics.kind(), statistics),
            ],
        })
    }
}
