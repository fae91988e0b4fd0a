//! 应用共享状态

use tokio_util::sync::CancellationToken;

use crate::models::{MarketStatistics, Stock, ZtInfo};
use crate::services::jobs::Fetcher;
use crate::services::scheduler::Scheduler;
use crate::storage::{Database, EntityKind, Repository};

/// 各 handler 通过 `web::Data<AppState>` 共享
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub fetcher: Fetcher,
    pub scheduler: Scheduler,
    pub stocks: Repository<Stock>,
    pub zt: Repository<ZtInfo>,
    pub statistics: Repository<MarketStatistics>,
    /// 进程退出时取消，即时查询挂在它下面
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: Database, fetcher: Fetcher, scheduler: Scheduler) -> Self {
        let shutdown = scheduler.cancel_token().clone();
        Self {
            stocks: Repository::new(db.clone(), EntityKind::STOCK),
            zt: Repository::new(db.clone(), EntityKind::ZT_INFO),
            statistics: Repository::new(db.clone(), EntityKind::MARKET_STATISTICS),
            db,
            fetcher,
            scheduler,
            shutdown,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// 内存数据库 + 指定接口地址，调度器里不挂任务
    pub fn for_tests(endpoints: crate::services::wencai::Endpoints) -> Self {
        use std::sync::Arc;

        use crate::config::WencaiConfig;
        use crate::services::wencai::{StaticTokenProvider, WencaiClient};

        let db = Database::open_in_memory().unwrap();
        let client = WencaiClient::new(
            reqwest::Client::new(),
            endpoints,
            Arc::new(StaticTokenProvider("t".to_string())),
        );
        let settings = WencaiConfig {
            cookie: "v=default".to_string(),
            retry: 1,
            ..Default::default()
        };
        let scheduler = Scheduler::builder(false).build(CancellationToken::new());
        Self::new(db, Fetcher::new(client, settings, false), scheduler)
    }
}
