//! 问财选股数据后端服务
//!
//! 定时从问财（iwencai）拉取竞价、基础和涨停数据写入 SQLite，
//! 并提供即时查询和已入库数据的 RESTful API

mod config;     // 配置
mod error;      // 错误类型
mod handlers;   // HTTP 请求处理器
mod middleware; // 中间件
mod models;     // 数据模型定义
mod services;   // 业务逻辑服务
mod state;      // 共享状态
mod storage;    // SQLite 持久化

use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::middleware::ApiKeyMiddleware;
use crate::services::jobs::{BaseInfoJob, Fetcher, StockJob, ZtInfoJob};
use crate::services::scheduler::Scheduler;
use crate::services::wencai::{ScriptTokenProvider, StaticTokenProvider, TokenProvider, WencaiClient};
use crate::state::AppState;
use crate::storage::Database;

fn build_scheduler(
    config: &AppConfig,
    fetcher: &Fetcher,
    db: &Database,
    cancel: CancellationToken,
) -> anyhow::Result<Scheduler> {
    let jobs = &config.scheduler;
    let scheduler = Scheduler::builder(jobs.run_on_start)
        .job(
            Arc::new(StockJob::new(fetcher.clone(), db.clone(), jobs.stock.query.clone())),
            &jobs.stock.cron,
            jobs.stock.enabled,
        )?
        .job(
            Arc::new(BaseInfoJob::new(fetcher.clone(), db.clone(), jobs.base_info.query.clone())),
            &jobs.base_info.cron,
            jobs.base_info.enabled,
        )?
        .job(
            Arc::new(ZtInfoJob::new(fetcher.clone(), db.clone(), jobs.zt_info.query.clone())),
            &jobs.zt_info.cron,
            jobs.zt_info.enabled,
        )?
        .build(cancel);
    Ok(scheduler)
}

fn build_state(config: &AppConfig, cancel: CancellationToken) -> anyhow::Result<AppState> {
    let db = Database::open(&config.database.path)?;
    log::info!("数据库已打开: {}", config.database.path);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .connect_timeout(Duration::from_secs(config.api.connect_timeout_secs))
        .gzip(true)
        .build()?;

    let token: Arc<dyn TokenProvider> = if config.wencai.token.is_empty() {
        Arc::new(ScriptTokenProvider::new(
            config.wencai.token_program.clone(),
            config.wencai.token_script.clone(),
        ))
    } else {
        Arc::new(StaticTokenProvider(config.wencai.token.clone()))
    };

    let client = WencaiClient::new(http, config.wencai.endpoints.clone(), token);
    let fetcher = Fetcher::new(client, config.wencai.clone(), config.debug);
    let scheduler = build_scheduler(config, &fetcher, &db, cancel)?;

    Ok(AppState::new(db, fetcher, scheduler))
}

/// 应用程序入口
///
/// 启动调度器和 HTTP 服务器，收到退出信号后停止所有任务
#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            env_logger::init_from_env(Env::default().default_filter_or("info"));
            log::error!("{:#}", e);
            return Err(io::Error::other(format!("{:#}", e)));
        }
    };

    // RUST_LOG 优先，否则使用配置中的级别
    env_logger::init_from_env(Env::default().default_filter_or(config.log.level.as_str()));
    log::info!("配置加载完成，日志级别 {}", config.log.level);

    if config.api.api_key.is_empty() {
        log::warn!("未设置 API Key，接口不做认证");
    }
    if config.wencai.cookie.is_empty() {
        log::warn!("未设置问财 Cookie，定时任务将无法查询");
    }

    let cancel = CancellationToken::new();
    let state = build_state(&config, cancel.clone()).map_err(|e| {
        log::error!("初始化失败: {:#}", e);
        io::Error::other(format!("{:#}", e))
    })?;

    state.scheduler.start();

    let bind_addr = config.bind_addr();
    log::info!("启动问财数据服务，监听 {}", bind_addr);

    let api_key = config.api.api_key.clone();
    let data = web::Data::new(state);
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default()) // 请求日志
            .wrap(ApiKeyMiddleware::new(api_key.clone())) // API Key 认证
            .configure(handlers::config) // 配置路由
    });
    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    let result = server.bind(&bind_addr)?.run().await;

    log::info!("服务退出，停止调度任务");
    cancel.cancel();
    result
}
