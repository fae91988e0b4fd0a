//! SQLite 持久化
//!
//! - entity: 实体与数据行之间的映射
//! - reconcile: 按 (code, trade_date) 合并一批数据的对账引擎
//! - repository: 每类实体的存取接口

pub mod entity;
pub mod reconcile;
pub mod repository;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::PersistenceError;

pub use entity::{Entity, NaturalKey};
pub use reconcile::{EntityKind, ReconcileReport};
pub use repository::{ListFilter, Repository};

const CREATE_TABLES_SQL: &str = r#"
-- 竞价选股
CREATE TABLE IF NOT EXISTS zp_jj (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    market_code TEXT NOT NULL DEFAULT '',
    stock_code TEXT NOT NULL DEFAULT '',
    stock_name TEXT NOT NULL DEFAULT '',
    latest_price REAL NOT NULL DEFAULT 0,
    latest_change_rate REAL NOT NULL DEFAULT 0,
    auction_unmatched_amount INTEGER NOT NULL DEFAULT 0,
    auction_unmatched_amount_str TEXT NOT NULL DEFAULT '',
    auction_unmatched_amount_rank TEXT NOT NULL DEFAULT '',
    auction_unmatched_amount_rank_num INTEGER NOT NULL DEFAULT 0,
    auction_change_rate REAL NOT NULL DEFAULT 0,
    morning_auction_amount INTEGER NOT NULL DEFAULT 0,
    morning_auction_amount_str TEXT NOT NULL DEFAULT '',
    turnover REAL NOT NULL DEFAULT 0,
    turnover_str TEXT NOT NULL DEFAULT '',
    circulation_market_value REAL NOT NULL DEFAULT 0,
    limit_up_reason TEXT NOT NULL DEFAULT '',
    company_highlights TEXT NOT NULL DEFAULT '',
    industry_category TEXT NOT NULL DEFAULT '',
    concept_theme TEXT NOT NULL DEFAULT '',
    limit_up_seal_amount INTEGER NOT NULL DEFAULT 0,
    limit_up_seal_amount_str TEXT NOT NULL DEFAULT '',
    consecutive_limit_days INTEGER NOT NULL DEFAULT 0,
    trade_date TEXT NOT NULL,
    create_time TEXT DEFAULT CURRENT_TIMESTAMP,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(code, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_zp_jj_trade_date ON zp_jj(trade_date DESC);

-- 基础数据快照，每次全量刷新
CREATE TABLE IF NOT EXISTS base_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    market_code TEXT NOT NULL DEFAULT '',
    stock_code TEXT NOT NULL DEFAULT '',
    stock_name TEXT NOT NULL DEFAULT '',
    latest_price REAL NOT NULL DEFAULT 0,
    latest_change_rate REAL NOT NULL DEFAULT 0,
    auction_change_rate REAL NOT NULL DEFAULT 0,
    morning_auction_amount INTEGER NOT NULL DEFAULT 0,
    morning_auction_amount_str TEXT NOT NULL DEFAULT '',
    auction_unmatched_amount INTEGER NOT NULL DEFAULT 0,
    auction_unmatched_amount_str TEXT NOT NULL DEFAULT '',
    turnover REAL NOT NULL DEFAULT 0,
    turnover_str TEXT NOT NULL DEFAULT '',
    circulation_market_value REAL NOT NULL DEFAULT 0,
    circulation_market_value_str TEXT NOT NULL DEFAULT '',
    company_highlights TEXT NOT NULL DEFAULT '',
    industry_category TEXT NOT NULL DEFAULT '',
    concept_theme TEXT NOT NULL DEFAULT '',
    consecutive_limit_days INTEGER NOT NULL DEFAULT 0,
    trade_date TEXT NOT NULL,
    create_time TEXT DEFAULT CURRENT_TIMESTAMP,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(code, trade_date)
);

-- 基础数据历史
CREATE TABLE IF NOT EXISTS base_info_day (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    market_code TEXT NOT NULL DEFAULT '',
    stock_code TEXT NOT NULL DEFAULT '',
    stock_name TEXT NOT NULL DEFAULT '',
    latest_price REAL NOT NULL DEFAULT 0,
    latest_change_rate REAL NOT NULL DEFAULT 0,
    auction_change_rate REAL NOT NULL DEFAULT 0,
    morning_auction_amount INTEGER NOT NULL DEFAULT 0,
    morning_auction_amount_str TEXT NOT NULL DEFAULT '',
    auction_unmatched_amount INTEGER NOT NULL DEFAULT 0,
    auction_unmatched_amount_str TEXT NOT NULL DEFAULT '',
    turnover REAL NOT NULL DEFAULT 0,
    turnover_str TEXT NOT NULL DEFAULT '',
    circulation_market_value REAL NOT NULL DEFAULT 0,
    circulation_market_value_str TEXT NOT NULL DEFAULT '',
    company_highlights TEXT NOT NULL DEFAULT '',
    industry_category TEXT NOT NULL DEFAULT '',
    concept_theme TEXT NOT NULL DEFAULT '',
    consecutive_limit_days INTEGER NOT NULL DEFAULT 0,
    trade_date TEXT NOT NULL,
    create_time TEXT DEFAULT CURRENT_TIMESTAMP,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(code, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_base_info_day_trade_date ON base_info_day(trade_date DESC);

-- 涨停数据
CREATE TABLE IF NOT EXISTS zt_day (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    market_code TEXT NOT NULL DEFAULT '',
    stock_code TEXT NOT NULL DEFAULT '',
    stock_name TEXT NOT NULL DEFAULT '',
    latest_price REAL NOT NULL DEFAULT 0,
    latest_change_rate REAL NOT NULL DEFAULT 0,
    auction_change_rate REAL NOT NULL DEFAULT 0,
    morning_auction_amount INTEGER NOT NULL DEFAULT 0,
    morning_auction_amount_str TEXT NOT NULL DEFAULT '',
    auction_unmatched_amount INTEGER NOT NULL DEFAULT 0,
    auction_unmatched_amount_str TEXT NOT NULL DEFAULT '',
    turnover REAL NOT NULL DEFAULT 0,
    turnover_str TEXT NOT NULL DEFAULT '',
    circulation_market_value REAL NOT NULL DEFAULT 0,
    limit_up_reason TEXT NOT NULL DEFAULT '',
    company_highlights TEXT NOT NULL DEFAULT '',
    industry_category TEXT NOT NULL DEFAULT '',
    concept_theme TEXT NOT NULL DEFAULT '',
    limit_up_seal_amount INTEGER NOT NULL DEFAULT 0,
    limit_up_seal_amount_str TEXT NOT NULL DEFAULT '',
    consecutive_limit_days INTEGER NOT NULL DEFAULT 0,
    limit_down INTEGER NOT NULL DEFAULT 0,
    trade_date TEXT NOT NULL,
    create_time TEXT DEFAULT CURRENT_TIMESTAMP,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(code, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_zt_day_trade_date ON zt_day(trade_date DESC);

-- 市场统计
CREATE TABLE IF NOT EXISTS market_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    limit_up_count INTEGER NOT NULL DEFAULT 0,
    limit_down_count INTEGER NOT NULL DEFAULT 0,
    broken_count INTEGER NOT NULL DEFAULT 0,
    max_consecutive_days INTEGER NOT NULL DEFAULT 0,
    two_consecutive_count INTEGER NOT NULL DEFAULT 0,
    create_time TEXT DEFAULT CURRENT_TIMESTAMP,
    update_time TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(code, trade_date)
);
"#;

/// 共享的 SQLite 连接
///
/// 所有访问都在同一把锁下同步执行，事务内不跨越 `.await`。
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// 内存数据库，用于测试
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在连接上执行一段同步操作
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError>,
    {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }

    /// 连通性检查
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
