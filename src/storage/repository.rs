//! 实体仓库
//!
//! 每类实体一个 [`Repository`]，写入统一走对账引擎，一个批次一个事务。

use std::marker::PhantomData;

use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use super::entity::{from_json, row_to_json, select_columns, Entity, NaturalKey};
use super::reconcile::{reconcile, EntityKind, ReconcileReport, SqliteStore};
use super::Database;
use crate::error::PersistenceError;

/// 列表查询条件
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub code: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: u32,
    pub offset: u32,
}

impl ListFilter {
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(code) = self.code.as_ref().filter(|c| !c.is_empty()) {
            conditions.push("code = ?");
            params.push(SqlValue::Text(code.clone()));
        }
        if let Some(start) = self.start_date {
            conditions.push("trade_date >= ?");
            params.push(SqlValue::Text(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_date {
            conditions.push("trade_date <= ?");
            params.push(SqlValue::Text(end.format("%Y-%m-%d").to_string()));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

/// 某类实体的存取接口
pub struct Repository<E> {
    db: Database,
    kind: EntityKind,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            kind: self.kind,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(db: Database, kind: EntityKind) -> Self {
        Self {
            db,
            kind,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// 保存单条，始终按自然键增量合并
    pub async fn save(&self, entity: E) -> Result<ReconcileReport, PersistenceError> {
        self.write(self.kind.incremental(), vec![entity]).await
    }

    /// 批量保存，按实体类型描述选择增量合并或全量刷新
    pub async fn batch_save(&self, batch: Vec<E>) -> Result<ReconcileReport, PersistenceError> {
        self.write(self.kind, batch).await
    }

    async fn write(
        &self,
        kind: EntityKind,
        batch: Vec<E>,
    ) -> Result<ReconcileReport, PersistenceError> {
        self.db
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let report = {
                    let mut store = SqliteStore::new(&tx, kind.table);
                    reconcile(&mut store, &kind, batch)?
                };
                tx.commit()?;
                Ok(report)
            })
            .await
    }

    /// 按自然键查询
    pub async fn find_by_key(&self, key: &NaturalKey) -> Result<Option<E>, PersistenceError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE code = ? AND trade_date = ? LIMIT 1",
            select_columns::<E>(),
            self.kind.table
        );
        let params = [
            SqlValue::Text(key.code.clone()),
            SqlValue::Text(key.trade_date.format("%Y-%m-%d").to_string()),
        ];

        let rows = self
            .db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), row_to_json::<E>)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().next().map(from_json).transpose()
    }

    /// 按交易日倒序列出
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<E>, PersistenceError> {
        let (where_clause, mut params) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY trade_date DESC, id DESC LIMIT ? OFFSET ?",
            select_columns::<E>(),
            self.kind.table,
            where_clause
        );
        params.push(SqlValue::Integer(i64::from(filter.limit)));
        params.push(SqlValue::Integer(i64::from(filter.offset)));

        let rows = self
            .db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), row_to_json::<E>)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(from_json).collect()
    }

    /// 满足条件的总行数
    pub async fn count(&self, filter: &ListFilter) -> Result<u64, PersistenceError> {
        let (where_clause, params) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.kind.table, where_clause);

        self.db
            .with_conn(move |conn| {
                let total: i64 =
                    conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
                Ok(u64::try_from(total).unwrap_or(0))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaseInfo, ZtInfo};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn base_info(code: &str, day: u32, price: f64) -> BaseInfo {
        BaseInfo {
            id: None,
            code: code.to_string(),
            market_code: "33".to_string(),
            stock_code: code.trim_end_matches(".SZ").to_string(),
            stock_name: format!("股票{}", code),
            latest_price: price,
            latest_change_rate: 1.5,
            auction_change_rate: 0.8,
            morning_auction_amount: 120_000,
            morning_auction_amount_str: "12万".to_string(),
            auction_unmatched_amount: 0,
            auction_unmatched_amount_str: String::new(),
            turnover: 1.3e8,
            turnover_str: "1.3亿".to_string(),
            circulation_market_value: 2.0e10,
            circulation_market_value_str: "200亿".to_string(),
            company_highlights: "龙头".to_string(),
            industry_category: "银行".to_string(),
            concept_theme: "金融科技".to_string(),
            consecutive_limit_days: 1,
            trade_date: date(day),
        }
    }

    /// 测试快照表的全量刷新和历史表的增量合并
    #[tokio::test]
    async fn test_base_info_snapshot_and_history() {
        let db = Database::open_in_memory().unwrap();
        let snapshot: Repository<BaseInfo> = Repository::new(db.clone(), EntityKind::BASE_INFO);
        let history: Repository<BaseInfo> = Repository::new(db, EntityKind::BASE_INFO_DAY);

        let day1 = vec![base_info("000001.SZ", 1, 10.0), base_info("000002.SZ", 1, 20.0)];
        let day2 = vec![base_info("000001.SZ", 2, 11.0)];

        snapshot.batch_save(day1.clone()).await.unwrap();
        history.batch_save(day1).await.unwrap();
        let report = snapshot.batch_save(day2.clone()).await.unwrap();
        assert_eq!(report.deleted, 2);
        history.batch_save(day2).await.unwrap();

        let all = ListFilter {
            limit: 100,
            ..Default::default()
        };
        assert_eq!(snapshot.count(&all).await.unwrap(), 1);
        assert_eq!(history.count(&all).await.unwrap(), 3);

        let latest = snapshot.list(&all).await.unwrap();
        assert_eq!(latest[0].code, "000001.SZ");
        assert_eq!(latest[0].latest_price, 11.0);
        assert_eq!(latest[0].turnover, 1.3e8);
    }

    #[tokio::test]
    async fn test_save_and_find_by_key() {
        let db = Database::open_in_memory().unwrap();
        let repo: Repository<BaseInfo> = Repository::new(db, EntityKind::BASE_INFO);

        repo.save(base_info("000001.SZ", 1, 10.0)).await.unwrap();
        // 单条保存不触发全量刷新
        let report = repo.save(base_info("000002.SZ", 1, 20.0)).await.unwrap();
        assert_eq!(report.deleted, 0);
        repo.save(base_info("000001.SZ", 1, 10.5)).await.unwrap();

        let found = repo
            .find_by_key(&NaturalKey::new("000001.SZ", date(1)))
            .await
            .unwrap()
            .unwrap();
        assert!(found.id.is_some());
        assert_eq!(found.latest_price, 10.5);
        assert_eq!(found.stock_name, "股票000001.SZ");

        let missing = repo
            .find_by_key(&NaturalKey::new("000001.SZ", date(2)))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_paging() {
        let db = Database::open_in_memory().unwrap();
        let repo: Repository<BaseInfo> = Repository::new(db, EntityKind::BASE_INFO_DAY);

        let mut batch = Vec::new();
        for day in 1..=5 {
            batch.push(base_info("000001.SZ", day, f64::from(day)));
            batch.push(base_info("600000.SH", day, f64::from(day)));
        }
        repo.batch_save(batch).await.unwrap();

        let filter = ListFilter {
            code: Some("000001.SZ".to_string()),
            start_date: Some(date(2)),
            end_date: Some(date(4)),
            limit: 2,
            offset: 0,
        };
        assert_eq!(repo.count(&filter).await.unwrap(), 3);

        let page1 = repo.list(&filter).await.unwrap();
        let days: Vec<NaiveDate> = page1.iter().map(|r| r.trade_date).collect();
        assert_eq!(days, vec![date(4), date(3)]);

        let page2 = repo
            .list(&ListFilter {
                offset: 2,
                ..filter.clone()
            })
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].trade_date, date(2));
    }

    #[tokio::test]
    async fn test_zt_info_bool_column_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo: Repository<ZtInfo> = Repository::new(db, EntityKind::ZT_INFO);

        let info = ZtInfo {
            id: None,
            code: "000001.SZ".to_string(),
            market_code: "33".to_string(),
            stock_code: "000001".to_string(),
            stock_name: "平安银行".to_string(),
            latest_price: 9.9,
            latest_change_rate: -10.0,
            auction_change_rate: -2.0,
            morning_auction_amount: 0,
            morning_auction_amount_str: String::new(),
            auction_unmatched_amount: 0,
            auction_unmatched_amount_str: String::new(),
            turnover: 0.0,
            turnover_str: String::new(),
            circulation_market_value: 0.0,
            limit_up_reason: String::new(),
            company_highlights: String::new(),
            industry_category: String::new(),
            concept_theme: String::new(),
            limit_up_seal_amount: 5_000_000,
            limit_up_seal_amount_str: "500万".to_string(),
            consecutive_limit_days: 0,
            limit_down: true,
            trade_date: date(1),
        };
        repo.save(info).await.unwrap();

        let found = repo
            .find_by_key(&NaturalKey::new("000001.SZ", date(1)))
            .await
            .unwrap()
            .unwrap();
        assert!(found.limit_down);
        assert_eq!(found.limit_up_seal_amount, 5_000_000);
    }
}
