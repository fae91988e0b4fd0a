//! 对账引擎
//!
//! 把一批实体合并进一张表：
//! 1. 收集批次内去重后的 (code, trade_date)
//! 2. 分块批量查询已存在的行
//! 3. 已存在的沿用原 id 逐行更新，不存在的分块多行插入
//!
//! 全量刷新模式下先清空整张表再插入。整个批次在调用方的事务里执行。

use std::collections::{BTreeSet, HashMap};

use rusqlite::{params_from_iter, Transaction};
use serde::Serialize;

use super::entity::{parse_trade_date, to_sql_values, Entity, NaturalKey};
use crate::error::PersistenceError;

/// SQLite 单条语句的参数上限按 999 估算，留出余量
const MAX_PARAMS: usize = 900;

/// 每次存在性查询的键数（每个键两个参数）
const LOOKUP_CHUNK: usize = 450;

/// 刷新方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// 按自然键增量合并
    Incremental,
    /// 清空整张表后重新写入
    DestructiveRefresh,
}

/// 单行失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 任一行失败则整批回滚
    Abort,
    /// 记录日志后跳过该行
    SkipRow,
}

/// 实体类型描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityKind {
    pub name: &'static str,
    pub table: &'static str,
    pub refresh: RefreshMode,
    pub failure: FailurePolicy,
}

impl EntityKind {
    pub const STOCK: EntityKind = EntityKind {
        name: "stock",
        table: "zp_jj",
        refresh: RefreshMode::Incremental,
        failure: FailurePolicy::Abort,
    };

    pub const BASE_INFO: EntityKind = EntityKind {
        name: "base_info",
        table: "base_info",
        refresh: RefreshMode::DestructiveRefresh,
        failure: FailurePolicy::Abort,
    };

    pub const BASE_INFO_DAY: EntityKind = EntityKind {
        name: "base_info_day",
        table: "base_info_day",
        refresh: RefreshMode::Incremental,
        failure: FailurePolicy::Abort,
    };

    pub const ZT_INFO: EntityKind = EntityKind {
        name: "zt_info",
        table: "zt_day",
        refresh: RefreshMode::Incremental,
        failure: FailurePolicy::Abort,
    };

    pub const MARKET_STATISTICS: EntityKind = EntityKind {
        name: "market_statistics",
        table: "market_statistics",
        refresh: RefreshMode::Incremental,
        failure: FailurePolicy::Abort,
    };

    /// 同一张表按增量方式写入
    pub fn incremental(self) -> Self {
        Self {
            refresh: RefreshMode::Incremental,
            ..self
        }
    }
}

/// 一次对账的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    /// 全量刷新时删除的行数
    pub deleted: usize,
    /// SkipRow 策略下跳过的行数
    pub skipped: usize,
}

/// 对账引擎依赖的存储操作
pub trait ReconcileStore<E: Entity> {
    /// 查询已存在的键及其 id
    fn find_existing(&mut self, keys: &[NaturalKey])
        -> Result<HashMap<NaturalKey, i64>, PersistenceError>;

    /// 多行插入
    fn insert_batch(&mut self, rows: &[E]) -> Result<(), PersistenceError>;

    /// 按 id 更新一行
    fn update(&mut self, row: &E) -> Result<(), PersistenceError>;

    /// 清空表，返回删除的行数
    fn delete_all(&mut self) -> Result<usize, PersistenceError>;
}

/// 批次内同一个键只保留最后一次出现的实体
fn dedup_by_key<E: Entity>(batch: Vec<E>) -> Vec<E> {
    let mut positions: HashMap<NaturalKey, usize> = HashMap::new();
    let mut rows: Vec<Option<E>> = Vec::with_capacity(batch.len());

    for entity in batch {
        let key = entity.key();
        if let Some(&pos) = positions.get(&key) {
            rows[pos] = None;
        }
        positions.insert(key, rows.len());
        rows.push(Some(entity));
    }

    rows.into_iter().flatten().collect()
}

fn insert_chunk_size<E: Entity>() -> usize {
    (MAX_PARAMS / E::COLUMNS.len().max(1)).max(1)
}

/// 把一批实体合并进存储
pub fn reconcile<E, S>(
    store: &mut S,
    kind: &EntityKind,
    batch: Vec<E>,
) -> Result<ReconcileReport, PersistenceError>
where
    E: Entity,
    S: ReconcileStore<E>,
{
    let mut report = ReconcileReport::default();
    if batch.is_empty() {
        return Ok(report);
    }

    let batch = dedup_by_key(batch);

    let (to_create, to_update) = match kind.refresh {
        RefreshMode::DestructiveRefresh => {
            report.deleted = store.delete_all()?;
            (batch, Vec::new())
        }
        RefreshMode::Incremental => {
            let keys: Vec<NaturalKey> = batch
                .iter()
                .map(Entity::key)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let existing = store.find_existing(&keys)?;

            let mut to_create = Vec::new();
            let mut to_update = Vec::new();
            for mut entity in batch {
                match existing.get(&entity.key()) {
                    Some(&id) => {
                        entity.set_id(id);
                        to_update.push(entity);
                    }
                    None => to_create.push(entity),
                }
            }
            (to_create, to_update)
        }
    };

    for chunk in to_create.chunks(insert_chunk_size::<E>()) {
        match kind.failure {
            FailurePolicy::Abort => {
                store.insert_batch(chunk)?;
                report.created += chunk.len();
            }
            FailurePolicy::SkipRow => {
                for entity in chunk {
                    match store.insert_batch(std::slice::from_ref(entity)) {
                        Ok(()) => report.created += 1,
                        Err(e) => {
                            log::warn!("[{}] 插入 {:?} 失败，跳过: {}", kind.name, entity.key(), e);
                            report.skipped += 1;
                        }
                    }
                }
            }
        }
    }

    for entity in &to_update {
        match store.update(entity) {
            Ok(()) => report.updated += 1,
            Err(e) if kind.failure == FailurePolicy::SkipRow => {
                log::warn!("[{}] 更新 {:?} 失败，跳过: {}", kind.name, entity.key(), e);
                report.skipped += 1;
            }
            Err(e) => {
                log::error!("[{}] 更新 {:?} 失败: {}", kind.name, entity.key(), e);
                return Err(e);
            }
        }
    }

    log::info!(
        "[{}] 对账完成: 共 {} 条 (新增 {}, 更新 {}, 删除 {}, 跳过 {})",
        kind.name,
        to_create.len() + to_update.len(),
        report.created,
        report.updated,
        report.deleted,
        report.skipped
    );
    Ok(report)
}

/// 基于事务的 SQLite 实现
pub struct SqliteStore<'a, 'conn> {
    tx: &'a Transaction<'conn>,
    table: &'static str,
}

impl<'a, 'conn> SqliteStore<'a, 'conn> {
    pub fn new(tx: &'a Transaction<'conn>, table: &'static str) -> Self {
        Self { tx, table }
    }
}

impl<E: Entity> ReconcileStore<E> for SqliteStore<'_, '_> {
    fn find_existing(
        &mut self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, i64>, PersistenceError> {
        let mut existing = HashMap::new();

        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let predicate = vec!["(code = ? AND trade_date = ?)"; chunk.len()].join(" OR ");
            let sql = format!(
                "SELECT id, code, trade_date FROM {} WHERE {}",
                self.table, predicate
            );
            let params: Vec<String> = chunk
                .iter()
                .flat_map(|key| [key.code.clone(), key.trade_date.format("%Y-%m-%d").to_string()])
                .collect();

            let mut stmt = self.tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            for row in rows {
                let (id, code, trade_date) = row?;
                existing.insert(NaturalKey::new(code, parse_trade_date(&trade_date)?), id);
            }
        }

        Ok(existing)
    }

    fn insert_batch(&mut self, rows: &[E]) -> Result<(), PersistenceError> {
        if rows.is_empty() {
            return Ok(());
        }

        let placeholders = format!(
            "({}, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
            vec!["?"; E::COLUMNS.len()].join(", ")
        );
        let sql = format!(
            "INSERT INTO {} ({}, create_time, update_time) VALUES {}",
            self.table,
            E::COLUMNS.join(", "),
            vec![placeholders.as_str(); rows.len()].join(", ")
        );

        let mut params = Vec::with_capacity(rows.len() * E::COLUMNS.len());
        for row in rows {
            params.extend(to_sql_values(row)?);
        }

        self.tx.execute(&sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    fn update(&mut self, row: &E) -> Result<(), PersistenceError> {
        let id = row
            .id()
            .ok_or_else(|| PersistenceError::InvalidRow(format!("{:?} 缺少 id", row.key())))?;

        let assignments: Vec<String> = E::COLUMNS.iter().map(|c| format!("{} = ?", c)).collect();
        let sql = format!(
            "UPDATE {} SET {}, update_time = CURRENT_TIMESTAMP WHERE id = ?",
            self.table,
            assignments.join(", ")
        );

        let mut params = to_sql_values(row)?;
        params.push(rusqlite::types::Value::Integer(id));
        self.tx.execute(&sql, params_from_iter(params.iter()))?;
        Ok(())
    }

    fn delete_all(&mut self) -> Result<usize, PersistenceError> {
        Ok(self.tx.execute(&format!("DELETE FROM {}", self.table), [])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketStatistics;
    use chrono::NaiveDate;
    use rusqlite::Connection;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn stat(code: &str, day: u32, limit_up: i32) -> MarketStatistics {
        MarketStatistics {
            id: None,
            code: code.to_string(),
            trade_date: date(day),
            limit_up_count: limit_up,
            limit_down_count: 0,
            broken_count: 0,
            max_consecutive_days: 0,
            two_consecutive_count: 0,
        }
    }

    /// 内存假存储，记录每种操作
    #[derive(Default)]
    struct FakeStore {
        rows: HashMap<NaturalKey, (i64, MarketStatistics)>,
        next_id: i64,
        lookups: usize,
        insert_calls: usize,
        updates: Vec<i64>,
        fail_code: Option<String>,
    }

    impl FakeStore {
        fn seed(&mut self, entity: MarketStatistics) -> i64 {
            self.next_id += 1;
            self.rows.insert(entity.key(), (self.next_id, entity));
            self.next_id
        }
    }

    impl ReconcileStore<MarketStatistics> for FakeStore {
        fn find_existing(
            &mut self,
            keys: &[NaturalKey],
        ) -> Result<HashMap<NaturalKey, i64>, PersistenceError> {
            self.lookups += 1;
            Ok(keys
                .iter()
                .filter_map(|k| self.rows.get(k).map(|(id, _)| (k.clone(), *id)))
                .collect())
        }

        fn insert_batch(&mut self, rows: &[MarketStatistics]) -> Result<(), PersistenceError> {
            self.insert_calls += 1;
            for row in rows {
                if self.fail_code.as_deref() == Some(row.code.as_str()) {
                    return Err(PersistenceError::InvalidRow(row.code.clone()));
                }
            }
            for row in rows {
                self.seed(row.clone());
            }
            Ok(())
        }

        fn update(&mut self, row: &MarketStatistics) -> Result<(), PersistenceError> {
            let id = row.id.unwrap();
            self.updates.push(id);
            self.rows.insert(row.key(), (id, row.clone()));
            Ok(())
        }

        fn delete_all(&mut self) -> Result<usize, PersistenceError> {
            let n = self.rows.len();
            self.rows.clear();
            Ok(n)
        }
    }

    /// 已存在的键：沿用原 id 更新，不插入
    #[test]
    fn test_update_path_reuses_id() {
        let mut store = FakeStore::default();
        let id = store.seed(stat("ALL", 8, 10));

        let report =
            reconcile(&mut store, &EntityKind::MARKET_STATISTICS, vec![stat("ALL", 8, 42)]).unwrap();

        assert_eq!(report, ReconcileReport { updated: 1, ..Default::default() });
        assert_eq!(store.updates, vec![id]);
        assert_eq!(store.insert_calls, 0);
        let (stored_id, stored) = &store.rows[&NaturalKey::new("ALL", date(8))];
        assert_eq!(*stored_id, id);
        assert_eq!(stored.limit_up_count, 42);
    }

    /// 全新的键：全部插入
    #[test]
    fn test_create_path() {
        let mut store = FakeStore::default();
        let batch: Vec<_> = (1..=5).map(|day| stat("ALL", day, 1)).collect();

        let report = reconcile(&mut store, &EntityKind::MARKET_STATISTICS, batch).unwrap();

        assert_eq!(report.created, 5);
        assert_eq!(report.updated, 0);
        assert_eq!(store.rows.len(), 5);
        assert_eq!(store.lookups, 1);
    }

    #[test]
    fn test_mixed_batch_and_duplicate_keys() {
        let mut store = FakeStore::default();
        store.seed(stat("A", 1, 1));

        let batch = vec![stat("A", 1, 2), stat("B", 1, 3), stat("B", 1, 4)];
        let report = reconcile(&mut store, &EntityKind::MARKET_STATISTICS, batch).unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(store.rows[&NaturalKey::new("B", date(1))].1.limit_up_count, 4);
    }

    /// 全量刷新：先清空再插入
    #[test]
    fn test_destructive_refresh() {
        let mut store = FakeStore::default();
        store.seed(stat("OLD", 1, 1));
        store.seed(stat("A", 1, 1));

        let kind = EntityKind {
            refresh: RefreshMode::DestructiveRefresh,
            ..EntityKind::MARKET_STATISTICS
        };
        let report = reconcile(&mut store, &kind, vec![stat("A", 1, 9)]).unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(store.lookups, 0);
        assert!(!store.rows.contains_key(&NaturalKey::new("OLD", date(1))));
    }

    #[test]
    fn test_empty_batch_touches_nothing() {
        let mut store = FakeStore::default();
        store.seed(stat("A", 1, 1));
        let kind = EntityKind::BASE_INFO;
        let report = reconcile::<MarketStatistics, _>(&mut store, &kind, Vec::new()).unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.rows.len(), 1);
    }

    #[test]
    fn test_failure_policies() {
        let batch = || vec![stat("A", 1, 1), stat("BAD", 1, 1), stat("C", 1, 1)];

        let mut store = FakeStore {
            fail_code: Some("BAD".to_string()),
            ..Default::default()
        };
        let err = reconcile(&mut store, &EntityKind::MARKET_STATISTICS, batch()).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidRow(_)));

        let mut store = FakeStore {
            fail_code: Some("BAD".to_string()),
            ..Default::default()
        };
        let kind = EntityKind {
            failure: FailurePolicy::SkipRow,
            ..EntityKind::MARKET_STATISTICS
        };
        let report = reconcile(&mut store, &kind, batch()).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped, 1);
    }

    fn sqlite() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(super::super::CREATE_TABLES_SQL).unwrap();
        conn
    }

    fn run(
        conn: &mut Connection,
        kind: &EntityKind,
        batch: Vec<MarketStatistics>,
    ) -> Result<ReconcileReport, PersistenceError> {
        let tx = conn.transaction()?;
        let report = {
            let mut store = SqliteStore::new(&tx, kind.table);
            reconcile(&mut store, kind, batch)?
        };
        tx.commit()?;
        Ok(report)
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM market_statistics", [], |r| r.get(0))
            .unwrap()
    }

    /// SQLite：第二次写入同一批数据走更新，id 不变
    #[test]
    fn test_sqlite_upsert_keeps_ids() {
        let mut conn = sqlite();
        let kind = EntityKind::MARKET_STATISTICS;

        let report = run(&mut conn, &kind, vec![stat("ALL", 1, 10), stat("ALL", 2, 20)]).unwrap();
        assert_eq!(report.created, 2);
        let id_before: i64 = conn
            .query_row(
                "SELECT id FROM market_statistics WHERE trade_date = '2024-03-02'",
                [],
                |r| r.get(0),
            )
            .unwrap();

        let report = run(&mut conn, &kind, vec![stat("ALL", 2, 99), stat("ALL", 3, 30)]).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(count(&conn), 3);

        let (id_after, limit_up): (i64, i64) = conn
            .query_row(
                "SELECT id, limit_up_count FROM market_statistics WHERE trade_date = '2024-03-02'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(id_after, id_before);
        assert_eq!(limit_up, 99);
    }

    /// 超过单条语句参数上限的批次会被分块
    #[test]
    fn test_sqlite_large_batch_is_chunked() {
        let mut conn = sqlite();
        let kind = EntityKind::MARKET_STATISTICS;
        let batch: Vec<_> = (0..1200).map(|i| stat(&format!("C{}", i), 1, i)).collect();

        let report = run(&mut conn, &kind, batch.clone()).unwrap();
        assert_eq!(report.created, 1200);

        let report = run(&mut conn, &kind, batch).unwrap();
        assert_eq!(report.updated, 1200);
        assert_eq!(count(&conn), 1200);
    }

    /// Abort 策略下整批回滚
    #[test]
    fn test_sqlite_abort_rolls_back() {
        let mut conn = sqlite();
        conn.execute_batch(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON market_statistics \
             WHEN NEW.code = 'BAD' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let kind = EntityKind::MARKET_STATISTICS;
        let result = run(&mut conn, &kind, vec![stat("A", 1, 1)]);
        assert!(result.is_ok());

        let result = run(&mut conn, &kind, vec![stat("A", 1, 5), stat("BAD", 1, 1)]);
        assert!(matches!(result, Err(PersistenceError::Sqlite(_))));
        assert_eq!(count(&conn), 1);
        let limit_up: i64 = conn
            .query_row("SELECT limit_up_count FROM market_statistics", [], |r| r.get(0))
            .unwrap();
        assert_eq!(limit_up, 1);
    }

    #[test]
    fn test_sqlite_destructive_refresh() {
        let mut conn = sqlite();
        let kind = EntityKind::MARKET_STATISTICS;
        run(&mut conn, &kind, vec![stat("A", 1, 1), stat("B", 1, 1)]).unwrap();

        let destructive = EntityKind {
            refresh: RefreshMode::DestructiveRefresh,
            ..kind
        };
        let report = run(&mut conn, &destructive, vec![stat("C", 1, 1)]).unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.created, 1);
        assert_eq!(count(&conn), 1);
    }
}
