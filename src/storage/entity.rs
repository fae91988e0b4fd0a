//! 实体与数据行之间的映射
//!
//! 实体通过 serde 转成 `列名 -> 值`，再按 [`Entity::COLUMNS`] 的顺序生成 SQL 参数；
//! 读取时反过来把数据行拼成 JSON 对象交给 serde 反序列化。

use chrono::NaiveDate;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::PersistenceError;
use crate::models::{BaseInfo, MarketStatistics, Stock, ZtInfo};

/// 自然键：代码 + 交易日（精确到天）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub code: String,
    pub trade_date: NaiveDate,
}

impl NaturalKey {
    pub fn new(code: impl Into<String>, trade_date: NaiveDate) -> Self {
        Self {
            code: code.into(),
            trade_date,
        }
    }
}

/// 可持久化的实体
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// 业务列，不含 id 和时间戳。列名与 serde 字段名一致
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn key(&self) -> NaturalKey;
}

/// 按 COLUMNS 顺序生成 SQL 参数
pub fn to_sql_values<E: Entity>(entity: &E) -> Result<Vec<SqlValue>, PersistenceError> {
    let json = serde_json::to_value(entity)
        .map_err(|e| PersistenceError::InvalidRow(format!("序列化失败: {}", e)))?;
    let Value::Object(map) = json else {
        return Err(PersistenceError::InvalidRow("实体不是对象".to_string()));
    };

    E::COLUMNS
        .iter()
        .map(|column| {
            map.get(*column)
                .map(json_to_sql)
                .ok_or_else(|| PersistenceError::InvalidRow(format!("缺少列 {}", column)))
        })
        .collect()
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// `id, col1, col2, ...`
pub fn select_columns<E: Entity>() -> String {
    let mut columns = vec!["id"];
    columns.extend_from_slice(E::COLUMNS);
    columns.join(", ")
}

/// 读取 [`select_columns`] 顺序的数据行
pub fn row_to_json<E: Entity>(row: &Row<'_>) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::new();
    map.insert("id".to_string(), sql_to_json(row.get_ref(0)?));
    for (i, column) in E::COLUMNS.iter().enumerate() {
        map.insert(column.to_string(), sql_to_json(row.get_ref(i + 1)?));
    }
    Ok(map)
}

/// 数据行 JSON 转为实体
pub fn from_json<E: Entity>(map: Map<String, Value>) -> Result<E, PersistenceError> {
    serde_json::from_value(Value::Object(map))
        .map_err(|e| PersistenceError::InvalidRow(format!("反序列化失败: {}", e)))
}

/// 交易日在库里存为 `YYYY-MM-DD`
pub fn parse_trade_date(raw: &str) -> Result<NaiveDate, PersistenceError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PersistenceError::InvalidRow(format!("交易日格式错误 {}: {}", raw, e)))
}

const STOCK_COLUMNS: &[&str] = &[
    "code",
    "market_code",
    "stock_code",
    "stock_name",
    "latest_price",
    "latest_change_rate",
    "auction_unmatched_amount",
    "auction_unmatched_amount_str",
    "auction_unmatched_amount_rank",
    "auction_unmatched_amount_rank_num",
    "auction_change_rate",
    "morning_auction_amount",
    "morning_auction_amount_str",
    "turnover",
    "turnover_str",
    "circulation_market_value",
    "limit_up_reason",
    "company_highlights",
    "industry_category",
    "concept_theme",
    "limit_up_seal_amount",
    "limit_up_seal_amount_str",
    "consecutive_limit_days",
    "trade_date",
];

const BASE_INFO_COLUMNS: &[&str] = &[
    "code",
    "market_code",
    "stock_code",
    "stock_name",
    "latest_price",
    "latest_change_rate",
    "auction_change_rate",
    "morning_auction_amount",
    "morning_auction_amount_str",
    "auction_unmatched_amount",
    "auction_unmatched_amount_str",
    "turnover",
    "turnover_str",
    "circulation_market_value",
    "circulation_market_value_str",
    "company_highlights",
    "industry_category",
    "concept_theme",
    "consecutive_limit_days",
    "trade_date",
];

const ZT_INFO_COLUMNS: &[&str] = &[
    "code",
    "market_code",
    "stock_code",
    "stock_name",
    "latest_price",
    "latest_change_rate",
    "auction_change_rate",
    "morning_auction_amount",
    "morning_auction_amount_str",
    "auction_unmatched_amount",
    "auction_unmatched_amount_str",
    "turnover",
    "turnover_str",
    "circulation_market_value",
    "limit_up_reason",
    "company_highlights",
    "industry_category",
    "concept_theme",
    "limit_up_seal_amount",
    "limit_up_seal_amount_str",
    "consecutive_limit_days",
    "limit_down",
    "trade_date",
];

const MARKET_STATISTICS_COLUMNS: &[&str] = &[
    "code",
    "trade_date",
    "limit_up_count",
    "limit_down_count",
    "broken_count",
    "max_consecutive_days",
    "two_consecutive_count",
];

macro_rules! impl_entity {
    ($ty:ty, $columns:expr) => {
        impl Entity for $ty {
            const COLUMNS: &'static [&'static str] = $columns;

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = Some(id);
            }

            fn key(&self) -> NaturalKey {
                NaturalKey::new(self.code.clone(), self.trade_date)
            }
        }
    };
}

impl_entity!(Stock, STOCK_COLUMNS);
impl_entity!(BaseInfo, BASE_INFO_COLUMNS);
impl_entity!(ZtInfo, ZT_INFO_COLUMNS);
impl_entity!(MarketStatistics, MARKET_STATISTICS_COLUMNS);
