//! 持久化实体
//!
//! 每个实体以 (code, trade_date) 作为自然键，同一张表内唯一。
//! 金额字段同时保存原始数值和带单位的字符串。

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// 布尔列在 SQLite 里存为 0/1，两种形式都接受
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// 竞价选股数据（zp_jj 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(default)]
    pub id: Option<i64>,
    /// 带市场后缀的代码，如 000001.SZ
    pub code: String,
    pub market_code: String,
    /// 纯数字代码
    pub stock_code: String,
    pub stock_name: String,
    pub latest_price: f64,
    /// 涨跌幅（前复权）
    pub latest_change_rate: f64,
    /// 竞价未匹配金额
    pub auction_unmatched_amount: i64,
    pub auction_unmatched_amount_str: String,
    /// 竞价未匹配金额排名，原始形式 `排名/总数`
    pub auction_unmatched_amount_rank: String,
    pub auction_unmatched_amount_rank_num: i32,
    /// 竞价涨幅
    pub auction_change_rate: f64,
    /// 竞价金额
    pub morning_auction_amount: i64,
    pub morning_auction_amount_str: String,
    /// 成交额
    pub turnover: f64,
    pub turnover_str: String,
    /// A 股流通市值（不含限售股）
    pub circulation_market_value: f64,
    pub limit_up_reason: String,
    pub company_highlights: String,
    /// 所属同花顺行业
    pub industry_category: String,
    /// 所属概念
    pub concept_theme: String,
    /// 涨停封单额
    pub limit_up_seal_amount: i64,
    pub limit_up_seal_amount_str: String,
    pub consecutive_limit_days: i32,
    pub trade_date: NaiveDate,
}

/// 基础数据（base_info 快照表和 base_info_day 历史表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseInfo {
    #[serde(default)]
    pub id: Option<i64>,
    pub code: String,
    pub market_code: String,
    pub stock_code: String,
    pub stock_name: String,
    pub latest_price: f64,
    pub latest_change_rate: f64,
    pub auction_change_rate: f64,
    /// 竞价量
    pub morning_auction_amount: i64,
    pub morning_auction_amount_str: String,
    /// 竞价未匹配量
    pub auction_unmatched_amount: i64,
    pub auction_unmatched_amount_str: String,
    pub turnover: f64,
    pub turnover_str: String,
    pub circulation_market_value: f64,
    pub circulation_market_value_str: String,
    pub company_highlights: String,
    pub industry_category: String,
    pub concept_theme: String,
    pub consecutive_limit_days: i32,
    pub trade_date: NaiveDate,
}

/// 涨停数据（zt_day 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZtInfo {
    #[serde(default)]
    pub id: Option<i64>,
    pub code: String,
    pub market_code: String,
    pub stock_code: String,
    pub stock_name: String,
    pub latest_price: f64,
    pub latest_change_rate: f64,
    pub auction_change_rate: f64,
    pub morning_auction_amount: i64,
    pub morning_auction_amount_str: String,
    pub auction_unmatched_amount: i64,
    pub auction_unmatched_amount_str: String,
    pub turnover: f64,
    pub turnover_str: String,
    pub circulation_market_value: f64,
    /// 涨停原因类别
    pub limit_up_reason: String,
    pub company_highlights: String,
    pub industry_category: String,
    pub concept_theme: String,
    /// 封单额：优先涨停封单额，没有时取跌停封单额
    pub limit_up_seal_amount: i64,
    pub limit_up_seal_amount_str: String,
    pub consecutive_limit_days: i32,
    /// 是否跌停（封单额来自跌停封单）
    #[serde(default, deserialize_with = "flag")]
    pub limit_down: bool,
    pub trade_date: NaiveDate,
}

/// 市场统计（market_statistics 表），每个交易日一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatistics {
    #[serde(default)]
    pub id: Option<i64>,
    /// 统计范围，固定为 [`MarketStatistics::MARKET`]
    pub code: String,
    pub trade_date: NaiveDate,
    /// 涨停数
    pub limit_up_count: i32,
    /// 跌停数
    pub limit_down_count: i32,
    /// 开板数
    pub broken_count: i32,
    /// 连板高度
    pub max_consecutive_days: i32,
    /// 二连板数量
    pub two_consecutive_count: i32,
}

impl MarketStatistics {
    /// 全市场统计的代码
    pub const MARKET: &'static str = "ALL";
}
