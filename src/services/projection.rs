//! 原始记录转实体
//!
//! 问财返回的很多字段名带当天日期后缀，例如 `竞价涨幅[20240105]`，
//! 所以每次转换都要传入交易日。没有 `code` 的记录直接丢弃。

use chrono::{NaiveDate, Utc};
use chrono_tz::Asia::Shanghai;

use crate::models::{BaseInfo, MarketStatistics, Stock, ZtInfo};
use crate::services::fields::{
    amount_str, dated_key, format_amount, get_float, get_int, get_string, parse_rank, Record,
};

/// 北京时间的今天
pub fn trade_date_today() -> NaiveDate {
    Utc::now().with_timezone(&Shanghai).date_naive()
}

fn code_of(record: &Record) -> Option<String> {
    let code = get_string(record, "code");
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

/// 竞价选股
pub fn project_stocks(records: &[Record], date: NaiveDate) -> Vec<Stock> {
    let key = |name: &str| dated_key(name, date);

    records
        .iter()
        .filter_map(|item| {
            let code = code_of(item)?;

            let auction_unmatched = get_int(item, &key("竞价未匹配金额"));
            let rank = get_string(item, &key("竞价未匹配金额排名"));
            let morning_auction = get_int(item, &key("竞价金额"));
            let turnover = get_int(item, &key("成交额"));
            let seal = get_int(item, &key("涨停封单额"));

            Some(Stock {
                id: None,
                code,
                market_code: get_string(item, "market_code"),
                stock_code: get_string(item, "股票代码"),
                stock_name: get_string(item, "股票简称"),
                latest_price: get_float(item, "最新价"),
                latest_change_rate: get_float(item, &key("涨跌幅:前复权")),
                auction_unmatched_amount: auction_unmatched,
                auction_unmatched_amount_str: format_amount(auction_unmatched),
                auction_unmatched_amount_rank_num: parse_rank(&rank),
                auction_unmatched_amount_rank: rank,
                auction_change_rate: get_float(item, &key("竞价涨幅")),
                morning_auction_amount: morning_auction,
                morning_auction_amount_str: format_amount(morning_auction),
                turnover: turnover as f64,
                turnover_str: format_amount(turnover),
                circulation_market_value: get_float(item, &key("a股市值(不含限售股)")),
                limit_up_reason: get_string(item, &key("涨停原因类别")),
                company_highlights: get_string(item, "公司亮点"),
                industry_category: get_string(item, "所属同花顺行业"),
                concept_theme: get_string(item, "所属概念"),
                limit_up_seal_amount: seal,
                limit_up_seal_amount_str: format_amount(seal),
                consecutive_limit_days: get_int(item, &key("连续涨停天数")) as i32,
                trade_date: date,
            })
        })
        .collect()
}

/// 基础数据
pub fn project_base_info(records: &[Record], date: NaiveDate) -> Vec<BaseInfo> {
    let key = |name: &str| dated_key(name, date);

    records
        .iter()
        .filter_map(|item| {
            let code = code_of(item)?;
            let market_value_key = key("a股市值(不含限售股)");

            Some(BaseInfo {
                id: None,
                code,
                market_code: get_string(item, "market_code"),
                stock_code: get_string(item, "股票代码"),
                stock_name: get_string(item, "股票简称"),
                latest_price: get_float(item, "最新价"),
                latest_change_rate: get_float(item, &key("涨跌幅:前复权")),
                auction_change_rate: get_float(item, &key("竞价涨幅")),
                morning_auction_amount: get_int(item, &key("竞价量")),
                morning_auction_amount_str: amount_str(item, &key("竞价金额")),
                auction_unmatched_amount: get_int(item, &key("竞价未匹配量")),
                auction_unmatched_amount_str: amount_str(item, &key("竞价未匹配金额")),
                turnover: get_float(item, &key("成交额")),
                turnover_str: amount_str(item, &key("成交额")),
                circulation_market_value: get_float(item, &market_value_key),
                circulation_market_value_str: amount_str(item, &market_value_key),
                company_highlights: get_string(item, "公司亮点"),
                industry_category: get_string(item, "所属同花顺行业"),
                concept_theme: get_string(item, "所属概念"),
                consecutive_limit_days: get_int(item, &key("连续涨停天数")) as i32,
                trade_date: date,
            })
        })
        .collect()
}

/// 涨停/跌停数据
pub fn project_zt_info(records: &[Record], date: NaiveDate) -> Vec<ZtInfo> {
    let key = |name: &str| dated_key(name, date);

    records
        .iter()
        .filter_map(|item| {
            let code = code_of(item)?;

            // 优先取涨停封单额，没有则取跌停封单额
            let up_key = key("涨停封单额");
            let down_key = key("跌停封单额");
            let up_seal = get_float(item, &up_key);
            let (seal, seal_str, limit_down) = if up_seal != 0.0 {
                (up_seal, amount_str(item, &up_key), false)
            } else {
                let down_seal = get_float(item, &down_key);
                (down_seal, amount_str(item, &down_key), down_seal != 0.0)
            };

            Some(ZtInfo {
                id: None,
                code,
                market_code: get_string(item, "market_code"),
                stock_code: get_string(item, "股票代码"),
                stock_name: get_string(item, "股票简称"),
                latest_price: get_float(item, "最新价"),
                latest_change_rate: get_float(item, &key("涨跌幅:前复权")),
                auction_change_rate: get_float(item, &key("竞价涨幅")),
                morning_auction_amount: get_float(item, &key("竞价金额")) as i64,
                morning_auction_amount_str: amount_str(item, &key("竞价金额")),
                auction_unmatched_amount: get_float(item, &key("竞价未匹配金额")) as i64,
                auction_unmatched_amount_str: amount_str(item, &key("竞价未匹配金额")),
                turnover: get_float(item, &key("成交额")),
                turnover_str: amount_str(item, &key("成交额")),
                circulation_market_value: get_float(item, &key("a股市值(不含限售股)")),
                limit_up_reason: get_string(item, &key("涨停原因类别")),
                company_highlights: get_string(item, "公司亮点"),
                industry_category: get_string(item, "所属同花顺行业"),
                concept_theme: get_string(item, "所属概念"),
                limit_up_seal_amount: seal as i64,
                limit_up_seal_amount_str: seal_str,
                consecutive_limit_days: get_int(item, &key("连续涨停天数")) as i32,
                limit_down,
                trade_date: date,
            })
        })
        .collect()
}

/// 由当天的涨停/跌停数据汇总市场统计
///
/// 两种封单额都为 0 的记录视为开板。
pub fn market_statistics(infos: &[ZtInfo], date: NaiveDate) -> MarketStatistics {
    let mut stats = MarketStatistics {
        id: None,
        code: MarketStatistics::MARKET.to_string(),
        trade_date: date,
        limit_up_count: 0,
        limit_down_count: 0,
        broken_count: 0,
        max_consecutive_days: 0,
        two_consecutive_count: 0,
    };

    for info in infos.iter().filter(|i| i.trade_date == date) {
        if info.limit_down {
            stats.limit_down_count += 1;
            continue;
        }
        if info.limit_up_seal_amount == 0 {
            stats.broken_count += 1;
            continue;
        }

        stats.limit_up_count += 1;
        stats.max_consecutive_days = stats.max_consecutive_days.max(info.consecutive_limit_days);
        if info.consecutive_limit_days == 2 {
            stats.two_consecutive_count += 1;
        }
    }

    stats
}
