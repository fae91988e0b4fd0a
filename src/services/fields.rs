//! 字段提取工具
//!
//! 问财返回的每条记录都是无固定结构的 `字段名 -> 值` 映射，数值可能是原生数字、
//! 数字字符串（科学计数法、千分位逗号、带单位后缀）或者干脆缺失。
//! 这里的函数统一做类型转换，缺失或无法解析时返回零值。

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// 一条原始记录
pub type Record = Map<String, Value>;

static NUMBER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap());

/// 构造带日期后缀的字段名，如 `竞价涨幅[20240101]`
pub fn dated_key(name: &str, date: NaiveDate) -> String {
    format!("{}[{}]", name, date.format("%Y%m%d"))
}

/// 取字符串值，数字等其他类型转为文本
pub fn get_string(record: &Record, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// 取浮点值
pub fn get_float(record: &Record, key: &str) -> f64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_number(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// 取整数值，小数部分截断
pub fn get_int(record: &Record, key: &str) -> i64 {
    match record.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let cleaned = s.trim().replace(',', "");
            // 纯整数直接解析，避免大数经过 f64 丢精度
            if let Ok(i) = cleaned.parse::<i64>() {
                return i;
            }
            parse_number(&cleaned).map(|f| f as i64).unwrap_or(0)
        }
        _ => 0,
    }
}

/// 解析字符串开头的数字部分，支持科学计数法和千分位逗号
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    let m = NUMBER_PREFIX.find(&cleaned)?;
    m.as_str().parse::<f64>().ok()
}

/// 将金额转换为带单位的字符串（万或亿）
///
/// - 0 返回空字符串
/// - 1 万以下原样输出
/// - 1 万到 1 亿之间以“万”为单位，保留两位小数
/// - 1 亿及以上以“亿”为单位，保留两位小数
pub fn format_amount(amount: i64) -> String {
    if amount == 0 {
        return String::new();
    }

    if amount >= 100_000_000 {
        return format!("{:.2}亿", amount as f64 / 100_000_000.0);
    }

    if amount >= 10_000 {
        return format!("{:.2}万", amount as f64 / 10_000.0);
    }

    amount.to_string()
}

/// 取金额字段并转为紧凑的带单位字符串，如 `12万`、`1.3亿`
///
/// 与 [`format_amount`] 不同，1 亿以下一律以“万”为单位，并去掉小数末尾的 0。
pub fn amount_str(record: &Record, key: &str) -> String {
    let amount = get_float(record, key);
    if amount == 0.0 {
        return String::new();
    }

    let (value, unit) = if amount >= 100_000_000.0 {
        (amount / 100_000_000.0, "亿")
    } else {
        (amount / 10_000.0, "万")
    };
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", text, unit)
}

/// 从 `排名/总数` 形式的字符串中取出排名
pub fn parse_rank(rank: &str) -> i32 {
    let head = rank.split('/').next().unwrap_or("").trim();
    let digits: String = head
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(_, c)| c)
        .collect();
    digits.parse().unwrap_or(0)
}
