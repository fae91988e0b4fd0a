//! 问财 get-robot-data 响应转换
//!
//! 响应的 `data.answer[0].txt[0].content` 里是若干个组件（widget）。
//! 只有一个 `xuangu_tableV1` 组件时，提取 condition 和分页参数，后续走分页接口；
//! 其他情况把所有组件按标题合并成一个字典，作为最终答案直接返回。

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use url::Url;

use crate::error::ConvertError;

/// 选股表格组件的 show_type
pub const TABLE_SHOW_TYPE: &str = "xuangu_tableV1";

/// 解析相对地址时使用的站点根
const SITE_ROOT: &str = "http://www.iwencai.com";

/// 表格组件中提取出的分页条件
#[derive(Debug, Clone, PartialEq)]
pub struct TableCondition {
    pub condition: Option<Value>,
    pub comp_id: Option<Value>,
    pub uuid: Option<Value>,
}

/// 转换后的数据部分
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedData {
    /// 单个选股表格，可分页获取
    Table(TableCondition),
    /// 非表格类答案，按组件标题合并
    Answer(Map<String, Value>),
}

/// get-robot-data 的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedQuery {
    pub data: ExtractedData,
    /// 服务端声明的总行数
    pub row_count: u64,
    pub url: String,
    pub url_params: BTreeMap<String, String>,
}

impl ExtractedQuery {
    /// 存在 condition 时才能继续分页获取
    pub fn condition(&self) -> Option<&Value> {
        match &self.data {
            ExtractedData::Table(table) => table.condition.as_ref(),
            ExtractedData::Answer(_) => None,
        }
    }
}

/// 按 `a.b.0.c` 形式的路径取嵌套值，数组用下标访问
pub fn get_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn get_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_value(value, path).and_then(Value::as_str)
}

/// 解析 URL 中的查询参数，同名参数只保留第一个值
pub fn parse_url_params(raw: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if raw.is_empty() {
        return params;
    }

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            match Url::parse(SITE_ROOT).and_then(|base| base.join(raw)) {
                Ok(url) => url,
                Err(_) => return params,
            }
        }
        Err(_) => return params,
    };

    for (key, value) in parsed.query_pairs() {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

fn footer_url(component: &Value) -> String {
    get_str(component, "config.other_info.footer_info.url")
        .unwrap_or_default()
        .to_string()
}

/// 组件在合并结果中的键：标题 > 配置标题 > show_type
fn component_key(component: &Value) -> Option<String> {
    ["title_config.data.h1", "config.title"]
        .iter()
        .filter_map(|path| get_str(component, path))
        .find(|s| !s.is_empty())
        .or_else(|| get_str(component, "show_type"))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 组件的数据：有 `data.datas` 数组时取数组，否则取整个 `data`
fn component_value(component: &Value) -> Option<Value> {
    match get_value(component, "data.datas") {
        Some(datas @ Value::Array(_)) => Some(datas.clone()),
        _ => get_value(component, "data").cloned(),
    }
}

fn merge_components(components: &[Value]) -> Map<String, Value> {
    let mut merged = Map::new();
    for component in components.iter().filter(|c| c.is_object()) {
        if let (Some(key), Some(value)) = (component_key(component), component_value(component)) {
            merged.insert(key, value);
        }
    }
    merged
}

fn table_condition(component: &Value) -> TableCondition {
    TableCondition {
        condition: get_value(component, "data.meta.extra.condition").cloned(),
        comp_id: get_value(component, "cid").cloned(),
        uuid: get_value(component, "puuid").cloned(),
    }
}

/// 解析 get-robot-data 的响应体
pub fn convert(body: &[u8]) -> Result<ExtractedQuery, ConvertError> {
    let response: Value = serde_json::from_slice(body)?;

    let raw_content = get_value(&response, "data.answer.0.txt.0.content")
        .ok_or_else(|| ConvertError::MalformedResponse("no answer data found".to_string()))?;

    // content 有时是一段 JSON 字符串，需要再解一层
    let content = match raw_content {
        Value::String(s) => serde_json::from_str::<Value>(s)?,
        Value::Object(_) => raw_content.clone(),
        _ => {
            return Err(ConvertError::MalformedResponse(
                "unexpected content type".to_string(),
            ))
        }
    };

    let components = match content.get("components") {
        None | Some(Value::Null) => {
            return Err(ConvertError::MalformedResponse(
                "no components found".to_string(),
            ))
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ConvertError::UnsupportedShape(
                "components is not an array".to_string(),
            ))
        }
    };

    if let [only] = components.as_slice() {
        if get_str(only, "show_type") == Some(TABLE_SHOW_TYPE) {
            let url = footer_url(only);
            let row_count = get_value(only, "data.meta.extra.row_count")
                .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
                .unwrap_or(0);

            return Ok(ExtractedQuery {
                data: ExtractedData::Table(table_condition(only)),
                row_count,
                url_params: parse_url_params(&url),
                url,
            });
        }
    }

    let url = components.first().map(footer_url).unwrap_or_default();
    Ok(ExtractedQuery {
        data: ExtractedData::Answer(merge_components(components)),
        row_count: 0,
        url_params: parse_url_params(&url),
        url,
    })
}
