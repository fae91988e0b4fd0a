//! 通用 API 响应模型
//! 
//! 定义统一的 API 响应格式

use serde::{Deserialize, Serialize};
use chrono::Utc;
use chrono_tz::Asia::Shanghai;

/// 获取北京时间（UTC+8）
fn get_beijing_time() -> chrono::DateTime<chrono_tz::Tz> {
    Utc::now().with_timezone(&Shanghai)
}

/// 统一 API 响应结构
/// 
/// 所有接口返回统一格式，包含：
/// - success: 请求是否成功
/// - data: 响应数据（成功时有值）
/// - message: 响应消息
/// - timestamp: 响应时间戳（北京时间）
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 请求是否成功
    pub success: bool,
    /// 响应数据
    pub data: Option<T>,
    /// 响应消息
    pub message: String,
    /// 响应时间戳（ISO 8601 格式）
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    /// 
    /// # 参数
    /// - data: 响应数据
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
            timestamp: get_beijing_time().to_rfc3339(),
        }
    }

    /// 创建错误响应
    /// 
    /// # 参数
    /// - message: 错误信息
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
            timestamp: get_beijing_time().to_rfc3339(),
        }
    }
}

/// 分页数据
#[derive(Debug, Serialize, Deserialize)]
pub struct PageData<T> {
    pub items: Vec<T>,
    /// 满足条件的总条数
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// 问财即时查询的返回
///
/// 表格类查询返回 records；分页中途失败时 records 为已获取部分，error 给出原因。
/// 非表格类查询返回 answer。
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_envelope() {
        let ok = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"], 1);
        assert!(ok["timestamp"].as_str().unwrap().ends_with("+08:00"));

        let err = serde_json::to_value(ApiResponse::<()>::error("失败".to_string())).unwrap();
        assert_eq!(err["success"], false);
        assert!(err["data"].is_null());
        assert_eq!(err["message"], "失败");
    }

    #[test]
    fn test_query_data_omits_empty_fields() {
        let data = QueryData {
            answer: Some(serde_json::Map::new()),
            ..Default::default()
        };
        let value = serde_json::to_value(data).unwrap();
        assert!(value.get("records").is_none());
        assert!(value.get("error").is_none());
        assert!(value["answer"].is_object());
    }
}
