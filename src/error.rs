//! 错误类型定义
//!
//! 问财客户端、响应转换和持久化三层各自的错误枚举

use thiserror::Error;

/// 问财响应结构转换错误
#[derive(Error, Debug)]
pub enum ConvertError {
    /// 响应中找不到 answer / components
    #[error("响应结构异常: {0}")]
    MalformedResponse(String),

    /// components 不是统一的数组
    #[error("不支持的响应结构: {0}")]
    UnsupportedShape(String),

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 问财查询错误
#[derive(Error, Debug)]
pub enum WencaiError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 网络或 HTTP 状态错误，可重试
    #[error("网络请求失败: {0}")]
    Transport(String),

    /// 响应内容无法按预期结构解析，可重试
    #[error("响应解析失败: {0}")]
    Decode(String),

    /// 签名 token 生成失败，整个请求直接终止
    #[error("hexin-v token 生成失败: {0}")]
    Token(String),

    #[error("获取 condition 失败: {0}")]
    Resolve(#[source] Box<WencaiError>),

    #[error("第{page}页获取失败: {source}")]
    Page {
        page: u32,
        #[source]
        source: Box<WencaiError>,
    },

    #[error("请求已取消")]
    Cancelled,
}

impl WencaiError {
    /// 是否值得再试一次
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Decode(_))
    }

    /// 剥掉 Resolve / Page 包装后的根因
    pub fn root(&self) -> &WencaiError {
        match self {
            Self::Resolve(inner) => inner.root(),
            Self::Page { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for WencaiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<ConvertError> for WencaiError {
    fn from(e: ConvertError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// 持久化错误
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("无效数据行: {0}")]
    InvalidRow(String),

    #[error("数据库文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 手动触发任务的错误
#[derive(Error, Debug)]
pub enum JobError {
    #[error("任务不存在: {0}")]
    NotFound(String),

    /// 同一任务正在执行
    #[error("任务 {0} 正在执行，跳过本次触发")]
    Busy(String),

    #[error("任务执行失败: {0}")]
    Failed(String),
}
