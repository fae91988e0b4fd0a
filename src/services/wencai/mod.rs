//! 问财（iwencai）选股接口
//!
//! - convert: get-robot-data 响应解析
//! - headers: 请求头与 hexin-v token
//! - retry: 固定间隔重试
//! - client: 解析 + 分页的查询客户端

pub mod client;
pub mod convert;
pub mod headers;
pub mod retry;

pub use client::{Endpoints, PageLoop, QueryRequest, QueryResult, WencaiClient};
pub use headers::{ScriptTokenProvider, StaticTokenProvider, TokenProvider};
