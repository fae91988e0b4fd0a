//! 问财查询客户端
//!
//! 查询分两步：
//! 1. get-robot-data 提交问句，解析出 condition 和分页参数（或直接得到最终答案）
//! 2. 有 condition 时按页调用 getDataList，页码严格递增、逐页等待
//!
//! 每一次 HTTP 调用（解析或单页）都独立按固定间隔重试。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::convert::{convert, get_value, ExtractedData, ExtractedQuery};
use super::headers::{build_headers, TokenProvider};
use super::retry::{while_do, RetryPolicy};
use crate::error::WencaiError;
use crate::services::fields::Record;

/// 问财接口地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// 问句解析
    #[serde(default = "default_robot_data_url")]
    pub robot_data: String,
    /// 分页数据
    #[serde(default = "default_data_list_url")]
    pub data_list: String,
    /// 指定标的排在前面的查询
    #[serde(default = "default_find_url")]
    pub find: String,
}

fn default_robot_data_url() -> String {
    "http://www.iwencai.com/customized/chart/get-robot-data".to_string()
}
fn default_data_list_url() -> String {
    "http://www.iwencai.com/gateway/urp/v7/landing/getDataList".to_string()
}
fn default_find_url() -> String {
    "http://www.iwencai.com/unifiedwap/unified-wap/v2/stock-pick/find".to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            robot_data: default_robot_data_url(),
            data_list: default_data_list_url(),
            find: default_find_url(),
        }
    }
}

/// 分页控制：`false` 只取第一页，`true` 取完服务端声明的行数，数字表示精确页数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageLoop {
    Flag(bool),
    Count(u32),
}

impl Default for PageLoop {
    fn default() -> Self {
        PageLoop::Flag(false)
    }
}

impl PageLoop {
    /// 需要获取的页数
    pub fn page_count(&self, row_count: u64, per_page: u32) -> u32 {
        match *self {
            PageLoop::Flag(false) => 1,
            PageLoop::Flag(true) => {
                let per_page = u64::from(per_page.max(1));
                u32::try_from(row_count.div_ceil(per_page)).unwrap_or(u32::MAX)
            }
            PageLoop::Count(n) => n,
        }
    }

    fn is_paging(&self) -> bool {
        !matches!(self, PageLoop::Flag(false))
    }
}

fn default_query_type() -> String {
    "stock".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_page() -> u32 {
    1
}
fn default_retry() -> u32 {
    10
}

/// 一次问财查询的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// 查询问句
    pub query: String,
    /// 登录后的 Cookie
    #[serde(default, skip_serializing)]
    pub cookie: String,
    /// 查询类型: stock / zhishu / fund 等
    #[serde(default = "default_query_type")]
    pub query_type: String,
    /// 每页条数
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// 起始页号
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default, rename = "loop")]
    pub page_loop: PageLoop,
    /// 每次调用的最大尝试次数
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// 两次尝试之间的间隔（毫秒）
    #[serde(default)]
    pub sleep_ms: u64,
    /// 指定标的排在前面
    #[serde(default)]
    pub find: Vec<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// 付费版
    #[serde(default)]
    pub pro: bool,
    /// 非表格类答案不返回内容
    #[serde(default)]
    pub no_detail: bool,
    /// 额外的 get-robot-data 请求参数
    #[serde(default)]
    pub request_params: Map<String, Value>,
    #[serde(default)]
    pub debug: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            cookie: cookie.into(),
            query_type: default_query_type(),
            per_page: default_per_page(),
            page: default_page(),
            page_loop: PageLoop::default(),
            retry: default_retry(),
            sleep_ms: 0,
            find: Vec::new(),
            user_agent: None,
            pro: false,
            no_detail: false,
            request_params: Map::new(),
            debug: false,
        }
    }

    pub fn with_loop(mut self, page_loop: PageLoop) -> Self {
        self.page_loop = page_loop;
        self
    }

    pub fn validate(&self) -> Result<(), WencaiError> {
        if self.query.trim().is_empty() {
            return Err(WencaiError::Validation("query is required".to_string()));
        }
        if self.cookie.trim().is_empty() {
            return Err(WencaiError::Validation("cookie is required".to_string()));
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.max(1),
            delay: Duration::from_millis(self.sleep_ms),
        }
    }

    fn per_page(&self) -> u32 {
        if self.per_page == 0 {
            default_per_page()
        } else {
            self.per_page
        }
    }

    fn start_page(&self) -> u32 {
        self.page.max(1)
    }
}

/// 分页获取的结果。中途失败时保留已获取的数据并带上错误
#[derive(Debug, Default)]
pub struct PagedRecords {
    pub records: Vec<Record>,
    /// 成功获取的页数
    pub pages: u32,
    pub error: Option<WencaiError>,
}

/// 查询结果
#[derive(Debug)]
pub enum QueryResult {
    /// 表格数据
    Records(PagedRecords),
    /// 非表格类答案，按组件标题合并
    Answer(Map<String, Value>),
    /// `no_detail` 时的非表格答案
    Empty,
}

/// 问财客户端
#[derive(Clone)]
pub struct WencaiClient {
    http: reqwest::Client,
    endpoints: Arc<Endpoints>,
    token: Arc<dyn TokenProvider>,
}

impl WencaiClient {
    pub fn new(http: reqwest::Client, endpoints: Endpoints, token: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            endpoints: Arc::new(endpoints),
            token,
        }
    }

    /// 执行一次完整查询
    pub async fn get(
        &self,
        req: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, WencaiError> {
        req.validate()?;

        let extracted = self.resolve(req, cancel).await?;

        if extracted.condition().is_some() {
            let paged = if req.find.is_empty() && req.page_loop.is_paging() {
                self.loop_page(&extracted, req, cancel).await
            } else {
                let page = req.start_page();
                match self.get_page(&extracted.url_params, req, page, cancel).await {
                    Ok(records) => PagedRecords {
                        records,
                        pages: 1,
                        error: None,
                    },
                    Err(e) => PagedRecords {
                        error: Some(page_error(page, e)),
                        ..Default::default()
                    },
                }
            };
            if req.debug {
                dump("查询结果", &paged.records);
            }
            return Ok(QueryResult::Records(paged));
        }

        if req.no_detail {
            return Ok(QueryResult::Empty);
        }

        let answer = match extracted.data {
            ExtractedData::Answer(map) => map,
            // 表格组件但没有 condition，返回组件信息本身
            ExtractedData::Table(table) => {
                let mut map = Map::new();
                map.insert("condition".to_string(), Value::Null);
                map.insert("comp_id".to_string(), table.comp_id.unwrap_or(Value::Null));
                map.insert("uuid".to_string(), table.uuid.unwrap_or(Value::Null));
                map
            }
        };
        if req.debug {
            dump("查询答案", &answer);
        }
        Ok(QueryResult::Answer(answer))
    }

    fn resolve_body(req: &QueryRequest) -> Value {
        let mut body = json!({
            "add_info": r#"{"urp":{"scene":1,"company":1,"business":1},"contentType":"json","searchInfo":true}"#,
            "perpage": "10",
            "page": 1,
            "source": "Ths_iwencai_Xuangu",
            "log_info": r#"{"input_type":"click"}"#,
            "version": "2.0",
            "secondary_intent": req.query_type,
            "question": req.query,
        });
        if let Value::Object(map) = &mut body {
            if req.pro {
                map.insert("iwcpro".to_string(), json!(1));
            }
            for (key, value) in &req.request_params {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }

    /// 解析问句，得到 condition 和分页参数
    pub async fn resolve(
        &self,
        req: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedQuery, WencaiError> {
        log::debug!("获取 condition 开始: {}", req.query);
        let body = Self::resolve_body(req);

        let result = while_do(req.retry_policy(), cancel, "get_robot_data", |_| {
            self.resolve_once(&body, req)
        })
        .await;

        match result {
            Ok(extracted) => {
                log::debug!("获取 get_robot_data 成功, row_count={}", extracted.row_count);
                Ok(extracted)
            }
            Err(e @ (WencaiError::Cancelled | WencaiError::Validation(_))) => Err(e),
            Err(e) => {
                log::error!("获取 get_robot_data 失败: {}", e);
                Err(WencaiError::Resolve(Box::new(e)))
            }
        }
    }

    async fn resolve_once(
        &self,
        body: &Value,
        req: &QueryRequest,
    ) -> Result<ExtractedQuery, WencaiError> {
        let headers =
            build_headers(self.token.as_ref(), &req.cookie, req.user_agent.as_deref()).await?;

        let response = self
            .http
            .post(&self.endpoints.robot_data)
            .headers(headers)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        Ok(convert(&bytes)?)
    }

    /// 获取单页数据
    pub async fn get_page(
        &self,
        url_params: &BTreeMap<String, String>,
        req: &QueryRequest,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, WencaiError> {
        log::debug!("第{}页开始", page);

        let mut form = url_params.clone();
        form.insert("perpage".to_string(), req.per_page().to_string());
        form.insert("page".to_string(), page.to_string());

        let (url, path) = if req.find.is_empty() {
            let mut url = self.endpoints.data_list.clone();
            if req.pro {
                url.push_str("?iwcpro=1");
            }
            (url, "answer.components.0.data.datas")
        } else {
            form.insert("query_type".to_string(), req.query_type.clone());
            form.insert("question".to_string(), req.find.join(","));
            (self.endpoints.find.clone(), "data.data.datas")
        };

        let label = format!("第{}页", page);
        let records = while_do(req.retry_policy(), cancel, &label, |_| {
            self.page_once(&url, &form, path, req, page)
        })
        .await?;

        log::debug!("第{}页成功, {} 条", page, records.len());
        Ok(records)
    }

    async fn page_once(
        &self,
        url: &str,
        form: &BTreeMap<String, String>,
        path: &str,
        req: &QueryRequest,
        page: u32,
    ) -> Result<Vec<Record>, WencaiError> {
        let headers =
            build_headers(self.token.as_ref(), &req.cookie, req.user_agent.as_deref()).await?;

        let response = self
            .http
            .post(url)
            .headers(headers)
            .form(form)
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| WencaiError::Decode(e.to_string()))?;

        let records: Vec<Record> = match get_value(&body, path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            _ => Vec::new(),
        };

        if records.is_empty() {
            return Err(WencaiError::Decode(format!("第{}页返回空", page)));
        }
        Ok(records)
    }

    /// 按页循环获取，出错时立即停止并返回已获取的数据
    pub async fn loop_page(
        &self,
        extracted: &ExtractedQuery,
        req: &QueryRequest,
        cancel: &CancellationToken,
    ) -> PagedRecords {
        let page_count = req.page_loop.page_count(extracted.row_count, req.per_page());
        let start = req.start_page();
        let mut result = PagedRecords::default();

        log::info!(
            "分页获取开始: row_count={}, perpage={}, 共{}页",
            extracted.row_count,
            req.per_page(),
            page_count
        );

        for offset in 0..page_count {
            let page = start + offset;
            if cancel.is_cancelled() {
                result.error = Some(WencaiError::Cancelled);
                break;
            }

            match self.get_page(&extracted.url_params, req, page, cancel).await {
                Ok(mut records) => {
                    result.records.append(&mut records);
                    result.pages += 1;
                }
                Err(e) => {
                    result.error = Some(page_error(page, e));
                    break;
                }
            }
        }

        result
    }
}

/// 单页失败包装为 Page，取消原样返回
fn page_error(page: u32, e: WencaiError) -> WencaiError {
    match e {
        WencaiError::Cancelled => e,
        e => {
            log::error!("第{}页失败: {}", page, e);
            WencaiError::Page {
                page,
                source: Box::new(e),
            }
        }
    }
}

/// 调试输出的最大长度
const DEBUG_DUMP_LIMIT: usize = 5000;

fn truncate_dump(text: &str) -> String {
    let total = text.chars().count();
    if total > DEBUG_DUMP_LIMIT {
        let head: String = text.chars().take(DEBUG_DUMP_LIMIT).collect();
        format!("{}... [总长度: {}]", head, total)
    } else {
        text.to_string()
    }
}

fn dump<T: Serialize + ?Sized>(label: &str, value: &T) {
    let text = serde_json::to_string(value).unwrap_or_default();
    log::info!("{}: {}", label, truncate_dump(&text));
}
