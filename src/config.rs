//! 配置模块
//!
//! 支持从 JSON 文件加载系统配置，敏感信息可以用环境变量覆盖：
//! - `API_KEY` 覆盖 api.api_key
//! - `WENCAI_COOKIE` 覆盖 wencai.cookie

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::wencai::Endpoints;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 工作线程数（0 表示使用 CPU 核心数）
    #[serde(default)]
    pub workers: usize,
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API Key（为空则不启用认证）
    #[serde(default)]
    pub api_key: String,
    /// 请求超时时间（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// 连接超时时间（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 文件路径
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// 问财配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WencaiConfig {
    /// 登录后的 Cookie
    #[serde(default)]
    pub cookie: String,
    /// 固定 User-Agent，为空时每次随机
    #[serde(default)]
    pub user_agent: String,
    /// 生成 hexin-v 的脚本解释器
    #[serde(default = "default_token_program")]
    pub token_program: String,
    /// 生成 hexin-v 的脚本
    #[serde(default = "default_token_script")]
    pub token_script: String,
    /// 固定 token，非空时不再调用脚本
    #[serde(default)]
    pub token: String,
    /// 每次调用的最大尝试次数
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// 重试间隔（毫秒）
    #[serde(default)]
    pub sleep_ms: u64,
    /// 每页条数
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// 付费版
    #[serde(default)]
    pub pro: bool,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// 单个定时任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron 表达式（秒 分 时 日 月 周）
    pub cron: String,
    /// 查询问句
    #[serde(default)]
    pub query: String,
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 启动时立即执行
    #[serde(default)]
    pub run_on_start: bool,
    /// 竞价选股任务
    #[serde(default = "default_stock_job")]
    pub stock: JobConfig,
    /// 基础数据任务
    #[serde(default = "default_base_info_job")]
    pub base_info: JobConfig,
    /// 涨停数据任务
    #[serde(default = "default_zt_info_job")]
    pub zt_info: JobConfig,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// API 配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub wencai: WencaiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 全局调试开关，打开后输出查询结果
    #[serde(default)]
    pub debug: bool,
}

// 默认值函数
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_database_path() -> String { "data/wencai.db".to_string() }
fn default_token_program() -> String { "node".to_string() }
fn default_token_script() -> String { "hexin-v.js".to_string() }
fn default_retry() -> u32 { 10 }
fn default_per_page() -> u32 { 100 }
fn default_true() -> bool { true }

fn default_stock_job() -> JobConfig {
    JobConfig {
        enabled: true,
        cron: "0 */5 9-16 * * Mon-Fri".to_string(),
        query: "竞价涨幅；竞价未匹配金额；竞价金额；成交额；涨停封单额；连续涨停天数".to_string(),
    }
}

fn default_base_info_job() -> JobConfig {
    JobConfig {
        enabled: true,
        cron: "0 */5 9-16 * * Mon-Fri".to_string(),
        query: "竞价量；竞价金额；竞价未匹配量；成交额；a股市值(不含限售股)".to_string(),
    }
}

fn default_zt_info_job() -> JobConfig {
    JobConfig {
        enabled: true,
        cron: "0 */1 9-16 * * Mon-Fri".to_string(),
        query: "今日涨停或跌停或曾涨停；涨停原因类别；涨停封单额；跌停封单额；连续涨停天数".to_string(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: 0,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for WencaiConfig {
    fn default() -> Self {
        Self {
            cookie: String::new(),
            user_agent: String::new(),
            token_program: default_token_program(),
            token_script: default_token_script(),
            token: String::new(),
            retry: default_retry(),
            sleep_ms: 0,
            per_page: default_per_page(),
            pro: false,
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_on_start: false,
            stock: default_stock_job(),
            base_info: default_base_info_job(),
            zt_info: default_zt_info_job(),
        }
    }
}

impl AppConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 加载配置：第一个存在的配置文件，都不存在时使用默认值，最后应用环境变量覆盖。
    /// 配置文件存在但无法解析时返回错误。
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&["config.json", "config/config.json"])?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<Self> {
        for path in paths {
            let path = path.as_ref();
            if path.exists() {
                return Self::from_file(path)
                    .with_context(|| format!("加载配置文件 {} 失败", path.display()));
            }
        }
        Ok(Self::default())
    }

    /// 环境变量覆盖，空值忽略
    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(key) = lookup("API_KEY").filter(|v| !v.is_empty()) {
            self.api.api_key = key;
        }
        if let Some(cookie) = lookup("WENCAI_COOKIE").filter(|v| !v.is_empty()) {
            self.wencai.cookie = cookie;
        }
    }

    /// 获取服务器绑定地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试缺省字段取默认值
    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "server": {"port": 9000},
                "wencai": {"cookie": "v=abc", "retry": 3},
                "scheduler": {"run_on_start": true, "zt_info": {"cron": "0 */2 9-15 * * Mon-Fri", "enabled": false}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.wencai.cookie, "v=abc");
        assert_eq!(config.wencai.retry, 3);
        assert_eq!(config.wencai.per_page, 100);
        assert_eq!(config.wencai.token_program, "node");
        assert!(config.scheduler.run_on_start);
        assert!(!config.scheduler.zt_info.enabled);
        assert_eq!(config.scheduler.zt_info.query, "");
        assert_eq!(config.scheduler.stock.cron, "0 */5 9-16 * * Mon-Fri");
        assert_eq!(config.database.path, "data/wencai.db");
        assert!(!config.debug);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.wencai.cookie = "from-file".to_string();

        config.apply_env(|key| match key {
            "API_KEY" => Some("secret".to_string()),
            "WENCAI_COOKIE" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api.api_key, "secret");
        assert_eq!(config.wencai.cookie, "from-file");

        config.apply_env(|key| (key == "WENCAI_COOKIE").then(|| "from-env".to_string()));
        assert_eq!(config.wencai.cookie, "from-env");
    }

    /// 配置文件损坏时报错，不退回默认值
    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("config.json");
        std::fs::write(&broken, r#"{"server": {"port": "not-a-number"}"#).unwrap();

        let err = AppConfig::load_from(&[&broken]).unwrap_err();
        assert!(format!("{:#}", err).contains("加载配置文件"));

        let missing = dir.path().join("missing.json");
        let config = AppConfig::load_from(&[&missing]).unwrap();
        assert_eq!(config.server.port, 8080);

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"server": {"port": 9100}}"#).unwrap();
        let config = AppConfig::load_from(&[&missing, &good, &broken]).unwrap();
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"debug": true, "database": {"path": "/tmp/x.db"}}"#).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.database.path, "/tmp/x.db");
        assert!(AppConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
