//! 请求头与 hexin-v 签名
//!
//! 每次请求都需要 Cookie、User-Agent 和 `hexin-v` 反爬 token。
//! token 的生成方式通过 [`TokenProvider`] 注入，默认实现调用外部脚本。

use std::path::PathBuf;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};

use crate::error::WencaiError;

/// 常用浏览器 User-Agent
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// 反爬 token 的请求头名
pub const TOKEN_HEADER: &str = "hexin-v";

/// 随机选一个 User-Agent
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// hexin-v token 生成器
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 生成一个新的 token，失败时整个请求终止
    async fn token(&self) -> Result<String, WencaiError>;
}

/// 固定 token，用于测试或已经在外部算好 token 的场景
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, WencaiError> {
        Ok(self.0.clone())
    }
}

/// 调用外部脚本生成 token，例如 `node hexin-v.js`
pub struct ScriptTokenProvider {
    program: String,
    script: PathBuf,
}

impl ScriptTokenProvider {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for ScriptTokenProvider {
    async fn token(&self) -> Result<String, WencaiError> {
        if !self.script.exists() {
            return Err(WencaiError::Token(format!(
                "找不到 token 脚本: {}",
                self.script.display()
            )));
        }

        let output = tokio::process::Command::new(&self.program)
            .arg(&self.script)
            .output()
            .await
            .map_err(|e| WencaiError::Token(format!("执行 {} 失败: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(WencaiError::Token(format!(
                "脚本退出码 {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(WencaiError::Token("脚本没有输出 token".to_string()));
        }
        Ok(token)
    }
}

/// 组装一次请求的请求头
pub async fn build_headers(
    provider: &dyn TokenProvider,
    cookie: &str,
    user_agent: Option<&str>,
) -> Result<HeaderMap, WencaiError> {
    let token = provider.token().await?;
    let user_agent = user_agent
        .filter(|ua| !ua.is_empty())
        .unwrap_or_else(|| random_user_agent());

    let mut headers = HeaderMap::new();
    headers.insert(
        TOKEN_HEADER,
        HeaderValue::from_str(&token)
            .map_err(|_| WencaiError::Token("token 含有非法字符".to_string()))?,
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|_| WencaiError::Validation("User-Agent 含有非法字符".to_string()))?,
    );
    if !cookie.is_empty() {
        headers.insert(
            COOKIE,
            HeaderValue::from_str(cookie)
                .map_err(|_| WencaiError::Validation("Cookie 含有非法字符".to_string()))?,
        );
    }
    Ok(headers)
}
