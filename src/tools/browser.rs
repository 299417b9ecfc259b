//! Browser 工具：search（DuckDuckGo HTML 结果页）与 open（抓取网页正文）
//!
//! search 返回 JSON 数组（title / href / body），最多 limit 条；
//! open 抓取 URL，HTML 经 html2text 提取可读文本后截断到 open_max_chars。

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::config::BrowserSection;
use crate::tools::Tool;

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

pub struct BrowserTool {
    client: Client,
    search_limit: usize,
    open_max_chars: usize,
    result_link: Regex,
    result_snippet: Regex,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 常见 HTML 实体解码（结果页标题与摘要中出现）
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// 百分号解码（仅处理 %XX，非法序列原样保留）
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// DuckDuckGo 结果链接是跳转地址（/l/?uddg=<目标URL>），还原为目标 URL
fn resolve_ddg_href(href: &str) -> String {
    if let Some(pos) = href.find("uddg=") {
        let encoded = &href[pos + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        return percent_decode(encoded);
    }
    if href.starts_with("//") {
        return format!("https:{}", href);
    }
    href.to_string()
}

impl BrowserTool {
    pub fn new(cfg: &BrowserSection) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.fetch_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            search_limit: cfg.search_limit,
            open_max_chars: cfg.open_max_chars,
            result_link: Regex::new(r#"(?s)class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
                .expect("result link pattern"),
            result_snippet: Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#)
                .expect("result snippet pattern"),
        }
    }

    /// 将 HTML 转为可读文本（去除 script/style 等）
    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<String, String> {
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        let resp = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("Search request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;

        let snippets: Vec<String> = self
            .result_snippet
            .captures_iter(&body)
            .map(|c| decode_entities(&strip_html_tags(&c[1])))
            .collect();

        let results: Vec<Value> = self
            .result_link
            .captures_iter(&body)
            .take(limit)
            .enumerate()
            .map(|(i, c)| {
                serde_json::json!({
                    "title": decode_entities(&strip_html_tags(&c[2])),
                    "href": resolve_ddg_href(&c[1]),
                    "body": snippets.get(i).cloned().unwrap_or_default(),
                })
            })
            .collect();

        serde_json::to_string(&results).map_err(|e| e.to_string())
    }

    async fn open(&self, url: &str) -> Result<String, String> {
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;

        let text = self.html_to_text(&body);
        Ok(text.chars().take(self.open_max_chars).collect())
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Search or fetch web pages."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["search", "open"]},
                "query": {"type": "string"},
                "url": {"type": "string", "format": "uri"},
                "limit": {"type": "integer", "default": 5}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _conv_id: &str, args: Value) -> Result<String, String> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "search" => {
                let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
                let limit = args
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .map(|n| n as usize)
                    .unwrap_or(self.search_limit);
                tracing::info!(query = %query, limit, "browser search");
                self.search(query, limit).await
            }
            "open" => {
                let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("").trim();
                tracing::info!(url = %url, "browser open");
                self.open(url).await
            }
            _ => Ok("unknown browser action".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ddg_redirect_href() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=abc";
        assert_eq!(resolve_ddg_href(href), "https://example.com/page");
    }

    #[test]
    fn test_resolve_plain_href() {
        assert_eq!(
            resolve_ddg_href("https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            resolve_ddg_href("//example.com/x"),
            "https://example.com/x"
        );
    }

    #[test]
    fn test_strip_and_decode() {
        let html = "<b>Rust &amp; Tokio</b>";
        assert_eq!(decode_entities(&strip_html_tags(html)), "Rust & Tokio");
    }

    #[tokio::test]
    async fn test_unknown_action_is_text() {
        let tool = BrowserTool::new(&BrowserSection::default());
        let out = tool
            .execute("conv-1", serde_json::json!({"action": "scroll"}))
            .await
            .unwrap();
        assert_eq!(out, "unknown browser action");
    }
}
