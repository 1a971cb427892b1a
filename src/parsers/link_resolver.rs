//! 播放页链接解析
//!
//! 从视频播放页中提取 m3u8 地址。未匹配到地址属于正常结果（`Ok(None)`），
//! 不作为错误处理。

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;

use crate::core::error_handling::DownloadError;
use crate::core::fetcher::{ResponseHandler, RetryingFetcher};
use crate::core::models::FetchRequest;

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// 解析页面地址，返回 m3u8 地址
    async fn resolve(
        &self,
        page_url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<String>, DownloadError>;
}

/// 输入已经是 m3u8 地址时使用
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLinkResolver;

#[async_trait]
impl LinkResolver for DirectLinkResolver {
    async fn resolve(
        &self,
        page_url: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<Option<String>, DownloadError> {
        Ok(Some(page_url.to_string()))
    }
}

const PLAYER_PATTERN: &str = r#"(?s)var player_aaaa=.*?"url":"(.*?)","#;

/// 从页面正文中提取 `player_aaaa` 的地址
#[derive(Debug, Clone)]
pub struct PlayerLinkExtractor {
    pattern: Regex,
}

impl PlayerLinkExtractor {
    pub fn new() -> Result<Self, DownloadError> {
        let pattern = Regex::new(PLAYER_PATTERN)
            .map_err(|e| DownloadError::configuration(e.to_string(), "player pattern"))?;
        Ok(Self { pattern })
    }

    pub fn extract(&self, html: &str) -> Option<String> {
        self.pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().replace('\\', ""))
            .filter(|link| !link.is_empty())
    }
}

impl ResponseHandler for PlayerLinkExtractor {
    type Output = Option<String>;

    /// A page without a player block is `Ok(None)`, not an error.
    fn handle(&self, _index: usize, url: &str, body: &str) -> Result<Option<String>, DownloadError> {
        let link = self.extract(body);
        match &link {
            Some(link) => tracing::debug!("resolved {} to {}", url, link),
            None => tracing::warn!("no m3u8 link found on {}", url),
        }
        Ok(link)
    }
}

/// 通过播放页脚本中的 `player_aaaa` 变量获取地址
#[derive(Clone)]
pub struct PlayerPageResolver {
    fetcher: RetryingFetcher,
    extractor: PlayerLinkExtractor,
}

impl PlayerPageResolver {
    pub fn new(fetcher: RetryingFetcher) -> Result<Self, DownloadError> {
        Ok(Self {
            fetcher,
            extractor: PlayerLinkExtractor::new()?,
        })
    }

    /// Extracts the manifest URL from the `player_aaaa` script block of a page.
    pub fn extract(&self, html: &str) -> Option<String> {
        self.extractor.extract(html)
    }
}

#[async_trait]
impl LinkResolver for PlayerPageResolver {
    async fn resolve(
        &self,
        page_url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<String>, DownloadError> {
        let request = FetchRequest::text(0, page_url).with_headers(headers.clone());
        self.fetcher.get_with(&request, &self.extractor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::testing::FlakyTransport;
    use std::sync::Arc;

    fn resolver() -> PlayerPageResolver {
        let fetcher = RetryingFetcher::new(Arc::new(FlakyTransport::new()), 1);
        PlayerPageResolver::new(fetcher).unwrap()
    }

    const PAGE: &str = r#"<html><script type="text/javascript">
var player_aaaa={"flag":"play","encrypt":0,"trysee":0,
"link":"\/index.php\/vod\/play\/id\/6366\/sid\/1\/nid\/1.html",
"url":"https:\/\/cdn.example.com\/20221201\/abc\/index.m3u8","url_next":""}
</script></html>"#;

    #[test]
    fn test_extract_player_url_unescapes_slashes() {
        assert_eq!(
            resolver().extract(PAGE).as_deref(),
            Some("https://cdn.example.com/20221201/abc/index.m3u8")
        );
    }

    #[test]
    fn test_page_without_player_is_none() {
        let resolver = resolver();
        assert_eq!(resolver.extract("<html><body>nothing</body></html>"), None);
        assert_eq!(resolver.extract(r#"var player_aaaa={"url":"","x":1}"#), None);
    }

    #[tokio::test]
    async fn test_resolve_fetches_page_body() {
        // FlakyTransport serves "body of <url>", which holds no player block.
        let link = resolver()
            .resolve("http://x/play/1.html", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(link, None);
    }

    #[tokio::test]
    async fn test_extractor_as_response_handler() {
        let transport = Arc::new(FlakyTransport::new().failing("http://x/play/2.html", 1));
        let fetcher = RetryingFetcher::new(transport.clone(), 2);
        let extractor = PlayerLinkExtractor::new().unwrap();

        let link = fetcher
            .get_with(&FetchRequest::text(0, "http://x/play/2.html"), &extractor)
            .await
            .unwrap();
        assert_eq!(link, None);
        assert_eq!(transport.attempts("http://x/play/2.html"), 2);

        let handled = extractor.handle(3, "http://x/play/1.html", PAGE).unwrap();
        assert_eq!(
            handled.as_deref(),
            Some("https://cdn.example.com/20221201/abc/index.m3u8")
        );
    }

    #[tokio::test]
    async fn test_direct_resolver_passes_through() {
        let link = DirectLinkResolver
            .resolve("http://x/index.m3u8", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(link.as_deref(), Some("http://x/index.m3u8"));
    }
}
