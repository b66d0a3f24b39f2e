use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use tracing::{debug, info};

use crate::{debrid::DebridApi, error::ResolveError, proxy::ProxyClient};

/// Turns raw debrid-hosted links into final download URLs.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve_links(&self, raw_links: &[String]) -> Result<Vec<String>, ResolveError>;
}

/// Unrestricts every link through the debrid service, then expands each
/// direct URL through the proxy service.
pub struct ProxyLinkResolver {
    debrid: Arc<dyn DebridApi>,
    proxy: ProxyClient,
}

impl ProxyLinkResolver {
    pub fn new(debrid: Arc<dyn DebridApi>, proxy: ProxyClient) -> Self {
        Self { debrid, proxy }
    }
}

#[async_trait]
impl LinkResolver for ProxyLinkResolver {
    async fn resolve_links(&self, raw_links: &[String]) -> Result<Vec<String>, ResolveError> {
        // All-or-nothing: the first unrestrict failure drops the rest.
        let direct_urls = try_join_all(raw_links.iter().map(|link| async move {
            self.debrid
                .unrestrict_link(link)
                .await
                .map(|unrestricted| unrestricted.download)
                .map_err(|source| ResolveError::Unrestrict {
                    link: link.clone(),
                    source,
                })
        }))
        .await?;
        debug!(count = direct_urls.len(), "links unrestricted");

        let expanded = join_all(direct_urls.iter().map(|url| self.proxy.expand(url))).await;
        let items = expanded.into_iter().flatten().collect::<Vec<_>>();

        info!(
            raw_links = raw_links.len(),
            items = items.len(),
            "links resolved"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;

    use super::*;
    use crate::{
        debrid::DebridClient,
        error::DebridError,
        proxy::ProxyUrlBuilder,
    };

    fn resolver_for(server: &MockServer) -> ProxyLinkResolver {
        let debrid = DebridClient::new(Client::new(), server.base_url(), "key");
        let proxy = ProxyClient::new(Client::new(), ProxyUrlBuilder::new(server.base_url(), "tok"));
        ProxyLinkResolver::new(Arc::new(debrid), proxy)
    }

    fn mock_unrestrict(server: &MockServer, link: &str, download: &str, delay_ms: u64) {
        let body = format!("link={}", urlencoding::encode(link));
        let download = download.to_string();
        server.mock(move |when, then| {
            when.method(POST).path("/unrestrict/link").body(body.as_str());
            then.status(200)
                .delay(Duration::from_millis(delay_ms))
                .json_body(json!({"download": download}));
        });
    }

    fn mock_proxy(server: &MockServer, direct: &str, items: serde_json::Value) {
        let direct = direct.to_string();
        server.mock(move |when, then| {
            when.method(GET)
                .path("/v0/proxy")
                .query_param("url", direct.as_str());
            then.status(200).json_body(json!({"data": {"items": items}}));
        });
    }

    #[tokio::test]
    async fn preserves_link_order_and_flattens_items() {
        let server = MockServer::start_async().await;
        // The first link answers last so completion order differs from input order.
        mock_unrestrict(&server, "https://debrid/a", "https://direct/a", 150);
        mock_unrestrict(&server, "https://debrid/b", "https://direct/b", 0);
        mock_unrestrict(&server, "https://debrid/c", "https://direct/c", 50);
        mock_proxy(&server, "https://direct/a", json!(["https://proxy/a1", "https://proxy/a2"]));
        mock_proxy(&server, "https://direct/b", json!([]));
        mock_proxy(&server, "https://direct/c", json!(["https://proxy/c1"]));

        let links = vec![
            "https://debrid/a".to_string(),
            "https://debrid/b".to_string(),
            "https://debrid/c".to_string(),
        ];
        let items = resolver_for(&server)
            .resolve_links(&links)
            .await
            .expect("resolution should succeed");

        assert_eq!(
            items,
            vec!["https://proxy/a1", "https://proxy/a2", "https://proxy/c1"]
        );
    }

    #[tokio::test]
    async fn unrestrict_failure_aborts_resolution() {
        let server = MockServer::start_async().await;
        mock_unrestrict(&server, "https://debrid/a", "https://direct/a", 0);
        server.mock(|when, then| {
            when.method(POST)
                .path("/unrestrict/link")
                .body("link=https%3A%2F%2Fdebrid%2Fdead");
            then.status(503).json_body(json!({"error": "hoster_unavailable"}));
        });
        mock_proxy(&server, "https://direct/a", json!(["https://proxy/a1"]));

        let links = vec![
            "https://debrid/a".to_string(),
            "https://debrid/dead".to_string(),
        ];
        let error = resolver_for(&server)
            .resolve_links(&links)
            .await
            .expect_err("a failed unrestrict should abort");

        let ResolveError::Unrestrict { link, source } = error;
        assert_eq!(link, "https://debrid/dead");
        assert!(matches!(source, DebridError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_link_set_resolves_to_nothing() {
        let server = MockServer::start_async().await;

        let items = resolver_for(&server)
            .resolve_links(&[])
            .await
            .expect("nothing to resolve");

        assert!(items.is_empty());
    }
}
