use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::error_chain;

/// Rewrites direct download URLs into tokenized proxy URLs.
#[derive(Debug, Clone)]
pub struct ProxyUrlBuilder {
    base_url: String,
    token: String,
}

impl ProxyUrlBuilder {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn build(&self, download_url: &str) -> String {
        format!(
            "{}/v0/proxy?url={}&token={}",
            self.base_url,
            urlencoding::encode(download_url),
            urlencoding::encode(&self.token)
        )
    }
}

/// Queries the proxy service to expand a download URL into final item URLs.
///
/// Proxy-side anomalies never fail: an unreachable service, a non-2xx status
/// or an unexpected body all expand to zero items.
#[derive(Clone)]
pub struct ProxyClient {
    http_client: Client,
    urls: ProxyUrlBuilder,
}

impl ProxyClient {
    pub fn new(http_client: Client, urls: ProxyUrlBuilder) -> Self {
        Self { http_client, urls }
    }

    pub async fn expand(&self, download_url: &str) -> Vec<String> {
        let proxy_url = self.urls.build(download_url);

        let response = match self.http_client.get(&proxy_url).send().await {
            Ok(response) => response,
            Err(error) => {
                // The request URL carries the proxy token.
                let error = error.without_url();
                warn!(download_url, "proxy request failed: {}", error_chain(&error));
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                download_url,
                status = response.status().as_u16(),
                "proxy returned a non-success status"
            );
            return Vec::new();
        }

        let body = match response.json::<Value>().await {
            Ok(body) => body,
            Err(error) => {
                let error = error.without_url();
                warn!(download_url, "proxy returned invalid JSON: {}", error_chain(&error));
                return Vec::new();
            }
        };

        let items = extract_items(&body);
        if items.is_empty() {
            warn!(download_url, "proxy response contained no items");
        } else {
            debug!(download_url, count = items.len(), "proxy expanded link");
        }
        items
    }
}

// Accepts `{ data: { items: [...] } }` and the older flat `{ data: [...] }`.
fn extract_items(body: &Value) -> Vec<String> {
    let data = body.get("data");
    let Some(items) = data
        .and_then(|data| data.get("items"))
        .or(data)
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.clone()),
            Value::Object(fields) => fields
                .get("url")
                .or_else(|| fields.get("link"))
                .and_then(Value::as_str)
                .map(ToString::to_string),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::test_support::LogCapture;

    fn builder() -> ProxyUrlBuilder {
        ProxyUrlBuilder::new("https://proxy.example/", "tok")
    }

    #[test]
    fn build_is_deterministic_and_reversible() {
        let original = "https://direct.example/d/AB CD/file name.mkv?x=1&y=ü";
        let first = builder().build(original);
        let second = builder().build(original);
        assert_eq!(first, second);

        let parsed = Url::parse(&first).expect("proxy url should parse");
        assert_eq!(parsed.path(), "/v0/proxy");
        let params = parsed.query_pairs().collect::<Vec<_>>();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, "url");
        assert_eq!(params[0].1, original);
        assert_eq!(params[1].0, "token");
        assert_eq!(params[1].1, "tok");
    }

    #[test]
    fn build_encodes_malformed_input_as_is() {
        let built = builder().build("not a url %%");
        assert_eq!(
            built,
            "https://proxy.example/v0/proxy?url=not%20a%20url%20%25%25&token=tok"
        );
    }

    #[test]
    fn extract_items_handles_both_shapes() {
        assert_eq!(
            extract_items(&json!({"data": {"items": ["a", "b"]}})),
            vec!["a", "b"]
        );
        assert_eq!(extract_items(&json!({"data": ["c"]})), vec!["c"]);
        assert_eq!(
            extract_items(&json!({"data": {"items": [{"url": "d"}, 7]}})),
            vec!["d"]
        );
        assert!(extract_items(&json!({"data": {"items": []}})).is_empty());
        assert!(extract_items(&json!({"error": "nope"})).is_empty());
    }

    #[tokio::test]
    async fn expand_returns_items_in_order() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v0/proxy")
                .query_param("url", "https://direct/x1")
                .query_param("token", "tok");
            then.status(200)
                .json_body(json!({"data": {"items": ["https://proxy/x1a", "https://proxy/x1b"]}}));
        });

        let client = ProxyClient::new(Client::new(), ProxyUrlBuilder::new(server.base_url(), "tok"));
        let items = client.expand("https://direct/x1").await;

        mock.assert();
        assert_eq!(items, vec!["https://proxy/x1a", "https://proxy/x1b"]);
    }

    #[tokio::test]
    async fn expand_degrades_on_proxy_errors() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/v0/proxy");
            then.status(502).body("bad gateway");
        });

        let client = ProxyClient::new(Client::new(), ProxyUrlBuilder::new(server.base_url(), "tok"));

        assert!(client.expand("https://direct/x1").await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_proxy_keeps_token_out_of_logs() {
        let (logs, _guard) = LogCapture::install();
        let client = ProxyClient::new(
            Client::new(),
            ProxyUrlBuilder::new("http://127.0.0.1:9", "SECRET-TOKEN"),
        );

        let items = client.expand("https://direct/x1").await;

        assert!(items.is_empty());
        let logs = logs.contents();
        assert!(logs.contains("proxy request failed"), "logs: {logs}");
        assert!(logs.contains("https://direct/x1"), "logs: {logs}");
        assert!(!logs.contains("SECRET-TOKEN"), "logs: {logs}");
    }
}
