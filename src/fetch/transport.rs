use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};

use crate::config::TransportConfig;

use super::request::{apply_proxy, PreparedRequest};
use super::FetchResult;

/// Raw answer from the upstream provider. Status handling is left to the caller.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Seam through which every outbound request is issued.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &PreparedRequest) -> FetchResult<TransportResponse>;
}

/// `reqwest`-backed transport with an optional pass-through proxy.
pub struct HttpTransport {
    client: Client,
    proxy_prefix: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> FetchResult<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            proxy_prefix: config.proxy_prefix.clone(),
        })
    }

    fn target_url(&self, url: &str) -> String {
        match &self.proxy_prefix {
            Some(prefix) => apply_proxy(prefix, url),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &PreparedRequest) -> FetchResult<TransportResponse> {
        let url = self.target_url(&request.url);
        debug!("GET {}", request.url);

        let response = self
            .client
            .get(&url)
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxies_target_url_when_configured() {
        let config = TransportConfig {
            proxy_prefix: Some("https://proxy.test/?url=".to_string()),
            ..TransportConfig::default()
        };
        let transport = HttpTransport::new(&config).expect("build transport");

        assert_eq!(
            transport.target_url("https://quotes.test/AAPL"),
            "https://proxy.test/?url=https%3A%2F%2Fquotes.test%2FAAPL"
        );
    }

    #[test]
    fn leaves_url_untouched_without_proxy() {
        let transport = HttpTransport::new(&TransportConfig::default()).expect("build transport");
        assert_eq!(
            transport.target_url("https://quotes.test/AAPL"),
            "https://quotes.test/AAPL"
        );
    }
}
