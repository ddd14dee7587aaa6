//! Where transferred bytes come from.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use url::Url;

use crate::errors::{Error, Result};

pub type SourceStream = BoxStream<'static, std::io::Result<Bytes>>;

/// An opened source: response metadata plus the not yet consumed body.
pub struct SourceBody {
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
    pub body: SourceStream,
}

/// Opens remote resources as byte streams.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Start fetching `url`. Fails with [`Error::SourceUnavailable`] if the resource cannot be
    /// reached or answers with anything but success.
    async fn open(&self, url: &Url) -> Result<SourceBody>;
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceConfig {
    pub connect_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

/// [`Source`] that streams HTTP(S) GET responses.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<HttpSource> {
        let mut builder = reqwest::Client::builder().user_agent(
            config
                .user_agent
                .clone()
                .unwrap_or_else(|| format!("ferry/{}", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        Ok(HttpSource {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn open(&self, url: &Url) -> Result<SourceBody> {
        let res = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| Error::SourceUnavailable {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let headers: Vec<(String, String)> = res
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or("<non-ascii>").to_string(),
                )
            })
            .collect();
        let content_length = res.content_length();
        tracing::debug!(status = %res.status(), ?headers, "source response");

        let body = res
            .bytes_stream()
            // convert the Result::Err type to std::io::Error
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
            .boxed();

        Ok(SourceBody {
            headers,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::TryStreamExt;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    use super::*;

    fn source() -> HttpSource {
        HttpSource::new(&SourceConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn streams_successful_responses() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/charts/chart.jpg")).respond_with(
                status_code(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .body(vec![7u8; 3000]),
            ),
        );
        let url = Url::parse(&server.url_str("/charts/chart.jpg")).unwrap();

        let opened = source().open(&url).await.unwrap();
        assert_eq!(opened.content_length, Some(3000));
        assert!(opened
            .headers
            .iter()
            .any(|(name, value)| name == "content-type" && value == "image/jpeg"));

        let chunks: Vec<Bytes> = opened.body.try_collect().await.unwrap();
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 3000);
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing.jpg"))
                .respond_with(status_code(404)),
        );
        let url = Url::parse(&server.url_str("/missing.jpg")).unwrap();

        match source().open(&url).await {
            Err(Error::SourceUnavailable { url: failed, .. }) => assert_eq!(failed, url.to_string()),
            Err(e) => panic!("expected SourceUnavailable, got {e:?}"),
            Ok(_) => panic!("expected SourceUnavailable, got a body"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        // nothing listens on port 9 (discard) in test environments
        let url = Url::parse("http://127.0.0.1:9/chart.jpg").unwrap();
        assert!(matches!(
            source().open(&url).await,
            Err(Error::SourceUnavailable { .. })
        ));
    }
}
