use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue};
use std::time::Duration;

use crate::cache::{HttpRequest, HttpResponse};
use crate::config::NetworkConfig;

/// Network capability consumed by the cache.
///
/// Any transport failure (timeout, refused connection, DNS) is an `Err`.
/// HTTP error statuses are ordinary responses.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Network backed by a reqwest client
#[derive(Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
      let value =
        HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value: {}", e))?;
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| {
        v.to_str()
          .ok()
          .map(|v| (k.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(HttpResponse {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_collects_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/properties"))
      .and(header("accept", "application/json"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw(r#"[{"id":1}]"#, "application/json"),
      )
      .expect(1)
      .mount(&server)
      .await;

    let network = ReqwestNetwork::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/rest/v1/properties", server.uri())).unwrap();
    let request = HttpRequest::get(url).with_header("Accept", "application/json");

    let response = network.fetch(&request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.text(), r#"[{"id":1}]"#);
  }

  #[tokio::test]
  async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
      .mount(&server)
      .await;

    let network = ReqwestNetwork::new(&NetworkConfig::default()).unwrap();
    let url = Url::parse(&format!("{}/anything", server.uri())).unwrap();

    let response = network.fetch(&HttpRequest::get(url)).await.unwrap();
    assert_eq!(response.status, 500);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_connection_failure_is_an_error() {
    let network = ReqwestNetwork::new(&NetworkConfig {
      timeout_secs: 2,
      ..NetworkConfig::default()
    })
    .unwrap();
    let url = Url::parse("http://127.0.0.1:1/unreachable").unwrap();

    assert!(network.fetch(&HttpRequest::get(url)).await.is_err());
  }
}
