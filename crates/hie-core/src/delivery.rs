//! Sending built messages to the health information exchange.
//!
//! [`DeliveryClient`] is the seam between the retry orchestrator and the network. The
//! production implementation, [`HttpDeliveryClient`], POSTs ER7 text to an HTTP endpoint
//! chosen by the message's processing environment.

use crate::constants::HL7_CONTENT_TYPE;
use crate::{HieError, HieResult};
use async_trait::async_trait;
use hie_uuid::ControlId;
use hl7::Environment;
use std::sync::Arc;
use std::time::Duration;

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// A single delivery attempt.
#[derive(Clone, Debug)]
pub struct DeliveryRequest {
    pub message: Arc<str>,
    pub control_id: ControlId,
    pub environment: Environment,
}

/// Why a delivery attempt failed. Every variant is retryable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("no exchange endpoint configured for the {0} environment")]
    NoEndpoint(Environment),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("exchange rejected message with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery client panicked: {0}")]
    Panicked(String),
}

/// Delivers one message to the exchange.
///
/// Implementations report success only when the exchange accepted the message.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// Exchange endpoints per processing environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryEndpoints {
    pub test: Option<String>,
    pub production: Option<String>,
}

impl DeliveryEndpoints {
    pub fn for_environment(&self, environment: Environment) -> Option<&str> {
        match environment {
            Environment::Test => self.test.as_deref(),
            Environment::Production => self.production.as_deref(),
        }
    }
}

/// [`DeliveryClient`] that POSTs ER7 text over HTTP.
///
/// Any 2xx response counts as accepted.
#[derive(Clone, Debug)]
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    endpoints: DeliveryEndpoints,
}

impl HttpDeliveryClient {
    /// # Errors
    ///
    /// Returns [`HieError::HttpClient`] if the HTTP client cannot be constructed.
    pub fn new(endpoints: DeliveryEndpoints, timeout: Duration) -> HieResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(HieError::HttpClient)?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let endpoint = self
            .endpoints
            .for_environment(request.environment)
            .ok_or(DeliveryError::NoEndpoint(request.environment))?;

        let resp = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, HL7_CONTENT_TYPE)
            .header("X-Control-Id", request.control_id.to_string())
            .header("X-Processing-Id", request.environment.processing_id())
            .body(request.message.to_string())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(control_id = %request.control_id, %status, "exchange accepted message");
            return Ok(());
        }

        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hie_uuid::ControlIdGenerator;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, captures the raw request and answers with `status_line`.
    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/hl7", listener.local_addr().expect("addr"));

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().expect("length"))
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + length {
                        break;
                    }
                }
            }
            let body = "rejected by test";
            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            String::from_utf8_lossy(&raw).into_owned()
        });

        (url, handle)
    }

    fn request(environment: Environment) -> DeliveryRequest {
        DeliveryRequest {
            message: Arc::from("MSH|^~\\&|NHS01\rPID|1\r"),
            control_id: ControlIdGenerator::new().generate(),
            environment,
        }
    }

    #[tokio::test]
    async fn posts_er7_with_control_headers() {
        let (url, server) = one_shot_server("HTTP/1.1 202 Accepted").await;
        let client = HttpDeliveryClient::new(
            DeliveryEndpoints {
                test: Some(url),
                production: None,
            },
            Duration::from_secs(5),
        )
        .expect("client");
        let req = request(Environment::Test);

        client.deliver(&req).await.expect("accepted");

        let raw = server.await.expect("server").to_ascii_lowercase();
        assert!(raw.starts_with("post /hl7 "));
        assert!(raw.contains("content-type: x-application/hl7-v2+er7"));
        assert!(raw.contains(&format!("x-control-id: {}", req.control_id)));
        assert!(raw.contains("x-processing-id: t"));
        assert!(raw.ends_with("msh|^~\\&|nhs01\rpid|1\r"));
    }

    #[tokio::test]
    async fn non_success_status_is_rejection() {
        let (url, server) = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let client = HttpDeliveryClient::new(
            DeliveryEndpoints {
                test: None,
                production: Some(url),
            },
            Duration::from_secs(5),
        )
        .expect("client");

        let err = client
            .deliver(&request(Environment::Production))
            .await
            .expect_err("rejected");
        server.await.expect("server");

        assert_eq!(
            err,
            DeliveryError::Rejected {
                status: 503,
                body: "rejected by test".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_endpoint_fails_without_network() {
        let client =
            HttpDeliveryClient::new(DeliveryEndpoints::default(), Duration::from_secs(1))
                .expect("client");

        let err = client
            .deliver(&request(Environment::Production))
            .await
            .expect_err("no endpoint");
        assert_eq!(err, DeliveryError::NoEndpoint(Environment::Production));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/hl7", listener.local_addr().expect("addr"));
        drop(listener);
        let client = HttpDeliveryClient::new(
            DeliveryEndpoints {
                test: Some(url),
                production: None,
            },
            Duration::from_secs(2),
        )
        .expect("client");

        let err = client
            .deliver(&request(Environment::Test))
            .await
            .expect_err("refused");
        assert!(matches!(err, DeliveryError::Transport(_)));
    }
}
