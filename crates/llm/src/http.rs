use std::time::Duration;

use snafu::{ResultExt, ensure};

use super::backend::{
    BackendResult, BodyOutcome, ChatBackend, EmptyQuerySnafu, HttpClientSnafu,
    InvalidAccessTokenSnafu, ReplyEvent, ReplyRequest, ReplyStatusSnafu, ReplyStreamHandle,
    ReplyWorker, RequestTimeoutSnafu, drive_reply_body, emit_terminal_event, make_event_stream,
};

pub const HTTP_BACKEND_ID: &str = "http";
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBackendConfig {
    pub api_base_url: String,
    pub chat_path: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl HttpBackendConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim().to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            access_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_chat_path(mut self, chat_path: impl Into<String>) -> Self {
        self.chat_path = chat_path.into().trim().to_string();
        self
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        let access_token = access_token.into().trim().to_string();
        self.access_token = (!access_token.is_empty()).then_some(access_token);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn chat_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let path = self.chat_path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

/// Streams replies from the chat endpoint over HTTP.
pub struct HttpChatBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpChatBackend {
    pub fn new(config: HttpBackendConfig) -> BackendResult<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn build_client(config: &HttpBackendConfig) -> BackendResult<reqwest::Client> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(access_token) = &config.access_token {
            let mut value =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {access_token}"))
                    .context(InvalidAccessTokenSnafu {
                        stage: "build-client-authorization",
                    })?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        // The timeout bounds connecting only; a healthy reply may stream for much longer.
        reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.request_timeout)
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }

    async fn open_reply(
        client: &reqwest::Client,
        config: &HttpBackendConfig,
        request: &ReplyRequest,
    ) -> BackendResult<reqwest::Response> {
        let form = [
            ("query", request.query.as_str()),
            ("conversation_id", request.target.conversation_id.as_str()),
        ];
        let send = client.post(config.chat_url()).form(&form).send();

        let response = tokio::time::timeout(config.request_timeout, send)
            .await
            .map_err(|_| {
                RequestTimeoutSnafu {
                    stage: "send-reply-request",
                    timeout_ms: u64::try_from(config.request_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                }
                .build()
            })?
            .context(HttpClientSnafu {
                stage: "send-reply-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ReplyStatusSnafu {
                stage: "reply-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    async fn run_reply_worker(
        client: reqwest::Client,
        config: HttpBackendConfig,
        request: ReplyRequest,
        event_tx: tokio::sync::mpsc::UnboundedSender<ReplyEvent>,
        mut cancel_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        let target = request.target.clone();
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(reply = ?target, "reply cancelled before the endpoint answered");
                return;
            }
            opened = Self::open_reply(&client, &config, &request) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                let outcome = BodyOutcome::Failed(error.to_string());
                emit_terminal_event(&event_tx, &target, &outcome);
                return;
            }
        };

        tracing::debug!(reply = ?target, status = %response.status(), "reply stream opened");
        drive_reply_body(target, response.bytes_stream(), event_tx, cancel_rx).await;
    }
}

impl ChatBackend for HttpChatBackend {
    fn id(&self) -> &str {
        HTTP_BACKEND_ID
    }

    fn stream_reply(&self, request: ReplyRequest) -> BackendResult<ReplyStreamHandle> {
        ensure!(
            !request.query.trim().is_empty(),
            EmptyQuerySnafu {
                stage: "stream-reply",
                target: request.target.clone(),
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target.clone());
        let worker: ReplyWorker = Box::pin(Self::run_reply_worker(
            self.client.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ReplyStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::backend::{BackendError, ReplyEventPayload, ReplyTarget};

    /// Answers one request with `status_line` and `body`, then hands back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("listener address");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{body}"
            );
            socket.write_all(response.as_bytes()).await.expect("write response");
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{address}"), server)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buffer = [0_u8; 1024];
        loop {
            let read = socket.read(&mut buffer).await.expect("read request");
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buffer[..read]);

            let text = String::from_utf8_lossy(&raw);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    async fn run_reply(base_url: String, query: &str) -> Vec<ReplyEventPayload> {
        let backend = HttpChatBackend::new(HttpBackendConfig::new(base_url).with_access_token("tok"))
            .expect("client");
        let handle = backend
            .stream_reply(ReplyRequest::new(ReplyTarget::new("c 1", "m 1"), query))
            .expect("reply stream");
        let mut stream = handle.stream;
        handle.worker.await;

        let mut payloads = Vec::new();
        while let Some(event) = stream.try_recv() {
            payloads.push(event.payload);
        }
        payloads
    }

    #[tokio::test]
    async fn posts_form_fields_with_bearer_token_and_streams_fragments() {
        let (base_url, server) = serve_once(
            "200 OK",
            "data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\ndata: [DONE]\n\n",
        )
        .await;

        let payloads = run_reply(base_url, "hi & bye").await;
        let request = server.await.expect("server task");

        assert!(request.starts_with("POST /api/chat HTTP/1.1\r\n"));
        let lowered = request.to_ascii_lowercase();
        assert!(lowered.contains("authorization: bearer tok\r\n"));
        assert!(lowered.contains("content-type: application/x-www-form-urlencoded"));
        assert!(request.ends_with("\r\n\r\nquery=hi+%26+bye&conversation_id=c+1"));
        assert_eq!(
            payloads,
            vec![
                ReplyEventPayload::Delta("Hel".to_string()),
                ReplyEventPayload::Delta("lo".to_string()),
                ReplyEventPayload::Completed("Hello".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn error_status_fails_without_completion() {
        let (base_url, server) = serve_once("500 Internal Server Error", "boom").await;

        let payloads = run_reply(base_url, "hello").await;
        server.await.expect("server task");

        assert_eq!(
            payloads,
            vec![ReplyEventPayload::Failed(
                "chat endpoint returned status 500: boom".to_string()
            )]
        );
    }

    #[test]
    fn chat_url_joins_base_and_path_with_one_slash() {
        assert_eq!(
            HttpBackendConfig::new("http://localhost:8000/").chat_url(),
            "http://localhost:8000/api/chat"
        );
        assert_eq!(
            HttpBackendConfig::new("https://api.example.com/v1")
                .with_chat_path("chat")
                .chat_url(),
            "https://api.example.com/v1/chat"
        );
    }

    #[test]
    fn blank_access_token_is_not_sent() {
        let config = HttpBackendConfig::new("http://localhost").with_access_token("   ");
        assert!(config.access_token.is_none());
    }

    #[test]
    fn access_token_with_newline_is_rejected() {
        let config = HttpBackendConfig::new("http://localhost").with_access_token("abc\ndef");
        let error = HttpChatBackend::new(config)
            .err()
            .expect("header value must be rejected");
        assert!(matches!(error, BackendError::InvalidAccessToken { .. }));
    }

    #[test]
    fn empty_query_is_rejected_before_any_request() {
        let backend =
            HttpChatBackend::new(HttpBackendConfig::new("http://localhost")).expect("client");
        let request = ReplyRequest::new(ReplyTarget::new("conv", "msg"), "   ");

        let error = backend
            .stream_reply(request)
            .err()
            .expect("empty query must be rejected");
        assert!(matches!(error, BackendError::EmptyQuery { .. }));
    }
}
