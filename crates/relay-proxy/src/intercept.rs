use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use url::Url;

use relay_core::limits::HTTP_FETCH_BODY_CAP;

use crate::ca::LocalCa;
use crate::capture::{should_capture, CaptureEvent, CaptureSink};
use crate::error::ProxyError;
use crate::http1::{is_hop_by_hop, read_request, write_response, RequestHead};

const CONNECT_ACK: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7475";

/// Interception proxy configuration. CA material defaults to the relay
/// base directory next to the database.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub ca_cert_path: std::path::PathBuf,
    pub ca_key_path: std::path::PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        let base = std::env::var("RELAY_HOME")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(std::path::PathBuf::from)
                    .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
                    .join(".relay")
            });
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            ca_cert_path: base.join("ca.crt"),
            ca_key_path: base.join("ca.key"),
        }
    }
}

/// HTTP/1.1 forward proxy with HTTPS MITM. Plain requests are rewritten
/// and forwarded; CONNECT tunnels are terminated with a locally-minted
/// leaf certificate and served request-by-request. Textual GET responses
/// are emitted to the capture sink.
pub struct Interceptor {
    ca: Arc<LocalCa>,
    sink: Arc<dyn CaptureSink>,
    client: reqwest::Client,
}

impl Interceptor {
    pub fn new(ca: Arc<LocalCa>, sink: Arc<dyn CaptureSink>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self { ca, sink, client }
    }

    /// Load (or create) the CA from the configured paths and build an
    /// interceptor around it.
    pub fn open(config: &ProxyConfig, sink: Arc<dyn CaptureSink>) -> Result<Self, ProxyError> {
        if let Some(parent) = config.ca_cert_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let ca = Arc::new(LocalCa::load_or_create(
            &config.ca_cert_path,
            &config.ca_key_path,
        )?);
        Ok(Self::new(ca, sink))
    }

    /// Bind the listen address and serve connections until the task is
    /// dropped. Each connection runs as its own task.
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "interception proxy listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle_connection(socket).await {
                    debug!(peer = %peer, error = %e, "proxy connection closed");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> Result<(), ProxyError> {
        let mut reader = BufReader::new(socket);

        while let Some((head, body)) = read_request(&mut reader).await? {
            if head.method == "CONNECT" {
                // The ack goes out raw; everything after is TLS.
                reader.get_mut().write_all(CONNECT_ACK).await?;
                reader.get_mut().flush().await?;
                return self.serve_tunnel(reader, &head.target).await;
            }
            self.forward_plain(&mut reader, &head, body).await?;
        }
        Ok(())
    }

    /// Plain HTTP proxying: absolute-form target, hop-by-hop headers
    /// stripped, redirects passed through untouched.
    async fn forward_plain(
        &self,
        reader: &mut BufReader<TcpStream>,
        head: &RequestHead,
        body: Vec<u8>,
    ) -> Result<(), ProxyError> {
        let url = if head.target.starts_with("http://") || head.target.starts_with("https://") {
            head.target.clone()
        } else {
            let host = head
                .header("host")
                .ok_or_else(|| ProxyError::Protocol("no host for origin-form target".into()))?;
            format!("http://{host}{}", head.target)
        };

        let (status, reason, headers, resp_body) = self.round_trip(head, body, &url).await?;
        write_response(reader.get_mut(), status, &reason, &headers, &resp_body).await?;

        let content_type = header_value(&headers, "content-type");
        self.emit(&url, &head.method, &content_type, resp_body);
        Ok(())
    }

    /// Serve decrypted HTTP/1 requests from a hijacked CONNECT tunnel.
    /// Errors before the handshake completes close the tunnel without
    /// captures; errors mid-serving close it silently.
    async fn serve_tunnel(
        &self,
        stream: BufReader<TcpStream>,
        target: &str,
    ) -> Result<(), ProxyError> {
        let (hostname, port) = split_host_port(target);

        let config = self.ca.server_config_for_host(&hostname)?;
        let tls = TlsAcceptor::from(config).accept(stream).await?;
        let mut reader = BufReader::new(tls);

        loop {
            let Some((head, body)) = read_request(&mut reader).await.unwrap_or(None) else {
                break;
            };

            let authority = if port == 443 {
                hostname.clone()
            } else {
                format!("{hostname}:{port}")
            };
            let url = format!("https://{authority}{}", head.target);

            let Ok((status, reason, headers, resp_body)) =
                self.round_trip(&head, body, &url).await
            else {
                break;
            };
            if write_response(reader.get_mut(), status, &reason, &headers, &resp_body)
                .await
                .is_err()
            {
                break;
            }

            let content_type = header_value(&headers, "content-type");
            self.emit(&url, &head.method, &content_type, resp_body);
        }
        Ok(())
    }

    /// One upstream round trip with the body read fully.
    async fn round_trip(
        &self,
        head: &RequestHead,
        body: Vec<u8>,
        url: &str,
    ) -> Result<(u16, String, Vec<(String, String)>, Vec<u8>), ProxyError> {
        let method = reqwest::Method::from_bytes(head.method.as_bytes())
            .map_err(|_| ProxyError::Protocol(format!("invalid method {:?}", head.method)))?;

        let mut request = self.client.request(method, url);
        for (name, value) in &head.headers {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let reason = status
            .canonical_reason()
            .unwrap_or("Unknown")
            .to_string();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok((status.as_u16(), reason, headers, body))
    }

    fn emit(&self, url: &str, method: &str, content_type: &str, body: Vec<u8>) {
        if body.len() > HTTP_FETCH_BODY_CAP {
            warn!(url, size = body.len(), "capture skipped: body above threshold");
            return;
        }
        if !should_capture(method, content_type, &body) {
            return;
        }
        let Ok(parsed) = Url::parse(url) else {
            return;
        };
        let host = parsed.host_str().unwrap_or_default().to_string();
        let path = match parsed.query() {
            Some(q) => format!("{}?{q}", parsed.path()),
            None => parsed.path().to_string(),
        };
        self.sink.on_capture(CaptureEvent {
            host,
            path,
            body,
            content_type: content_type.to_string(),
        });
    }
}

fn header_value(headers: &[(String, String)], name: &str) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

fn split_host_port(target: &str) -> (String, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().unwrap_or(443);
            (host.to_string(), port)
        }
        None => (target.to_string(), 443),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<CaptureEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl CaptureSink for RecordingSink {
        fn on_capture(&self, event: CaptureEvent) {
            self.events.lock().push(event);
        }
    }

    fn interceptor_with_sink() -> (Interceptor, Arc<RecordingSink>) {
        let dir = std::env::temp_dir().join(format!("relay-proxy-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let ca = Arc::new(
            LocalCa::load_or_create(&dir.join("ca.crt"), &dir.join("ca.key")).unwrap(),
        );
        let sink = Arc::new(RecordingSink::new());
        (
            Interceptor::new(ca, Arc::clone(&sink) as Arc<dyn CaptureSink>),
            sink,
        )
    }

    #[test]
    fn emit_captures_exact_body_for_text_get() {
        let (proxy, sink) = interceptor_with_sink();
        let body = br#"{"items":[1,2,3]}"#.to_vec();
        proxy.emit(
            "https://api.example.com/v1/items?page=2",
            "GET",
            "application/json",
            body.clone(),
        );

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].host, "api.example.com");
        assert_eq!(events[0].path, "/v1/items?page=2");
        assert_eq!(events[0].body, body);
        assert_eq!(events[0].content_type, "application/json");
    }

    #[test]
    fn emit_drops_post_and_binary() {
        let (proxy, sink) = interceptor_with_sink();
        proxy.emit("https://x.test/a", "POST", "application/json", b"{}".to_vec());
        proxy.emit("https://x.test/b", "GET", "image/png", b"\x89PNG".to_vec());
        proxy.emit("https://x.test/c", "GET", "text/plain", Vec::new());
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn emit_drops_oversized_body() {
        let (proxy, sink) = interceptor_with_sink();
        proxy.emit(
            "https://x.test/big",
            "GET",
            "text/plain",
            vec![b'x'; HTTP_FETCH_BODY_CAP + 1],
        );
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn connect_ack_is_literal() {
        assert_eq!(CONNECT_ACK, b"HTTP/1.1 200 Connection Established\r\n\r\n");
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("example.com:443"), ("example.com".into(), 443));
        assert_eq!(split_host_port("example.com:8443"), ("example.com".into(), 8443));
        assert_eq!(split_host_port("example.com"), ("example.com".into(), 443));
    }
}
