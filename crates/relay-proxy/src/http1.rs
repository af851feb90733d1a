use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

/// Upper bound on a request head (request line + headers).
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "proxy-connection",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A parsed HTTP/1 request line and header block.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Strip headers a proxy must not forward.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Read one request (head + content-length body) off the stream. Returns
/// None on clean end-of-stream before any bytes of a new request.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<(RequestHead, Vec<u8>)>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines: Vec<String> = Vec::new();
    let mut total = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::Protocol("unexpected end of request head".into()));
        }
        total += n;
        if total > MAX_HEAD_BYTES {
            return Err(ProxyError::Protocol("request head too large".into()));
        }

        let text = String::from_utf8(line)
            .map_err(|_| ProxyError::Protocol("request head is not valid UTF-8".into()))?;
        let trimmed = text.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if lines.is_empty() {
                // Tolerate a stray blank line before the request line.
                continue;
            }
            break;
        }
        lines.push(trimmed.to_string());
    }

    let head = parse_head(&lines)?;

    let mut body = vec![0u8; head.content_length()];
    if !body.is_empty() {
        tokio::io::AsyncReadExt::read_exact(reader, &mut body).await?;
    }

    Ok(Some((head, body)))
}

fn parse_head(lines: &[String]) -> Result<RequestHead, ProxyError> {
    let request_line = lines
        .first()
        .ok_or_else(|| ProxyError::Protocol("empty request head".into()))?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProxyError::Protocol(format!(
            "malformed request line: {request_line:?}"
        )));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ProxyError::Protocol(format!(
            "unsupported protocol version: {version}"
        )));
    }

    let mut headers = Vec::with_capacity(lines.len() - 1);
    for line in &lines[1..] {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProxyError::Protocol(format!("malformed header: {line:?}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}

/// Serialize a full response with an explicit Content-Length. Hop-by-hop
/// and length-bearing headers from upstream are dropped and rewritten.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    reason: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("content-length: {}\r\n\r\n", body.len()));

    writer.write_all(out.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
