#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<openssl::error::ErrorStack> for ProxyError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Tls(err.to_string())
    }
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

impl ProxyError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Tls(_) => "tls",
            Self::Upstream(_) => "upstream",
            Self::Protocol(_) => "protocol",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_classification() {
        assert_eq!(ProxyError::Protocol("bad request line".into()).error_kind(), "protocol");
        assert_eq!(ProxyError::Tls("handshake".into()).error_kind(), "tls");
        let io = ProxyError::from(std::io::Error::other("x"));
        assert_eq!(io.error_kind(), "io");
    }
}
