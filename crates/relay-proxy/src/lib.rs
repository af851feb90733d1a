pub mod ca;
pub mod capture;
pub mod error;
pub mod http1;
pub mod intercept;

pub use ca::LocalCa;
pub use capture::{is_text_content, should_capture, CaptureEvent, CaptureSink, NullSink};
pub use error::ProxyError;
pub use intercept::{Interceptor, ProxyConfig};
