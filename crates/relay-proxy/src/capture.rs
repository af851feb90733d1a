use relay_core::limits::HTTP_FETCH_BODY_CAP;

/// One intercepted third-party response, delivered to the capture sink.
/// `path` includes the query string when one was present.
#[derive(Clone, Debug)]
pub struct CaptureEvent {
    pub host: String,
    pub path: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Caller-provided destination for capture events. The proxy never knows
/// about the artifact store; the caller wires this to it out of band.
pub trait CaptureSink: Send + Sync {
    fn on_capture(&self, event: CaptureEvent);
}

impl<F> CaptureSink for F
where
    F: Fn(CaptureEvent) + Send + Sync,
{
    fn on_capture(&self, event: CaptureEvent) {
        self(event)
    }
}

/// Sink that drops everything; useful when interception runs purely as a
/// pass-through.
pub struct NullSink;

impl CaptureSink for NullSink {
    fn on_capture(&self, _event: CaptureEvent) {}
}

/// Textual content types worth capturing.
pub fn is_text_content(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.contains("json") || ct.contains("text/") || ct.contains("xml") || ct.contains("yaml")
}

/// Capture only successful-to-read GET responses with a textual content
/// type and a non-empty body, bounded by the soft size threshold.
pub fn should_capture(method: &str, content_type: &str, body: &[u8]) -> bool {
    method == "GET"
        && !body.is_empty()
        && body.len() <= HTTP_FETCH_BODY_CAP
        && is_text_content(content_type)
}
