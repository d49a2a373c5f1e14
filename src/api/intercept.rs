//! Purpose: Observe outbound requests and decode the ones bound for the Website Actions endpoint.
//! Exports: `OutboundRequest`, `InterceptLayer`, `Intercept`, `TRACKING_ENDPOINT`.
//! Role: tower decorator installed once around the real outbound-request service.
//! Invariants: Every call is forwarded exactly once; the inner future is returned untouched.
//! Invariants: Recording happens inside `call`, before the inner future is first polled.
//! Invariants: Matching is an exact string prefix test on the request URL.
use serde::Deserialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use super::Inspector;
use crate::core::status::STATUS_INTERCEPTING;

pub const TRACKING_ENDPOINT: &str = "https://px.ads.linkedin.com/wa";

/// The shape of a page-side `fetch(url, { method, body })` call.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct OutboundRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            body: Some(body.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InterceptLayer {
    inspector: Inspector,
    target: Arc<str>,
}

impl InterceptLayer {
    pub fn new(inspector: Inspector) -> Self {
        Self {
            inspector,
            target: Arc::from(TRACKING_ENDPOINT),
        }
    }

    pub fn with_target(mut self, target: impl AsRef<str>) -> Self {
        self.target = Arc::from(target.as_ref());
        self
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = Intercept<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Intercept {
            inner,
            inspector: self.inspector.clone(),
            target: Arc::clone(&self.target),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Intercept<S> {
    inner: S,
    inspector: Inspector,
    target: Arc<str>,
}

impl<S> Intercept<S> {
    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn observe(&self, request: &OutboundRequest) {
        self.inspector.set_status(STATUS_INTERCEPTING);
        match request.body.as_deref() {
            Some(body) if !body.is_empty() => {
                self.inspector.record_payload(body);
            }
            _ => self.inspector.note_no_body(),
        }
    }
}

impl<S> Service<OutboundRequest> for Intercept<S>
where
    S: Service<OutboundRequest>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: OutboundRequest) -> Self::Future {
        let matched = request.url.starts_with(&*self.target);
        tracing::debug!(
            url = %request.url,
            method = %request.method,
            matched,
            body_len = request.body.as_ref().map_or(0, String::len),
            "intercepted fetch"
        );
        if matched {
            self.observe(&request);
        }
        self.inner.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::{InterceptLayer, OutboundRequest, TRACKING_ENDPOINT};
    use crate::api::Inspector;
    use crate::core::decode::tests::encode_payload;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tower::ServiceExt;
    use tower_layer::Layer;
    use tower_service::Service;

    #[derive(Clone)]
    struct EchoService {
        calls: Arc<AtomicUsize>,
    }

    impl Service<OutboundRequest> for EchoService {
        type Response = String;
        type Error = String;
        type Future = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: OutboundRequest) -> Self::Future {
            let calls = Arc::clone(&self.calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if request.url.contains("fail") {
                    Err(format!("rejected {}", request.url))
                } else {
                    Ok(format!("{} {}", request.method, request.url))
                }
            })
        }
    }

    fn echo_service(calls: Arc<AtomicUsize>) -> EchoService {
        EchoService { calls }
    }

    #[tokio::test]
    async fn matched_request_is_decoded_and_forwarded() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let service = InterceptLayer::new(inspector.clone()).layer(echo_service(calls.clone()));

        let request = OutboundRequest::post(TRACKING_ENDPOINT, encode_payload(r#"{"a":1}"#));
        let response = service.oneshot(request).await.expect("response");

        assert_eq!(response, format!("POST {TRACKING_ENDPOINT}"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = inspector.get(1).expect("entry");
        assert_eq!(entry.formatted, "{\n  \"a\": 1\n}");
        assert_eq!(entry.raw, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn unmatched_request_passes_through_untouched() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let service = InterceptLayer::new(inspector.clone()).layer(echo_service(calls.clone()));

        let request = OutboundRequest::post("https://example.com/x", encode_payload("{}"));
        let response = service.oneshot(request).await.expect("response");

        assert_eq!(response, "POST https://example.com/x");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inspector.is_empty());
        assert_eq!(inspector.status().status, "Ready");
    }

    #[tokio::test]
    async fn prefix_match_covers_query_strings_only_at_the_start() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let service = InterceptLayer::new(inspector.clone()).layer(echo_service(calls.clone()));

        service
            .clone()
            .oneshot(OutboundRequest::post(format!("{TRACKING_ENDPOINT}/?pid=1"), "xx"))
            .await
            .expect("matched");
        service
            .oneshot(OutboundRequest::post(
                format!("https://proxy.test/?u={TRACKING_ENDPOINT}"),
                "xx",
            ))
            .await
            .expect("unmatched");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(inspector.len(), 1);
    }

    #[tokio::test]
    async fn missing_or_empty_body_is_noted_without_recording() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let service = InterceptLayer::new(inspector.clone()).layer(echo_service(calls.clone()));

        service
            .clone()
            .oneshot(OutboundRequest::get(TRACKING_ENDPOINT))
            .await
            .expect("get");
        service
            .oneshot(OutboundRequest::post(TRACKING_ENDPOINT, ""))
            .await
            .expect("empty post");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(inspector.is_empty());
        assert_eq!(inspector.status().status, "Request intercepted (no body)");
    }

    #[tokio::test]
    async fn inner_errors_propagate_after_recording() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let service = InterceptLayer::new(inspector.clone())
            .with_target("https://fail.test/wa")
            .layer(echo_service(calls.clone()));

        let err = service
            .oneshot(OutboundRequest::post("https://fail.test/wa", "not-base64!!"))
            .await
            .expect_err("inner rejection");

        assert_eq!(err, "rejected https://fail.test/wa");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = inspector.get(1).expect("entry recorded before the call resolved");
        assert_eq!(entry.raw["rawData"], "not-base64!!");
    }

    #[test]
    fn recording_happens_before_the_inner_future_is_polled() {
        let inspector = Inspector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut service =
            InterceptLayer::new(inspector.clone()).layer(echo_service(calls.clone()));

        let pending = service.call(OutboundRequest::post(TRACKING_ENDPOINT, encode_payload("[]")));
        assert_eq!(inspector.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(pending);
    }

    #[test]
    fn outbound_request_defaults_to_get_without_body() {
        let request: OutboundRequest =
            serde_json::from_str(r#"{"url":"https://example.com/x"}"#).expect("parse");
        assert_eq!(request, OutboundRequest::get("https://example.com/x"));
    }
}
