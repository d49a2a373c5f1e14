//! Purpose: Provide the real outbound-request service that the interceptor wraps.
//! Exports: `UreqFetch`, `FetchResponse`, `FetchFuture`.
//! Role: Blocking `ureq` transport driven from tokio's blocking pool.
//! Invariants: HTTP error statuses are ordinary responses, as with browser `fetch`.
//! Invariants: Only transport failures surface as `ErrorKind::Upstream`.
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_service::Service;

use super::OutboundRequest;
use crate::core::error::{Error, ErrorKind};

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchResponse, Error>> + Send>>;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Clone)]
pub struct UreqFetch {
    agent: ureq::Agent,
}

impl UreqFetch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for UreqFetch {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Service<OutboundRequest> for UreqFetch {
    type Response = FetchResponse;
    type Error = Error;
    type Future = FetchFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: OutboundRequest) -> Self::Future {
        let agent = self.agent.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || send(&agent, request))
                .await
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("outbound request task failed")
                        .with_source(err)
                })?
        })
    }
}

fn send(agent: &ureq::Agent, request: OutboundRequest) -> Result<FetchResponse, Error> {
    let call = agent.request(&request.method, &request.url);
    let result = match request.body.as_deref() {
        Some(body) => call
            .set("content-type", "text/plain;charset=UTF-8")
            .send_string(body),
        None => call.call(),
    };
    match result {
        Ok(response) => read_response(response, &request.url),
        Err(ureq::Error::Status(_, response)) => read_response(response, &request.url),
        Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Upstream)
            .with_message("outbound request failed")
            .with_url(request.url)
            .with_source(err)),
    }
}

fn read_response(response: ureq::Response, url: &str) -> Result<FetchResponse, Error> {
    let status = response.status();
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Upstream)
            .with_message("failed to read response body")
            .with_url(url)
            .with_source(err)
    })?;
    Ok(FetchResponse { status, body })
}
