//! In-memory capabilities shared by the unit tests.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use http::StatusCode;
use serde_json::Value;

use crate::{
    template::{ScopedVars, TemplateError, TemplateSrv, TemplateSubstitution},
    transport::{FetchRequest, FetchResponse, QueryTransport, TransportError},
};

enum Reply {
    Response(StatusCode, Value),
    Fail(String),
}

/// A transport that records every request and always gives the same reply.
pub(crate) struct MockTransport {
    reply: Reply,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockTransport {
    pub(crate) fn responding(body: Value) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    pub(crate) fn with_status(status: StatusCode, body: Value) -> Self {
        Self {
            reply: Reply::Response(status, body),
            requests: Mutex::default(),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            reply: Reply::Fail(message.to_string()),
            requests: Mutex::default(),
        }
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QueryTransport for MockTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Reply::Response(status, body) => Ok(FetchResponse::new(*status, body.to_string())),
            Reply::Fail(message) => Err(TransportError::other(message.clone())),
        }
    }
}

/// Wraps [`TemplateSrv`], counting calls.
#[derive(Default)]
pub(crate) struct CountingTemplate {
    inner: TemplateSrv,
    calls: AtomicUsize,
}

impl CountingTemplate {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TemplateSubstitution for CountingTemplate {
    fn replace(&self, text: &str, scoped_vars: &ScopedVars) -> Result<String, TemplateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.replace(text, scoped_vars)
    }
}

/// Fails every substitution.
pub(crate) struct FailingTemplate;

impl TemplateSubstitution for FailingTemplate {
    fn replace(&self, _text: &str, _scoped_vars: &ScopedVars) -> Result<String, TemplateError> {
        Err(TemplateError::other("substitution failed"))
    }
}
