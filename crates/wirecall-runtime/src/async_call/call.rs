use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use wirecall_core::error::Result;

use super::client::ClientShared;
use super::state::CallShape;

static NEXT_SEQ_ID: AtomicI64 = AtomicI64::new(1);

/// Process-wide call id; also the low 32 bits of the wire sequence id.
pub(crate) fn next_seq_id() -> i64 {
    NEXT_SEQ_ID.fetch_add(1, Ordering::Relaxed)
}

/// Receives the raw reply body (`None` for oneway calls) or the failure.
pub(crate) type Completion = Box<dyn FnOnce(Result<Option<Bytes>>) + Send>;

/// One request, fully encoded before it is handed to the manager.
pub struct MethodCall {
    seq_id: i64,
    method: String,
    shape: CallShape,
    body: Bytes,
    started: Instant,
    timeout: Option<Duration>,
    client: Arc<ClientShared>,
    completion: Completion,
}

impl MethodCall {
    pub(crate) fn new(
        seq_id: i64,
        method: String,
        shape: CallShape,
        body: Bytes,
        timeout: Option<Duration>,
        client: Arc<ClientShared>,
        completion: Completion,
    ) -> Self {
        Self {
            seq_id,
            method,
            shape,
            body,
            started: Instant::now(),
            timeout,
            client,
            completion,
        }
    }

    pub fn seq_id(&self) -> i64 {
        self.seq_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_oneway(&self) -> bool {
        self.shape.oneway
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    pub(crate) fn shape(&self) -> CallShape {
        self.shape
    }

    /// Encoded message without its length prefix.
    pub(crate) fn body(&self) -> Bytes {
        self.body.clone()
    }

    pub(crate) fn client(&self) -> Arc<ClientShared> {
        Arc::clone(&self.client)
    }

    pub(crate) fn complete(self, outcome: Result<Option<Bytes>>) {
        (self.completion)(outcome);
    }
}

impl fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall")
            .field("seq_id", &self.seq_id)
            .field("method", &self.method)
            .field("oneway", &self.shape.oneway)
            .field("body_len", &self.body.len())
            .finish()
    }
}
