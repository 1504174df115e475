//! Shared state for the HTTP surface.

use std::sync::Arc;

use crate::dispatch::Processor;
use crate::obs::RpcMetrics;

#[derive(Clone)]
pub struct AppState {
    processor: Arc<Processor>,
}

impl AppState {
    pub fn new(processor: Arc<Processor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> Arc<Processor> {
        Arc::clone(&self.processor)
    }

    pub fn metrics(&self) -> Arc<RpcMetrics> {
        self.processor.metrics()
    }
}
