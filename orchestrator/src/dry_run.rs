//! Pass-through capability used when no real backend is wired in
//!
//! A dry-run worker goes through the whole lifecycle, honours cancellation and
//! answers with a summary of what it was given. The CLI registers it for every
//! built-in tag so `orchestrator run` can exercise the scheduler end to end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityRegistry, WorkerConfig, WorkerInput, WorkerOutput};
use crate::types::CapabilityTag;

/// Echoes a summary of its input after an optional simulated delay
pub struct DryRunCapability {
    id: String,
    capability: CapabilityTag,
    delay: Duration,
    cancelled: CancellationToken,
}

impl DryRunCapability {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            id: config.worker_id,
            capability: config.capability,
            delay: Duration::ZERO,
            cancelled: CancellationToken::new(),
        }
    }

    /// Simulate work taking `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn summarize(&self, input: &WorkerInput) -> serde_json::Value {
        let files = input.request.context.files.clone().unwrap_or_default();
        json!({
            "capability": self.capability,
            "workerId": self.id,
            "dryRun": true,
            "summary": format!("{} would handle: {}", self.capability, input.request.description),
            "files": files,
            "previous": input.previous,
            "dependencies": input.dependencies,
        })
    }
}

#[async_trait]
impl Capability for DryRunCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        tracing::trace!(worker_id = %self.id, "Dry-run worker initialized");
        Ok(())
    }

    async fn execute(&self, input: WorkerInput, cancel: CancellationToken) -> WorkerOutput {
        if cancel.is_cancelled() || self.cancelled.is_cancelled() {
            return WorkerOutput::cancelled();
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return WorkerOutput::cancelled(),
                _ = self.cancelled.cancelled() => return WorkerOutput::cancelled(),
            }
        }

        WorkerOutput::success(self.summarize(&input))
    }

    async fn cancel(&self) -> Result<()> {
        self.cancelled.cancel();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

impl CapabilityRegistry {
    /// Register [`DryRunCapability`] for every built-in tag
    pub fn with_dry_run(self) -> Self {
        self.with_dry_run_delay(Duration::ZERO)
    }

    /// Like [`with_dry_run`](Self::with_dry_run), each worker taking `delay`
    pub fn with_dry_run_delay(mut self, delay: Duration) -> Self {
        for tag in CapabilityTag::builtin() {
            self.register(tag, move |config| {
                Ok(Arc::new(DryRunCapability::new(config).with_delay(delay)) as Arc<dyn Capability>)
            });
        }
        self
    }
}
