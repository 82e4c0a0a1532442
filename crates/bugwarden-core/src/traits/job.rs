//! Schedulable unit of work.

use async_trait::async_trait;

use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::types::RunReport;

/// Something the scheduler can fire: a reconciliation workflow or a report.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: CancelSignal) -> Result<RunReport>;
}
