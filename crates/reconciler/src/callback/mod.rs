//! Callback handlers reporting reconciliation status to the caller.

pub mod local;
pub mod remote;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::CallbackMessage;

pub use local::LocalCallbackHandler;
pub use remote::RemoteCallbackHandler;

/// Delivers status reports for one task.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Deliver a status report.
    async fn callback(&self, msg: &CallbackMessage) -> Result<()>;

    /// Report how long the reconciliation took. Handlers without a
    /// destination for this ignore it.
    async fn processing_duration(&self, _duration: Duration) -> Result<()> {
        Ok(())
    }
}
