//! In-process callback handler.

use async_trait::async_trait;

use super::CallbackHandler;
use crate::error::Result;
use crate::model::CallbackMessage;

type CallbackFn = dyn Fn(&CallbackMessage) -> Result<()> + Send + Sync;

/// Hands status reports to a function, for reconcilers embedded in another process.
pub struct LocalCallbackHandler {
    func: Box<CallbackFn>,
}

impl LocalCallbackHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&CallbackMessage) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl CallbackHandler for LocalCallbackHandler {
    async fn callback(&self, msg: &CallbackMessage) -> Result<()> {
        (self.func)(msg)
    }
}
