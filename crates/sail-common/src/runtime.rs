use tokio::runtime::{Handle, Runtime};

use crate::config::RuntimeConfig;
use crate::error::CommonResult;

/// Owns the Tokio runtime used by the submission client.
/// Watch events, handshake retries, and the caller-facing wait all run on this runtime.
#[derive(Debug)]
pub struct RuntimeManager {
    runtime: Runtime,
}

impl RuntimeManager {
    pub fn try_new(config: &RuntimeConfig) -> CommonResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("sail-submit")
            .thread_stack_size(config.stack_size)
            .enable_all()
            .build()?;
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
