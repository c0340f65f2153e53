//! The external paging side effect: speaking a message out loud.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// The externally observable alert action. The daemon only ever hands it a
/// message string; tests substitute a recording fake.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, message: &str) -> Result<()>;
}

/// Speaks pages by running an external text-to-speech program (espeak by
/// default) with the message as its single argument.
pub struct EspeakSpeaker {
    program: String,
}

impl EspeakSpeaker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Speaker for EspeakSpeaker {
    async fn speak(&self, message: &str) -> Result<()> {
        debug!("speaking: {}", message);
        let status = tokio::process::Command::new(&self.program)
            .arg(message)
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;
        if !status.success() {
            anyhow::bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}
