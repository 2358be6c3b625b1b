//! TracingNotifier - 通知を構造化ログとして出力

use async_trait::async_trait;

use crate::domain::JobStatus;
use crate::ports::{Notification, Notifier, NotifyError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        match n.status {
            JobStatus::Failed => tracing::warn!(
                job_token = %n.job_token,
                status = %n.status,
                error = n.error.as_deref().unwrap_or(""),
                at = %n.at,
                "import job finished"
            ),
            _ => tracing::info!(
                job_token = %n.job_token,
                status = %n.status,
                at = %n.at,
                "import job finished"
            ),
        }
        Ok(())
    }
}
