use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

/// A background task that keeps a view in sync with a change feed.
///
/// The task owns its subscription, so ending the task releases it.
/// Dropping the handle aborts the task; [`LiveHandle::close`] also waits for it to finish.
pub struct LiveHandle {
    label: String,
    task: Option<JoinHandle<()>>,
}

impl LiveHandle {
    pub fn spawn<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        debug!("Live updates started for {}", label);
        Self {
            label,
            task: Some(tokio::spawn(future)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop delivery and wait until the subscription has been dropped.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Live updates stopped for {}", self.label);
        }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
