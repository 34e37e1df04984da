use paced_core::{ListenerError, ThreadInfo, ThreadListener};
use tracing::info;

/// Logs every virtual user's start and finish at `info`.
#[derive(Debug, Clone, Default)]
pub struct LogListener;

impl ThreadListener for LogListener {
    fn thread_started(&self, thread: &ThreadInfo) -> Result<(), ListenerError> {
        info!(thread = %thread.name, "thread started");
        Ok(())
    }

    fn thread_finished(&self, thread: &ThreadInfo) -> Result<(), ListenerError> {
        info!(thread = %thread.name, "thread finished");
        Ok(())
    }
}
