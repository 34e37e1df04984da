use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::sampler::ThreadInfo;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ListenerError {
    /// Logged and swallowed; remaining listeners still run.
    #[error("{0}")]
    Recoverable(String),
    /// Raised to the caller once every listener has run.
    #[error("{0}")]
    Fatal(String),
}

/// Hooks around a virtual user's lifetime.
pub trait ThreadListener: Send + Sync + fmt::Debug {
    fn thread_started(&self, _thread: &ThreadInfo) -> Result<(), ListenerError> {
        Ok(())
    }

    fn thread_finished(&self, _thread: &ThreadInfo) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ListenerHook {
    ThreadStarted,
    ThreadFinished,
}

/// Runs `hook` on every listener in order.
///
/// Recoverable failures are logged. The first fatal failure is returned after
/// the whole list has been traversed.
pub fn notify_listeners(
    listeners: &[Arc<dyn ThreadListener>],
    thread: &ThreadInfo,
    hook: ListenerHook,
) -> Result<(), ListenerError> {
    let mut fatal: Option<ListenerError> = None;

    for listener in listeners {
        let res = match hook {
            ListenerHook::ThreadStarted => listener.thread_started(thread),
            ListenerHook::ThreadFinished => listener.thread_finished(thread),
        };

        match res {
            Ok(()) => {}
            Err(ListenerError::Recoverable(msg)) => {
                warn!(thread = %thread.name, %hook, error = %msg, "thread listener failed");
            }
            Err(err @ ListenerError::Fatal(_)) => {
                warn!(thread = %thread.name, %hook, error = %err, "thread listener failed fatally");
                if fatal.is_none() {
                    fatal = Some(err);
                }
            }
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
