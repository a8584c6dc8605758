//! Joining helper tasks

use tokio::task::JoinHandle;
use tracing::{event, Level};

/// Waits for `handle` to finish, resuming its panic in the caller.
///
/// Returns `None` if the task was aborted.
pub(crate) async fn join<T>(handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(err) => match err.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(err) => {
                event!(Level::DEBUG, %err, "task aborted before finishing");
                None
            }
        },
    }
}
