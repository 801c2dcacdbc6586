//! Deadline helpers

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Race a fallible future against a deadline.
///
/// Returns [`Error::Timeout`] if the deadline elapses first. The inner
/// future is dropped at that point, so any in-flight work is cancelled.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let deadline = async {
        smol::Timer::after(duration).await;
        Err(Error::Timeout(duration))
    };
    smol::future::or(future, deadline).await
}
