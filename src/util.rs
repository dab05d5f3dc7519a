use sentry_core::protocol::SpanStatus;
use std::any::Any;
use std::future::Future;

/// Wrap a job execution in a sentry performance transaction.
pub(crate) async fn with_sentry_transaction<F, R, E, Fut>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "queue.process");
    let transaction = sentry_core::start_transaction(tx_ctx);

    let result = callback().await;

    transaction.set_status(match &result {
        Ok(_) => SpanStatus::Ok,
        Err(_) => SpanStatus::UnknownError,
    });
    transaction.finish();

    result
}

/// Recover a readable message from a handler panic payload.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<&str>() {
        anyhow::anyhow!("job panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<String>() {
        anyhow::anyhow!("job panicked: {message}")
    } else {
        anyhow::anyhow!("job panicked")
    }
}
