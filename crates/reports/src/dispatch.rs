use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use forgebi_core::DeliveryError;

use crate::compile::CompiledReport;
use crate::report::Recipient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivered_at: DateTime<Utc>,
    /// Channel-specific id (message id, upload path, ...).
    #[serde(default)]
    pub reference: Option<String>,
}

/// Delivers a compiled report to one recipient (mail relay, chat webhook,
/// file drop). Called from a dedicated thread per recipient.
pub trait RecipientDispatcher: Send + Sync {
    fn send(&self, report: &CompiledReport, recipient: &Recipient) -> Result<DeliveryReceipt, DeliveryError>;
}

impl<D> RecipientDispatcher for Arc<D>
where
    D: RecipientDispatcher + ?Sized,
{
    fn send(&self, report: &CompiledReport, recipient: &Recipient) -> Result<DeliveryReceipt, DeliveryError> {
        (**self).send(report, recipient)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub recipient: Recipient,
    pub result: Result<DeliveryReceipt, DeliveryError>,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Send `report` to every recipient concurrently.
///
/// Each send gets at most `timeout`; a recipient that has not answered by
/// then is recorded as [`DeliveryError::TimedOut`] and its thread is left to
/// finish on its own. A dispatcher that panics is recorded as
/// [`DeliveryError::Internal`]. Outcomes come back in recipient order.
pub(crate) fn dispatch_all(
    dispatcher: &Arc<dyn RecipientDispatcher>,
    report: &Arc<CompiledReport>,
    recipients: &[Recipient],
    timeout: Duration,
) -> Vec<DeliveryOutcome> {
    let (tx, rx) = mpsc::channel::<(usize, Result<DeliveryReceipt, DeliveryError>)>();
    let mut results: Vec<Option<Result<DeliveryReceipt, DeliveryError>>> = vec![None; recipients.len()];
    let mut pending = 0usize;

    for (index, recipient) in recipients.iter().enumerate() {
        let tx = tx.clone();
        let dispatcher = Arc::clone(dispatcher);
        let report = Arc::clone(report);
        let target = recipient.clone();
        let spawned = thread::Builder::new()
            .name(format!("forgebi-dispatch-{index}"))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| dispatcher.send(&report, &target)))
                    .unwrap_or_else(|panic| Err(DeliveryError::Internal(panic_message(panic.as_ref()))));
                // Receiver may be gone after a timeout.
                let _ = tx.send((index, result));
            });
        match spawned {
            Ok(_) => pending += 1,
            Err(e) => {
                results[index] = Some(Err(DeliveryError::Internal(format!(
                    "could not start dispatch thread: {e}"
                ))));
            }
        }
    }
    drop(tx);

    let deadline = Instant::now() + timeout;
    // Set once every dispatch thread has exited; anything still missing then
    // died without reporting rather than running late.
    let mut disconnected = false;
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((index, result)) => {
                results[index] = Some(result);
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                disconnected = true;
                break;
            }
        }
    }

    recipients
        .iter()
        .zip(results)
        .map(|(recipient, result)| {
            let result = result.unwrap_or_else(|| {
                Err(if disconnected {
                    DeliveryError::Internal("dispatch thread exited without a result".to_string())
                } else {
                    DeliveryError::TimedOut(timeout)
                })
            });
            match &result {
                Ok(_) => debug!(address = %recipient.address, "report delivered"),
                Err(e) => warn!(address = %recipient.address, error = %e, "report delivery failed"),
            }
            DeliveryOutcome {
                recipient: recipient.clone(),
                result,
            }
        })
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("dispatcher panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("dispatcher panicked: {s}")
    } else {
        "dispatcher panicked".to_string()
    }
}
