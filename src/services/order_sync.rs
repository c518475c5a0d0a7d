use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::domain::OrderStatus;
use crate::error::AppError;
use crate::ports::{Provisioner, Store};
use crate::provisioning::ProvisioningError;

/// Bounded exponential backoff for idempotent upstream reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProvisioningError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProvisioningError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, max_attempts = self.max_attempts, ?delay, error = %e, "upstream read failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub delivered: usize,
    pub failed: usize,
    pub still_pending: usize,
}

/// Reconciles local pending orders with the provisioning API.
pub struct OrderSyncService {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn Provisioner>,
    retry: RetryPolicy,
}

impl OrderSyncService {
    pub fn new(store: Arc<dyn Store>, provisioner: Arc<dyn Provisioner>, retry: RetryPolicy) -> Self {
        Self {
            store,
            provisioner,
            retry,
        }
    }

    pub async fn sync_order_statuses(&self, limit: i64) -> Result<SyncReport, AppError> {
        let pending = {
            let mut uow = self.store.begin().await?;
            uow.pending_orders(limit).await?
        };
        if pending.is_empty() {
            debug!("no pending orders to reconcile");
            return Ok(SyncReport::default());
        }

        let ids: Vec<String> = pending.iter().filter_map(|o| o.external_id.clone()).collect();
        let upstream = self
            .retry
            .run(|| self.provisioner.order_statuses(&ids))
            .await
            .map_err(|e| {
                error!(orders = ids.len(), error = %e, "order status lookup failed");
                AppError::from(e)
            })?;

        let mut report = SyncReport {
            checked: pending.len(),
            ..SyncReport::default()
        };
        let mut uow = self.store.begin().await?;
        for order in &pending {
            let status = order
                .external_id
                .as_deref()
                .and_then(|id| upstream.iter().find(|u| u.external_id == id))
                .map(|u| u.status)
                .unwrap_or(OrderStatus::Pending);

            if status == OrderStatus::Pending {
                report.still_pending += 1;
                continue;
            }
            if !uow
                .finish_pending_order(order.id, status, chrono::Utc::now())
                .await?
            {
                debug!(order_id = %order.id, "order already settled by another sync");
                continue;
            }
            match status {
                OrderStatus::Delivered => report.delivered += 1,
                OrderStatus::Failed => report.failed += 1,
                OrderStatus::Pending => {}
            }
            debug!(order_id = %order.id, status = %status, "order status updated");
        }
        uow.commit().await?;

        info!(
            checked = report.checked,
            delivered = report.delivered,
            failed = report.failed,
            still_pending = report.still_pending,
            "order statuses reconciled"
        );
        Ok(report)
    }

    /// Background reconciliation loop started by the server.
    pub async fn run(self: Arc<Self>, interval: Duration, batch: i64) {
        info!(?interval, batch, "order status sync started");
        loop {
            if let Err(e) = self.sync_order_statuses(batch).await {
                error!(error = %e, "order status sync batch failed");
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProvisioningError::Connection("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisioningError::Connection("down".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisioningError::Parse("bad json".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
