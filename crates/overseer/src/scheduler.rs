//! Debounces per-customer reconfiguration pushes: rapid edits collapse into
//! one activation (or deactivation) once the debounce window goes quiet.

use models::CustomerId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The fleet-facing half of the scheduler; the fleet administrator
/// implements it, tests substitute a recorder.
#[async_trait::async_trait]
pub trait CustomerActivation: Send + Sync + 'static {
    async fn activate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()>;
    async fn deactivate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()>;
}

/// Cheap cloneable handle used by the reconciler and the REST adapters to
/// enqueue `(customer, deactivate)` requests from any task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<(CustomerId, bool)>,
}

impl SchedulerHandle {
    pub fn schedule(&self, customer_id: CustomerId, deactivate: bool) {
        if self.tx.send((customer_id, deactivate)).is_err() {
            tracing::error!(%customer_id, "deferred scheduler is gone; dropping update");
        }
    }
}

pub fn channel() -> (SchedulerHandle, mpsc::UnboundedReceiver<(CustomerId, bool)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SchedulerHandle { tx }, rx)
}

/// Runs the scheduler until `shutdown`. Owns both coupled structures: the
/// ordered fire-time buckets and the per-customer slot index.
pub async fn serve<A: CustomerActivation>(
    activation: Arc<A>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<(CustomerId, bool)>,
    shutdown: CancellationToken,
) {
    let mut buckets: BTreeMap<Instant, BTreeMap<CustomerId, bool>> = BTreeMap::new();
    let mut slot_by_customer: HashMap<CustomerId, Instant> = HashMap::new();

    loop {
        let next_deadline = buckets.keys().next().copied();

        tokio::select! {
            () = shutdown.cancelled() => return,

            request = rx.recv() => {
                let Some((customer_id, deactivate)) = request else { return };

                // One pending slot per customer: a newer request replaces it.
                if let Some(previous) = slot_by_customer.remove(&customer_id) {
                    if let Some(bucket) = buckets.get_mut(&previous) {
                        bucket.remove(&customer_id);
                        if bucket.is_empty() {
                            buckets.remove(&previous);
                        }
                    }
                }

                let fire_at = Instant::now() + debounce;
                buckets.entry(fire_at).or_default().insert(customer_id, deactivate);
                slot_by_customer.insert(customer_id, fire_at);
            }

            () = sleep_until_or_forever(next_deadline) => {
                // Complete the whole due batch before rearming.
                let now = Instant::now();
                while let Some((&fire_at, _)) = buckets.iter().next() {
                    if fire_at > now {
                        break;
                    }
                    let bucket = buckets.remove(&fire_at).unwrap_or_default();
                    for (customer_id, deactivate) in bucket {
                        slot_by_customer.remove(&customer_id);

                        let result = if deactivate {
                            activation.deactivate_customer(customer_id).await
                        } else {
                            activation.activate_customer(customer_id).await
                        };
                        if let Err(error) = result {
                            tracing::error!(%customer_id, deactivate, %error, "deferred customer update failed");
                        }
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(CustomerId, bool)>>,
    }

    #[async_trait::async_trait]
    impl CustomerActivation for Recorder {
        async fn activate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((customer_id, false));
            Ok(())
        }
        async fn deactivate_customer(&self, customer_id: CustomerId) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((customer_id, true));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_collapse_into_one_activation() {
        let recorder = Arc::new(Recorder::default());
        let (handle, rx) = channel();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            recorder.clone(),
            Duration::from_secs(10),
            rx,
            shutdown.clone(),
        ));

        for _ in 0..5 {
            handle.schedule(CustomerId::new(9), false);
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            recorder.calls.lock().unwrap().clone(),
            vec![(CustomerId::new(9), false)]
        );

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn later_request_wins_the_slot() {
        let recorder = Arc::new(Recorder::default());
        let (handle, rx) = channel();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            recorder.clone(),
            Duration::from_secs(10),
            rx,
            shutdown.clone(),
        ));

        handle.schedule(CustomerId::new(4), false);
        tokio::time::advance(Duration::from_secs(2)).await;
        handle.schedule(CustomerId::new(4), true);

        tokio::time::advance(Duration::from_secs(12)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            recorder.calls.lock().unwrap().clone(),
            vec![(CustomerId::new(4), true)]
        );

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_customers_fire_independently() {
        let recorder = Arc::new(Recorder::default());
        let (handle, rx) = channel();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            recorder.clone(),
            Duration::from_secs(10),
            rx,
            shutdown.clone(),
        ));

        handle.schedule(CustomerId::new(1), false);
        handle.schedule(CustomerId::new(2), true);
        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        let mut calls = recorder.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![(CustomerId::new(1), false), (CustomerId::new(2), true)]
        );

        shutdown.cancel();
        server.await.unwrap();
    }
}
