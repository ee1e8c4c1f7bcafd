//! Serialized ingestion of worker observations: disposition, durable
//! recording, and upstream notification. Also hosts the SSL expiration
//! sweeper, which feeds synthesized events through the same pipeline.

use crate::dispatcher::Dispatcher;
use crate::disposition::{disposition, Disposition};
use models::{CustomerId, EventKind, HostSchemeId, MonitorId, MonitorStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct EventProcessor {
    pool: sqlx::PgPool,
    dispatcher: Arc<Dispatcher>,
    /// Identifier of the upstream (website) endpoint notifications go to.
    upstream_identifier: String,
    /// Event ingress is single-threaded; disposition, record and notify are
    /// one critical section so duplicate suppression is race-free.
    report_lock: tokio::sync::Mutex<()>,
}

impl EventProcessor {
    pub fn new(
        pool: sqlx::PgPool,
        dispatcher: Arc<Dispatcher>,
        upstream_identifier: String,
    ) -> Self {
        EventProcessor {
            pool,
            dispatcher,
            upstream_identifier,
            report_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Funnels one observation through disposition and, as directed, into
    /// the store and upstream. Returns Ok even when the report is ignored.
    pub async fn report_event(
        &self,
        customer_id: CustomerId,
        monitor_id: MonitorId,
        unix_timestamp: u64,
        kind: EventKind,
        worker_status: MonitorStatus,
        message: &str,
        hash: &[u8],
    ) -> anyhow::Result<()> {
        let _guard = self.report_lock.lock().await;

        let disposition = disposition(&self.pool, kind, worker_status, monitor_id, hash).await;

        if matches!(
            disposition,
            Disposition::RecordOnly | Disposition::RecordAndReport
        ) {
            overseer_sql::events::record_event(
                &self.pool,
                customer_id,
                monitor_id,
                unix_timestamp,
                kind,
                message,
                hash,
            )
            .await?;
        }

        if disposition == Disposition::RecordAndReport {
            let monitor = overseer_sql::monitors::fetch_monitor(&self.pool, monitor_id).await?;
            let Some(monitor) = monitor else {
                tracing::warn!(%monitor_id, "recorded event for a monitor that has since vanished");
                return Ok(());
            };
            let host_scheme =
                overseer_sql::host_schemes::fetch_host_scheme(&self.pool, monitor.host_scheme_id)
                    .await?;
            let authority = host_scheme
                .map(|host_scheme| host_scheme.url_str())
                .unwrap_or_default();

            let body = serde_json::json!({
                "customer_id": customer_id,
                "monitor_id": monitor_id,
                "event_type": kind.as_wire_str(),
                "path": monitor.path,
                "authority": authority,
                "message": message,
                "timestamp": unix_timestamp,
            });
            let log_text = format!(
                "Reported event {} ({message}), customer {customer_id} - {authority}{}",
                kind.as_str(),
                monitor.path,
            );
            self.dispatcher
                .post(&self.upstream_identifier, "/event/report", body, log_text);
        }

        Ok(())
    }
}

/// Outcome of one sweep observation of one host/scheme.
fn ssl_transition(
    previously_expiring: Option<bool>,
    expiration_timestamp: u64,
    threshold: u64,
) -> Option<EventKind> {
    if expiration_timestamp < threshold {
        // Below the margin: raise once.
        match previously_expiring {
            Some(true) => None,
            _ => Some(EventKind::SslCertificateExpiring),
        }
    } else {
        // Above the margin: a first sighting also lands here, and the
        // resulting renewal attempt is suppressed by disposition when there
        // is no prior EXPIRING in the history.
        match previously_expiring {
            Some(false) => None,
            _ => Some(EventKind::SslCertificateRenewed),
        }
    }
}

/// Periodic SSL expiration sweeper. `margin` is how far ahead of expiration
/// the EXPIRING event fires; `interval` is the tick cadence.
pub struct SslSweeper {
    processor: Arc<EventProcessor>,
    pool: sqlx::PgPool,
    interval: std::time::Duration,
    margin: std::time::Duration,
    expiring: HashMap<HostSchemeId, bool>,
}

impl SslSweeper {
    pub fn new(
        processor: Arc<EventProcessor>,
        pool: sqlx::PgPool,
        interval: std::time::Duration,
        margin: std::time::Duration,
    ) -> Self {
        SslSweeper {
            processor,
            pool,
            interval,
            margin,
            expiring: HashMap::new(),
        }
    }

    pub async fn serve(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => (),
            }
            if let Err(error) = self.sweep().await {
                tracing::error!(%error, "SSL expiration sweep failed");
            }
        }
    }

    async fn sweep(&mut self) -> anyhow::Result<()> {
        let now = unix_now();
        let threshold = now + self.margin.as_secs();
        let host_schemes = overseer_sql::host_schemes::fetch_host_schemes(&self.pool, None).await?;

        for host_scheme in host_schemes {
            if host_scheme.ssl_expiration_timestamp == 0 {
                continue;
            }
            let previous = self.expiring.get(&host_scheme.id).copied();
            let Some(kind) = ssl_transition(
                previous,
                host_scheme.ssl_expiration_timestamp,
                threshold,
            ) else {
                continue;
            };
            self.expiring
                .insert(host_scheme.id, kind == EventKind::SslCertificateExpiring);

            let monitors =
                overseer_sql::monitors::fetch_monitors_under_host_scheme(&self.pool, host_scheme.id)
                    .await?;
            let Some(monitor) = monitors.first() else {
                continue;
            };

            let expiration = chrono::DateTime::from_timestamp(
                host_scheme.ssl_expiration_timestamp as i64,
                0,
            )
            .map(|when| when.to_rfc2822())
            .unwrap_or_else(|| host_scheme.ssl_expiration_timestamp.to_string());

            self.processor
                .report_event(
                    host_scheme.customer_id,
                    monitor.id,
                    now,
                    kind,
                    MonitorStatus::Working,
                    &format!("Expiration {expiration} UTC"),
                    &[],
                )
                .await?;
        }

        Ok(())
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expiring_fires_once_below_threshold() {
        assert_eq!(
            ssl_transition(None, 100, 200),
            Some(EventKind::SslCertificateExpiring)
        );
        assert_eq!(
            ssl_transition(Some(false), 100, 200),
            Some(EventKind::SslCertificateExpiring)
        );
        assert_eq!(ssl_transition(Some(true), 100, 200), None);
    }

    #[test]
    fn renewal_fires_once_above_threshold() {
        assert_eq!(
            ssl_transition(Some(true), 300, 200),
            Some(EventKind::SslCertificateRenewed)
        );
        assert_eq!(ssl_transition(Some(false), 300, 200), None);
        // First sighting of a healthy certificate attempts a renewal, which
        // disposition drops unless an EXPIRING precedes it.
        assert_eq!(
            ssl_transition(None, 300, 200),
            Some(EventKind::SslCertificateRenewed)
        );
    }

    #[test]
    fn boundary_is_strictly_below() {
        assert_eq!(ssl_transition(None, 200, 200), Some(EventKind::SslCertificateRenewed));
        assert_eq!(
            ssl_transition(None, 199, 200),
            Some(EventKind::SslCertificateExpiring)
        );
    }
}
