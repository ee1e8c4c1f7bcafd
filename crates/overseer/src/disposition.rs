//! Decides what to do with an incoming worker observation: drop it as a
//! duplicate, record it silently, or record it and notify upstream. The
//! decision dispatches on event kind to a small table of checkers, each of
//! which inspects the latest stored event of its family.

use models::{EventKind, MonitorId, MonitorStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The check itself could not run (unknown kind or store failure).
    Failed,
    Ignore,
    RecordOnly,
    RecordAndReport,
}

/// Which rows a checker's history query ranges over.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Scope {
    /// Rows of the reported monitor only.
    Monitor,
    /// Rows of any monitor sharing the reported monitor's host/scheme.
    HostScheme,
}

/// What an empty history yields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EmptyRule {
    Ignore,
    RecordAndReport,
    /// WORKING only: record silently for a monitor the worker itself still
    /// calls UNKNOWN, ignore otherwise.
    RecordIfStatusUnknown,
}

#[derive(Debug, Copy, Clone)]
enum Checker {
    /// Customer-defined kinds skip history entirely.
    AlwaysReport,
    Query {
        scope: Scope,
        family: &'static [EventKind],
        /// Hash-sensitive kinds repeat only when the hash also matches.
        hashed: bool,
        on_empty: EmptyRule,
    },
}

const WORKING_FAMILY: &[EventKind] = &[EventKind::Working, EventKind::NoResponse];
const SSL_FAMILY: &[EventKind] = &[
    EventKind::SslCertificateExpiring,
    EventKind::SslCertificateRenewed,
];

fn checker_for(kind: EventKind) -> Option<Checker> {
    let checker = match kind {
        EventKind::Working => Checker::Query {
            scope: Scope::Monitor,
            family: WORKING_FAMILY,
            hashed: false,
            on_empty: EmptyRule::RecordIfStatusUnknown,
        },
        EventKind::NoResponse => Checker::Query {
            scope: Scope::Monitor,
            family: WORKING_FAMILY,
            hashed: false,
            on_empty: EmptyRule::RecordAndReport,
        },
        EventKind::ContentChanged => Checker::Query {
            scope: Scope::Monitor,
            family: &[EventKind::ContentChanged],
            hashed: true,
            on_empty: EmptyRule::RecordAndReport,
        },
        EventKind::Keywords => Checker::Query {
            scope: Scope::Monitor,
            family: &[EventKind::Keywords],
            hashed: true,
            on_empty: EmptyRule::RecordAndReport,
        },
        EventKind::SslCertificateExpiring | EventKind::SslCertificateRenewed => Checker::Query {
            scope: Scope::HostScheme,
            family: SSL_FAMILY,
            hashed: false,
            on_empty: EmptyRule::Ignore,
        },
        kind if kind.is_customer_defined() => Checker::AlwaysReport,
        _ => return None,
    };
    Some(checker)
}

/// Interprets the latest family row (or its absence) for one checker.
fn interpret(
    checker: Checker,
    latest: Option<&(EventKind, Vec<u8>)>,
    kind: EventKind,
    worker_status: MonitorStatus,
    hash: &[u8],
) -> Disposition {
    let Checker::Query {
        hashed, on_empty, ..
    } = checker
    else {
        return Disposition::RecordAndReport;
    };

    match latest {
        Some((latest_kind, latest_hash)) => {
            if *latest_kind != kind {
                return Disposition::RecordAndReport;
            }
            if hashed && latest_hash.as_slice() != hash {
                Disposition::RecordAndReport
            } else {
                Disposition::Ignore
            }
        }
        None => match on_empty {
            EmptyRule::Ignore => Disposition::Ignore,
            EmptyRule::RecordAndReport => Disposition::RecordAndReport,
            EmptyRule::RecordIfStatusUnknown => {
                if worker_status == MonitorStatus::Unknown {
                    Disposition::RecordOnly
                } else {
                    Disposition::Ignore
                }
            }
        },
    }
}

/// Full disposition check against stored history.
pub async fn disposition(
    pool: &sqlx::PgPool,
    kind: EventKind,
    worker_status: MonitorStatus,
    monitor_id: MonitorId,
    hash: &[u8],
) -> Disposition {
    let Some(checker) = checker_for(kind) else {
        tracing::error!(kind = kind.as_str(), "no disposition checker for event kind");
        return Disposition::Failed;
    };

    let latest = match checker {
        Checker::AlwaysReport => None,
        Checker::Query { scope, family, .. } => {
            let result = match scope {
                Scope::Monitor => {
                    overseer_sql::events::latest_event_for_monitor(pool, monitor_id, family).await
                }
                Scope::HostScheme => {
                    overseer_sql::events::latest_event_for_host_scheme(pool, monitor_id, family)
                        .await
                }
            };
            match result {
                Ok(latest) => latest,
                Err(error) => {
                    tracing::error!(%monitor_id, %error, "disposition history query failed");
                    return Disposition::Failed;
                }
            }
        }
    };

    interpret(checker, latest.as_ref(), kind, worker_status, hash)
}

#[cfg(test)]
mod test {
    use super::*;

    fn check(
        kind: EventKind,
        worker_status: MonitorStatus,
        latest: Option<(EventKind, &[u8])>,
        hash: &[u8],
    ) -> Disposition {
        let checker = checker_for(kind).expect("kind has a checker");
        let latest = latest.map(|(kind, hash)| (kind, hash.to_vec()));
        interpret(checker, latest.as_ref(), kind, worker_status, hash)
    }

    #[test]
    fn repeated_kind_is_ignored() {
        assert_eq!(
            check(
                EventKind::Working,
                MonitorStatus::Working,
                Some((EventKind::Working, b"")),
                b"",
            ),
            Disposition::Ignore
        );
        assert_eq!(
            check(
                EventKind::NoResponse,
                MonitorStatus::Failed,
                Some((EventKind::NoResponse, b"")),
                b"",
            ),
            Disposition::Ignore
        );
    }

    #[test]
    fn working_after_no_response_is_reported() {
        assert_eq!(
            check(
                EventKind::Working,
                MonitorStatus::Failed,
                Some((EventKind::NoResponse, b"")),
                b"",
            ),
            Disposition::RecordAndReport
        );
    }

    #[test]
    fn first_working_report_depends_on_worker_status() {
        assert_eq!(
            check(EventKind::Working, MonitorStatus::Unknown, None, b""),
            Disposition::RecordOnly
        );
        assert_eq!(
            check(EventKind::Working, MonitorStatus::Working, None, b""),
            Disposition::Ignore
        );
        assert_eq!(
            check(EventKind::Working, MonitorStatus::Failed, None, b""),
            Disposition::Ignore
        );
    }

    #[test]
    fn first_no_response_is_reported() {
        assert_eq!(
            check(EventKind::NoResponse, MonitorStatus::Working, None, b""),
            Disposition::RecordAndReport
        );
    }

    #[test]
    fn identical_hash_repeats_are_ignored() {
        assert_eq!(
            check(
                EventKind::ContentChanged,
                MonitorStatus::Working,
                Some((EventKind::ContentChanged, b"AAAA")),
                b"AAAA",
            ),
            Disposition::Ignore
        );
        assert_eq!(
            check(
                EventKind::ContentChanged,
                MonitorStatus::Working,
                Some((EventKind::ContentChanged, b"AAAA")),
                b"BBBB",
            ),
            Disposition::RecordAndReport
        );
        assert_eq!(
            check(EventKind::Keywords, MonitorStatus::Working, None, b"AAAA"),
            Disposition::RecordAndReport
        );
    }

    #[test]
    fn ssl_kinds_toggle_per_host_scheme() {
        assert_eq!(
            check(
                EventKind::SslCertificateRenewed,
                MonitorStatus::Working,
                Some((EventKind::SslCertificateExpiring, b"")),
                b"",
            ),
            Disposition::RecordAndReport
        );
        assert_eq!(
            check(
                EventKind::SslCertificateRenewed,
                MonitorStatus::Working,
                Some((EventKind::SslCertificateRenewed, b"")),
                b"",
            ),
            Disposition::Ignore
        );
        // No SSL history at all: nothing to renew, nothing reported.
        assert_eq!(
            check(EventKind::SslCertificateRenewed, MonitorStatus::Working, None, b""),
            Disposition::Ignore
        );
    }

    #[test]
    fn customer_kinds_always_report() {
        for kind in EventKind::ALL.iter().copied().filter(|k| k.is_customer_defined()) {
            assert_eq!(
                check(kind, MonitorStatus::Unknown, None, b""),
                Disposition::RecordAndReport
            );
            assert_eq!(
                check(kind, MonitorStatus::Working, Some((kind, b"")), b""),
                Disposition::RecordAndReport
            );
        }
    }

    #[test]
    fn invalid_kind_has_no_checker() {
        assert!(checker_for(EventKind::Invalid).is_none());
    }
}
