use crate::{time::ZoranTimestamp, CustomerId, EventId, MonitorId};

/// Kind of a recorded event. Wire representation is the upper-snake name;
/// inbound parsing is case-insensitive and maps `-` to `_`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Invalid,
    Working,
    NoResponse,
    ContentChanged,
    Keywords,
    SslCertificateExpiring,
    SslCertificateRenewed,
    Customer1,
    Customer2,
    Customer3,
    Customer4,
    Customer5,
    Customer6,
    Customer7,
    Customer8,
    Customer9,
    Customer10,
    Transaction,
    Inquiry,
    SupportRequest,
    StorageLimitReached,
}

impl EventKind {
    /// Every kind that can appear on the wire, in declaration order.
    pub const ALL: &'static [EventKind] = &[
        EventKind::Invalid,
        EventKind::Working,
        EventKind::NoResponse,
        EventKind::ContentChanged,
        EventKind::Keywords,
        EventKind::SslCertificateExpiring,
        EventKind::SslCertificateRenewed,
        EventKind::Customer1,
        EventKind::Customer2,
        EventKind::Customer3,
        EventKind::Customer4,
        EventKind::Customer5,
        EventKind::Customer6,
        EventKind::Customer7,
        EventKind::Customer8,
        EventKind::Customer9,
        EventKind::Customer10,
        EventKind::Transaction,
        EventKind::Inquiry,
        EventKind::SupportRequest,
        EventKind::StorageLimitReached,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Invalid => "INVALID",
            EventKind::Working => "WORKING",
            EventKind::NoResponse => "NO_RESPONSE",
            EventKind::ContentChanged => "CONTENT_CHANGED",
            EventKind::Keywords => "KEYWORDS",
            EventKind::SslCertificateExpiring => "SSL_CERTIFICATE_EXPIRING",
            EventKind::SslCertificateRenewed => "SSL_CERTIFICATE_RENEWED",
            EventKind::Customer1 => "CUSTOMER_1",
            EventKind::Customer2 => "CUSTOMER_2",
            EventKind::Customer3 => "CUSTOMER_3",
            EventKind::Customer4 => "CUSTOMER_4",
            EventKind::Customer5 => "CUSTOMER_5",
            EventKind::Customer6 => "CUSTOMER_6",
            EventKind::Customer7 => "CUSTOMER_7",
            EventKind::Customer8 => "CUSTOMER_8",
            EventKind::Customer9 => "CUSTOMER_9",
            EventKind::Customer10 => "CUSTOMER_10",
            EventKind::Transaction => "TRANSACTION",
            EventKind::Inquiry => "INQUIRY",
            EventKind::SupportRequest => "SUPPORT_REQUEST",
            EventKind::StorageLimitReached => "STORAGE_LIMIT_REACHED",
        }
    }

    /// The lower-case form used in outbound notification bodies.
    pub fn as_wire_str(self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    pub fn parse(value: &str) -> Option<EventKind> {
        let normalized = value.to_ascii_lowercase().replace('-', "_");
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(&normalized))
    }

    /// Customer-defined kinds are recorded and reported unconditionally.
    pub fn is_customer_defined(self) -> bool {
        matches!(
            self,
            EventKind::Customer1
                | EventKind::Customer2
                | EventKind::Customer3
                | EventKind::Customer4
                | EventKind::Customer5
                | EventKind::Customer6
                | EventKind::Customer7
                | EventKind::Customer8
                | EventKind::Customer9
                | EventKind::Customer10
                | EventKind::Transaction
                | EventKind::Inquiry
                | EventKind::SupportRequest
                | EventKind::StorageLimitReached
        )
    }

    /// The monitor status this kind drives the monitor towards, if any.
    pub fn status_transition(self) -> Option<MonitorStatus> {
        match self {
            EventKind::Working
            | EventKind::ContentChanged
            | EventKind::Keywords
            | EventKind::SslCertificateExpiring
            | EventKind::SslCertificateRenewed => Some(MonitorStatus::Working),
            kind if kind.is_customer_defined() => Some(MonitorStatus::Working),
            EventKind::NoResponse => Some(MonitorStatus::Failed),
            _ => None,
        }
    }
}

/// Last-known status of a monitor, as derived from its event history.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MonitorStatus {
    #[default]
    Unknown,
    Working,
    Failed,
}

impl MonitorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorStatus::Unknown => "UNKNOWN",
            MonitorStatus::Working => "WORKING",
            MonitorStatus::Failed => "FAILED",
        }
    }

    pub fn as_wire_str(self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    pub fn parse(value: &str) -> Option<MonitorStatus> {
        match value.to_ascii_lowercase().as_str() {
            "unknown" => Some(MonitorStatus::Unknown),
            "working" => Some(MonitorStatus::Working),
            "failed" => Some(MonitorStatus::Failed),
            _ => None,
        }
    }
}

/// A durable record of a notable probe outcome. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub monitor_id: MonitorId,
    pub customer_id: CustomerId,
    pub timestamp: ZoranTimestamp,
    pub kind: EventKind,
    pub message: String,
    /// Content or keyword hash; empty when the kind carries none.
    pub hash: Vec<u8>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_strings_round_trip() {
        for kind in EventKind::ALL.iter().copied() {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
            assert_eq!(EventKind::parse(&kind.as_wire_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("nonsense"), None);
    }

    #[test]
    fn parse_maps_dashes() {
        assert_eq!(
            EventKind::parse("ssl-certificate-expiring"),
            Some(EventKind::SslCertificateExpiring)
        );
        assert_eq!(EventKind::parse("No-Response"), Some(EventKind::NoResponse));
    }

    #[test]
    fn transitions_match_recording_rules() {
        assert_eq!(
            EventKind::Working.status_transition(),
            Some(MonitorStatus::Working)
        );
        assert_eq!(
            EventKind::NoResponse.status_transition(),
            Some(MonitorStatus::Failed)
        );
        assert_eq!(
            EventKind::Transaction.status_transition(),
            Some(MonitorStatus::Working)
        );
        assert_eq!(EventKind::Invalid.status_transition(), None);
    }

    #[test]
    fn monitor_status_strings() {
        for status in [
            MonitorStatus::Unknown,
            MonitorStatus::Working,
            MonitorStatus::Failed,
        ] {
            assert_eq!(MonitorStatus::parse(status.as_str()), Some(status));
            assert_eq!(MonitorStatus::parse(&status.as_wire_str()), Some(status));
        }
    }
}
