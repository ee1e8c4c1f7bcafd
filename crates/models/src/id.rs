/// Declares a 32-bit row identifier. Zero is the reserved "invalid" value
/// used by rows that failed to load and by optional references.
macro_rules! id_newtype {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const INVALID: Self = Self(0);

            pub const fn new(value: u32) -> Self {
                Self(value)
            }
            pub const fn get(self) -> u32 {
                self.0
            }
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Tenant owning host/schemes, monitors, events and resources.
    CustomerId
);
id_newtype!(
    /// A (scheme, authority) origin owned by one customer.
    HostSchemeId
);
id_newtype!(
    /// A single configured probe target under a host/scheme.
    MonitorId
);
id_newtype!(EventId);
id_newtype!(
    /// A polling worker.
    ServerId
);
id_newtype!(RegionId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_is_zero() {
        assert!(!CustomerId::INVALID.is_valid());
        assert!(CustomerId::new(1).is_valid());
        assert_eq!(MonitorId::default(), MonitorId::INVALID);
    }

    #[test]
    fn serde_is_transparent() {
        let id: ServerId = serde_json::from_str("42").unwrap();
        assert_eq!(id, ServerId::new(42));
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    }
}
