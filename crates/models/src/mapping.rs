use crate::ServerId;
use std::collections::BTreeSet;

/// The set of workers assigned to one customer, one of which is the primary
/// (the worker that additionally runs ping and SSL expiration probing).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomerMapping {
    pub primary_server_id: ServerId,
    pub servers: BTreeSet<ServerId>,
}

impl CustomerMapping {
    pub fn new(primary_server_id: ServerId, servers: BTreeSet<ServerId>) -> Self {
        CustomerMapping {
            primary_server_id,
            servers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn contains(&self, server_id: ServerId) -> bool {
        self.servers.contains(&server_id)
    }

    /// The invariant every stored mapping upholds: a non-empty mapping's
    /// primary is one of its members.
    pub fn primary_is_member(&self) -> bool {
        self.servers.is_empty() || self.servers.contains(&self.primary_server_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primary_membership() {
        let mut mapping = CustomerMapping::default();
        assert!(mapping.primary_is_member());

        mapping.servers.insert(ServerId::new(3));
        mapping.primary_server_id = ServerId::new(3);
        assert!(mapping.primary_is_member());

        mapping.primary_server_id = ServerId::new(4);
        assert!(!mapping.primary_is_member());
    }
}
