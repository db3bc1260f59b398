use std::cmp::Ordering;
use std::fmt;

/// Negotiation role of the local side.
///
/// The polite side yields on an offer collision; the impolite side keeps its
/// own offer and originates negotiation when the other participant appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Polite,
    Impolite,
}

impl Role {
    pub fn is_polite(self) -> bool {
        self == Self::Polite
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polite => f.write_str("polite"),
            Self::Impolite => f.write_str("impolite"),
        }
    }
}

/// Derive the local role from both identifiers.
///
/// Local is polite iff it sorts after the remote id (byte-wise). Both peers
/// run the same comparison and land on opposite roles. Equal ids make both
/// sides impolite; such a pair never converges and a warning is logged.
pub fn resolve_role(local_id: &str, remote_id: &str) -> Role {
    match local_id.cmp(remote_id) {
        Ordering::Greater => Role::Polite,
        Ordering::Less => Role::Impolite,
        Ordering::Equal => {
            tracing::warn!("Local and remote share the identifier {:?}; negotiation cannot resolve collisions", local_id);
            Role::Impolite
        }
    }
}
