//! Resolution of "which roster entry is me".
//!
//! The token endpoint does not always return a numeric user id, and the
//! messaging plugin only knows participants by id and display name. The
//! resolver links the two and degrades to "not mine" when it cannot.

use tracing::{debug, warn};

use crate::types::{AccountProfile, RosterEntry, UserId};

/// Outcome of resolving the logged-in account against a roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityResolution {
    /// The token endpoint returned an explicit id.
    Account(UserId),
    /// A roster entry matched by name. `ambiguous` is set when more than one
    /// entry matched and the first was taken.
    Roster { user_id: UserId, ambiguous: bool },
    /// No link between the account and the roster.
    Unresolved,
}

impl IdentityResolution {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Account(user_id) | Self::Roster { user_id, .. } => Some(*user_id),
            Self::Unresolved => None,
        }
    }

    /// Whether a message authored by `sender` should render as sent by the
    /// account. Unresolved identities never claim ownership.
    pub fn is_mine(&self, sender: Option<UserId>) -> bool {
        match (self.user_id(), sender) {
            (Some(me), Some(sender)) => me == sender,
            _ => false,
        }
    }
}

/// Resolve the account against `roster`.
///
/// Precedence: explicit account id, then case-insensitive match of roster
/// name against display name or nicename, then roster slug against nicename.
pub fn resolve_current_user(
    account: &AccountProfile,
    roster: &[RosterEntry],
) -> IdentityResolution {
    if let Some(user_id) = account.user_id {
        return IdentityResolution::Account(user_id);
    }

    let display_name = normalized(account.display_name.as_deref());
    let nicename = normalized(account.nicename.as_deref());
    if display_name.is_none() && nicename.is_none() {
        warn!(
            username = %account.username,
            "account has no display name or nicename; identity unresolved"
        );
        return IdentityResolution::Unresolved;
    }

    let mut matches = roster.iter().filter(|entry| {
        let name = entry.name.trim().to_lowercase();
        let slug = normalized(entry.slug.as_deref());
        display_name.as_deref() == Some(name.as_str())
            || nicename.as_deref() == Some(name.as_str())
            || (slug.is_some() && slug == nicename)
    });

    let Some(first) = matches.next() else {
        warn!(
            account = account.label(),
            roster_len = roster.len(),
            "no roster entry matches account; treating all messages as received"
        );
        return IdentityResolution::Unresolved;
    };

    let others: Vec<UserId> = matches.map(|entry| entry.user_id).collect();
    if !others.is_empty() {
        warn!(
            account = account.label(),
            chosen = first.user_id,
            also_matched = ?others,
            "ambiguous identity match; using first roster entry"
        );
    } else {
        debug!(account = account.label(), user_id = first.user_id, "resolved current user");
    }

    IdentityResolution::Roster {
        user_id: first.user_id,
        ambiguous: !others.is_empty(),
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
}
