//! Contact registry: who has ever shared a cell with whom
//!
//! For every registered user this module keeps the set of usernames they
//! have ever been co-located with. The relation is symmetric (if alice's
//! set contains bob, bob's set contains alice) and grows monotonically,
//! with one exception: consuming an exposure check removes the infected
//! contacts it reported, so the same exposure is never reported twice.
//!
//! Contact sets store usernames only. Infection status is resolved
//! against the live directory at query time, so an exposure check always
//! sees the current flag rather than a snapshot taken when the contact
//! was recorded.

use std::collections::{BTreeSet, HashMap};

/// Per-user contact sets, keyed by username.
///
/// Like the directory, this is a plain synchronous structure wrapped in a
/// single `Arc<tokio::sync::RwLock<..>>` by the server.
#[derive(Debug, Default)]
pub struct ContactRegistry {
    contacts: HashMap<String, BTreeSet<String>>,
}

impl ContactRegistry {
    pub fn new() -> Self {
        Self {
            contacts: HashMap::new(),
        }
    }

    /// Adds an empty contact set for a newly registered user. Called
    /// exactly once per successful registration, before the user can
    /// appear in any cohort.
    pub fn create_entry(&mut self, username: &str) {
        self.contacts.insert(username.to_string(), BTreeSet::new());
    }

    /// Records a cohort: every user in `usernames` gains every other user
    /// as a contact, both directions, never themselves. Sets absorb
    /// duplicates, so repeating the same cohort is a no-op.
    pub fn record_cohort(&mut self, usernames: &[String]) {
        for a in usernames {
            let Some(set) = self.contacts.get_mut(a) else {
                continue;
            };
            for b in usernames {
                if a != b {
                    set.insert(b.clone());
                }
            }
        }
    }

    /// Current contact set of a user, empty if the user is unknown.
    pub fn contacts_of(&self, username: &str) -> BTreeSet<String> {
        self.contacts.get(username).cloned().unwrap_or_default()
    }

    /// Exposure check with observe-once semantics.
    ///
    /// Scans the user's contacts with the caller-supplied infection
    /// predicate (backed by the directory). If at least one contact is
    /// currently infected, returns true and removes every infected
    /// contact from the set, so repeated checks do not re-report the same
    /// exposure. Returns false and leaves the set untouched otherwise.
    pub fn consume_infected<F>(&mut self, username: &str, is_infected: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let Some(set) = self.contacts.get_mut(username) else {
            return false;
        };
        let infected: Vec<String> = set
            .iter()
            .filter(|contact| is_infected(contact))
            .cloned()
            .collect();
        if infected.is_empty() {
            return false;
        }
        for contact in &infected {
            set.remove(contact);
        }
        true
    }
}
