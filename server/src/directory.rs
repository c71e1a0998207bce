//! User directory: the authoritative map of registered users
//!
//! This module owns every user record in the system. Records are created
//! by registration, never removed, and mutated only through directory
//! operations. Callers receive copies of records, never live aliases, so
//! nothing outside this module can mutate a record behind its back.
//!
//! The directory itself is a plain synchronous structure; the server wraps
//! it in a single `Arc<tokio::sync::RwLock<Directory>>`. That one coarse
//! lock protects both the key set and every record field: mutations take
//! the write lock, consistent reads take the read lock.

use log::info;
use shared::Location;
use std::collections::BTreeMap;

/// One registered user and their current tracking state.
///
/// Identity fields (username, password, privileged) are fixed at
/// registration; location and the infection flag change over the user's
/// lifetime. Records start off-grid at [`Location::NOWHERE`] until the
/// user first reports a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Unique key within the directory.
    pub username: String,
    /// Plaintext credential, compared by equality on login.
    pub password: String,
    /// Whether this user may issue privileged queries (loadmap).
    pub privileged: bool,
    /// Current grid cell, or [`Location::NOWHERE`] when off-grid.
    pub location: Location,
    /// Set once by an infection report; never cleared.
    pub infected: bool,
}

impl UserRecord {
    fn new(username: String, password: String, privileged: bool) -> Self {
        Self {
            username,
            password,
            privileged,
            location: Location::NOWHERE,
            infected: false,
        }
    }
}

/// Authoritative username-to-record map.
///
/// Backed by a `BTreeMap` so iteration order is deterministic, which keeps
/// grid snapshots and cohort listings stable across runs.
#[derive(Debug, Default)]
pub struct Directory {
    users: BTreeMap<String, UserRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
        }
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Registers a new user. Fails iff the username is already taken; with
    /// the directory write lock held, at most one of two concurrent
    /// registrations for the same name can succeed.
    pub fn register(&mut self, username: &str, password: &str, privileged: bool) -> bool {
        if self.users.contains_key(username) {
            return false;
        }
        self.users.insert(
            username.to_string(),
            UserRecord::new(username.to_string(), password.to_string(), privileged),
        );
        info!("Registered user {:?} (privileged: {})", username, privileged);
        true
    }

    /// Authenticates a user: the name must exist, the password must match
    /// exactly, and the user must not be infected. Locking infected users
    /// out of authentication is deliberate policy.
    pub fn login(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(user) => user.password == password && !user.infected,
            None => false,
        }
    }

    /// Moves a user to a new cell. Fails if the user is unknown or the
    /// cell is outside the `n` by `n` grid. The move is atomic under the
    /// directory write lock: readers see either the old or the new cell,
    /// never a torn value.
    pub fn set_location(&mut self, username: &str, location: Location, n: u32) -> bool {
        if !location.is_within(n) {
            return false;
        }
        match self.users.get_mut(username) {
            Some(user) => {
                user.location = location;
                true
            }
            None => false,
        }
    }

    /// Returns copies of every record currently at `location`, in username
    /// order. Evaluated at a single consistent instant: the caller holds
    /// at least the read lock for the duration of the scan, so no user can
    /// be observed at two cells. The off-grid sentinel never matches, so
    /// users who are off-grid cannot form a cohort.
    pub fn users_at(&self, location: Location) -> Vec<UserRecord> {
        if location == Location::NOWHERE {
            return Vec::new();
        }
        self.users
            .values()
            .filter(|user| user.location == location)
            .cloned()
            .collect()
    }

    /// Number of users currently at `location`. The off-grid sentinel
    /// always counts 0, no matter how many users have never reported a
    /// position. The protocol-level `-1` out-of-bound sentinel is the
    /// dispatcher's business, not produced here.
    pub fn count_at(&self, location: Location) -> i32 {
        if location == Location::NOWHERE {
            return 0;
        }
        self.users
            .values()
            .filter(|user| user.location == location)
            .count() as i32
    }

    /// Marks a user infected and moves them off-grid: an infected user
    /// immediately vacates their cell, can no longer be found at any
    /// location, and can no longer log in. Unknown usernames are ignored.
    pub fn mark_infected(&mut self, username: &str) {
        if let Some(user) = self.users.get_mut(username) {
            user.infected = true;
            user.location = Location::NOWHERE;
            info!("User {:?} reported infected, vacated the grid", username);
        }
    }

    /// True iff the user exists and is currently infected.
    pub fn is_infected(&self, username: &str) -> bool {
        self.users.get(username).is_some_and(|user| user.infected)
    }

    /// True iff the user exists and is privileged.
    pub fn is_privileged(&self, username: &str) -> bool {
        self.users.get(username).is_some_and(|user| user.privileged)
    }

    /// Maps every cell of the `n` by `n` grid to the usernames currently
    /// there. All n-squared cells are present, empty cells included; users
    /// who are off-grid (never moved, or infected) appear nowhere.
    pub fn snapshot(&self, n: u32) -> BTreeMap<Location, Vec<String>> {
        let mut map = BTreeMap::new();
        for x in 0..n {
            for y in 0..n {
                map.insert(Location::new(x, y), Vec::new());
            }
        }
        for (username, user) in &self.users {
            if let Some(occupants) = map.get_mut(&user.location) {
                occupants.push(username.clone());
            }
        }
        map
    }
}
