// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use usertally_core::CounterStore;

/// Identities never counted: internal service users.
pub const RESERVED_USERS: [&str; 2] = ["system", "anonymous"];

/// Entry point for a request interceptor.
///
/// Cheap to clone and safe to call from any number of request threads; it
/// only touches the live `Minute` tier.
///
/// ```
/// use usertally::RequestTracker;
/// use usertally_core::{CounterStore, Tier};
///
/// let counters = CounterStore::new();
/// let requests = RequestTracker::new(counters.clone());
/// assert!(requests.track(Some("alice")));
/// assert!(!requests.track(Some("anonymous")));
/// assert!(!requests.track(None));
/// assert_eq!(counters.get(Tier::Minute, "alice"), Some(1));
/// ```
#[derive(Clone, Debug)]
pub struct RequestTracker {
    counters: CounterStore,
}

impl RequestTracker {
    /// Tracker incrementing `counters`
    pub fn new(counters: CounterStore) -> Self {
        Self { counters }
    }

    /// Counts one request by `remote_user`. Returns whether it was counted.
    pub fn track(&self, remote_user: Option<&str>) -> bool {
        match remote_user {
            Some(user) if !user.is_empty() && !RESERVED_USERS.contains(&user) => {
                self.counters.merge_add(user, 1);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rstest::rstest;
    use usertally_core::{CounterStore, Tier};

    use super::RequestTracker;

    #[rstest]
    #[case::named(Some("alice"), true)]
    #[case::missing(None, false)]
    #[case::empty(Some(""), false)]
    #[case::system(Some("system"), false)]
    #[case::anonymous(Some("anonymous"), false)]
    #[case::case_sensitive(Some("Anonymous"), true)]
    fn filters_reserved_identities(#[case] user: Option<&str>, #[case] counted: bool) {
        let counters = CounterStore::new();
        let requests = RequestTracker::new(counters.clone());
        check!(requests.track(user) == counted);
        check!(counters.is_empty(Tier::Minute) == !counted);
    }
}
