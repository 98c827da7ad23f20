//! Group membership resolution with cycle detection.
//!
//! AD reports direct memberships in `memberOf` but leaves out the primary
//! group, which is only known as a RID (`primaryGroupID`). The resolver adds
//! it back by deriving the group SID from the user SID, then optionally walks
//! nested memberships breadth-first.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, instrument, warn};

use crate::directory::entry::attr;
use crate::directory::filter::sid_filter;
use crate::directory::{DirectoryClient, DirectoryEntry, SearchRequest};
use crate::identifier::derive_primary_group_sid;

/// A group whose lookup failed during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedGroup {
    pub dn: String,
    pub reason: String,
}

/// Deduplicated set of group DNs reachable from one principal.
#[derive(Debug, Clone, Default)]
pub struct GroupMembership {
    groups: Vec<String>,
    seen: HashSet<String>,
    /// Branches that yielded no further groups because their lookup failed.
    pub unresolved: Vec<UnresolvedGroup>,
}

impl GroupMembership {
    /// Insert a DN. Returns false when it is already present (case-insensitive).
    fn insert(&mut self, dn: &str) -> bool {
        if self.seen.insert(dn.to_lowercase()) {
            self.groups.push(dn.to_string());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, dn: &str) -> bool {
        self.seen.contains(&dn.to_lowercase())
    }

    /// Group DNs in discovery order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Resolves group memberships over an open directory client.
#[derive(Debug, Clone, Default)]
pub struct GroupResolver {
    /// Overrides `CN=Domain Users,CN=Users,<baseDn>` as primary group fallback.
    fallback_primary_group: Option<String>,
}

impl GroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_primary_group(mut self, dn: impl Into<String>) -> Self {
        self.fallback_primary_group = Some(dn.into());
        self
    }

    /// `memberOf` values plus the primary group.
    pub async fn direct_groups_of(
        &self,
        client: &mut dyn DirectoryClient,
        entry: &DirectoryEntry,
    ) -> GroupMembership {
        self.all_groups_of(client, entry, false).await
    }

    /// Direct groups, and with `recursive` every group reachable through
    /// nested `memberOf` links. Terminates on cyclic nesting.
    #[instrument(skip(self, client, entry), fields(dn = %entry.dn()))]
    pub async fn all_groups_of(
        &self,
        client: &mut dyn DirectoryClient,
        entry: &DirectoryEntry,
        recursive: bool,
    ) -> GroupMembership {
        let mut membership = GroupMembership::default();
        let mut queue: VecDeque<String> = VecDeque::new();

        let mut direct = entry.strings(attr::MEMBER_OF);
        if let Some(primary) = self.primary_group_of(client, entry).await {
            direct.push(primary);
        }
        for dn in direct {
            if membership.insert(&dn) {
                queue.push_back(dn);
            }
        }

        if !recursive {
            return membership;
        }

        while let Some(group_dn) = queue.pop_front() {
            let request = SearchRequest::base(group_dn.as_str()).attributes([attr::MEMBER_OF]);
            let parents = match client.search(&request).await {
                Ok(entries) => entries
                    .first()
                    .map(|group| group.strings(attr::MEMBER_OF))
                    .unwrap_or_default(),
                Err(e) => {
                    warn!(group = %group_dn, error = %e, "nested group lookup failed, branch skipped");
                    membership.unresolved.push(UnresolvedGroup {
                        dn: group_dn.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for parent in parents {
                if membership.insert(&parent) {
                    queue.push_back(parent);
                } else {
                    debug!(group = %parent, "group already visited");
                }
            }
        }

        debug!(
            groups = membership.len(),
            unresolved = membership.unresolved.len(),
            "resolved group membership"
        );
        membership
    }

    /// DN of the primary group, or `None` when the entry carries no
    /// `primaryGroupID`.
    async fn primary_group_of(
        &self,
        client: &mut dyn DirectoryClient,
        entry: &DirectoryEntry,
    ) -> Option<String> {
        let rid = entry
            .first_i64(attr::PRIMARY_GROUP_ID)
            .and_then(|rid| u32::try_from(rid).ok())?;

        let fallback = self
            .fallback_primary_group
            .clone()
            .unwrap_or_else(|| format!("CN=Domain Users,CN=Users,{}", client.base_dn()));

        let Some(user_sid) = entry.first_raw(attr::OBJECT_SID) else {
            warn!(dn = %entry.dn(), "entry has primaryGroupID but no objectSid, using fallback");
            return Some(fallback);
        };

        let group_sid = match derive_primary_group_sid(user_sid, rid) {
            Ok(sid) => sid,
            Err(e) => {
                warn!(dn = %entry.dn(), error = %e, "cannot derive primary group SID, using fallback");
                return Some(fallback);
            }
        };

        let request = SearchRequest::subtree(sid_filter(&group_sid)).attributes(["distinguishedName"]);
        match client.search(&request).await {
            Ok(entries) => match entries.into_iter().next() {
                Some(group) => Some(group.dn().to_string()),
                None => {
                    warn!(dn = %entry.dn(), rid, "primary group not found, using fallback");
                    Some(fallback)
                }
            },
            Err(e) => {
                warn!(dn = %entry.dn(), rid, error = %e, "primary group lookup failed, using fallback");
                Some(fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::directory::{AttributeDelta, SearchScope};
    use crate::errors::DirectoryError;
    use crate::identifier::string_to_sid;

    const BASE: &str = "DC=example,DC=com";

    /// Groups keyed by lower-cased DN; `None` makes the lookup fail.
    #[derive(Default)]
    struct GroupGraph {
        groups: HashMap<String, Option<DirectoryEntry>>,
        by_sid_filter: HashMap<String, DirectoryEntry>,
        searches: usize,
    }

    impl GroupGraph {
        fn group(mut self, dn: &str, member_of: &[&str]) -> Self {
            let entry = DirectoryEntry::new(dn).with_attribute("memberOf", member_of.iter().copied());
            self.groups.insert(dn.to_lowercase(), Some(entry));
            self
        }

        fn broken(mut self, dn: &str) -> Self {
            self.groups.insert(dn.to_lowercase(), None);
            self
        }

        fn sid_group(mut self, sid: &str, dn: &str) -> Self {
            let filter = sid_filter(&string_to_sid(sid).unwrap());
            self.by_sid_filter.insert(filter, DirectoryEntry::new(dn));
            self
        }
    }

    #[async_trait]
    impl DirectoryClient for GroupGraph {
        fn base_dn(&self) -> &str {
            BASE
        }

        fn server(&self) -> &str {
            "fake"
        }

        async fn bind(&mut self, _: &str, _: &str) -> Result<bool, DirectoryError> {
            Ok(true)
        }

        async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError> {
            self.searches += 1;
            if request.scope == SearchScope::Subtree {
                return Ok(self.by_sid_filter.get(&request.filter).cloned().into_iter().collect());
            }
            let dn = request.base_dn.clone().unwrap_or_default();
            match self.groups.get(&dn.to_lowercase()) {
                Some(Some(entry)) => Ok(vec![entry.clone()]),
                Some(None) => Err(DirectoryError::Search {
                    base_dn: dn,
                    filter: request.filter.clone(),
                    detail: "no such object".into(),
                }),
                None => Ok(Vec::new()),
            }
        }

        async fn modify(&mut self, _: &str, _: &[AttributeDelta]) -> Result<bool, DirectoryError> {
            Ok(true)
        }

        async fn close(&mut self) -> Result<(), DirectoryError> {
            Ok(())
        }
    }

    fn user(member_of: &[&str]) -> DirectoryEntry {
        DirectoryEntry::new("CN=jdoe,OU=Staff,DC=example,DC=com")
            .with_attribute("memberOf", member_of.iter().copied())
    }

    #[tokio::test]
    async fn test_cyclic_nesting_terminates() {
        let mut graph = GroupGraph::default()
            .group("CN=A,DC=example,DC=com", &["CN=B,DC=example,DC=com"])
            .group("CN=B,DC=example,DC=com", &["cn=a,dc=example,dc=com"]);

        let membership = GroupResolver::new()
            .all_groups_of(&mut graph, &user(&["CN=A,DC=example,DC=com"]), true)
            .await;

        assert_eq!(membership.len(), 2);
        assert!(membership.contains("cn=b,dc=example,dc=com"));
        assert!(membership.is_complete());
        assert_eq!(graph.searches, 2);
    }

    #[tokio::test]
    async fn test_non_recursive_stops_at_direct_groups() {
        let mut graph = GroupGraph::default()
            .group("CN=A,DC=example,DC=com", &["CN=Parent,DC=example,DC=com"]);

        let membership = GroupResolver::new()
            .direct_groups_of(&mut graph, &user(&["CN=A,DC=example,DC=com"]))
            .await;

        assert_eq!(membership.groups(), &["CN=A,DC=example,DC=com".to_string()]);
        assert_eq!(graph.searches, 0);
    }

    #[tokio::test]
    async fn test_failed_branch_is_recorded() {
        let mut graph = GroupGraph::default()
            .group("CN=A,DC=example,DC=com", &["CN=Top,DC=example,DC=com"])
            .broken("CN=Gone,DC=example,DC=com");

        let membership = GroupResolver::new()
            .all_groups_of(
                &mut graph,
                &user(&["CN=A,DC=example,DC=com", "CN=Gone,DC=example,DC=com"]),
                true,
            )
            .await;

        assert!(membership.contains("CN=Top,DC=example,DC=com"));
        assert!(membership.contains("CN=Gone,DC=example,DC=com"));
        assert_eq!(membership.unresolved.len(), 1);
        assert_eq!(membership.unresolved[0].dn, "CN=Gone,DC=example,DC=com");
    }

    #[tokio::test]
    async fn test_primary_group_resolved_by_sid() {
        let mut graph = GroupGraph::default()
            .sid_group("S-1-5-21-1-2-3-513", "CN=Domain Users,CN=Users,DC=example,DC=com");
        let entry = user(&[])
            .with_attribute("objectSid", [string_to_sid("S-1-5-21-1-2-3-1104").unwrap()])
            .with_attribute("primaryGroupID", ["513"]);

        let membership = GroupResolver::new().direct_groups_of(&mut graph, &entry).await;
        assert_eq!(
            membership.groups(),
            &["CN=Domain Users,CN=Users,DC=example,DC=com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_primary_group_falls_back_when_missing() {
        let mut graph = GroupGraph::default();
        let entry = user(&[])
            .with_attribute("objectSid", [string_to_sid("S-1-5-21-1-2-3-1104").unwrap()])
            .with_attribute("primaryGroupID", ["1200"]);

        let membership = GroupResolver::new().direct_groups_of(&mut graph, &entry).await;
        assert!(membership.contains("CN=Domain Users,CN=Users,DC=example,DC=com"));

        let membership = GroupResolver::new()
            .with_fallback_primary_group("CN=Staff,DC=example,DC=com")
            .direct_groups_of(&mut graph, &entry)
            .await;
        assert!(membership.contains("CN=Staff,DC=example,DC=com"));
    }
}
