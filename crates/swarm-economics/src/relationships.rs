use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Attributes used to link parties that may be colluding.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartyInfo {
    pub account_id: String,
    pub org_domain: Option<String>,
    pub asn: Option<u32>,
    pub identity_hash: Option<String>,
}

/// Detects relationships between a challenger and committee members:
/// shared organization domain, shared ASN, or a shared identity proof.
/// Payouts are blocked when any link is found.
pub struct RelationshipDetector {
    parties: Mutex<HashMap<String, PartyInfo>>,
}

impl RelationshipDetector {
    pub fn new() -> Self {
        Self {
            parties: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_party(&self, info: PartyInfo) {
        self.parties
            .lock()
            .expect("party lock poisoned")
            .insert(info.account_id.clone(), info);
    }

    pub fn get_party(&self, account_id: &str) -> Option<PartyInfo> {
        self.parties
            .lock()
            .expect("party lock poisoned")
            .get(account_id)
            .cloned()
    }

    pub fn detect_same_org(&self, committee: &[String], challenger: &str) -> bool {
        self.linked(committee, challenger, |a, b| {
            matches!((&a.org_domain, &b.org_domain), (Some(x), Some(y)) if x == y)
        })
    }

    pub fn detect_same_asn(&self, committee: &[String], challenger: &str) -> bool {
        self.linked(committee, challenger, |a, b| {
            matches!((a.asn, b.asn), (Some(x), Some(y)) if x == y)
        })
    }

    pub fn detect_identity_links(&self, committee: &[String], challenger: &str) -> bool {
        self.linked(committee, challenger, |a, b| {
            matches!((&a.identity_hash, &b.identity_hash), (Some(x), Some(y)) if x == y)
        })
    }

    /// Any of the three linkage checks.
    pub fn detect_any_relationship(&self, committee: &[String], challenger: &str) -> bool {
        self.detect_same_org(committee, challenger)
            || self.detect_same_asn(committee, challenger)
            || self.detect_identity_links(committee, challenger)
    }

    /// Every committee member linked to the challenger by any attribute.
    pub fn related_parties(&self, committee: &[String], challenger: &str) -> HashSet<String> {
        let parties = self.parties.lock().expect("party lock poisoned");
        let Some(challenger_info) = parties.get(challenger) else {
            return HashSet::new();
        };
        committee
            .iter()
            .filter(|member| {
                parties.get(*member).is_some_and(|info| {
                    same_attr(&info.org_domain, &challenger_info.org_domain)
                        || matches!((info.asn, challenger_info.asn), (Some(x), Some(y)) if x == y)
                        || same_attr(&info.identity_hash, &challenger_info.identity_hash)
                })
            })
            .cloned()
            .collect()
    }

    fn linked<F>(&self, committee: &[String], challenger: &str, related: F) -> bool
    where
        F: Fn(&PartyInfo, &PartyInfo) -> bool,
    {
        let parties = self.parties.lock().expect("party lock poisoned");
        let Some(challenger_info) = parties.get(challenger) else {
            return false;
        };
        committee
            .iter()
            .filter_map(|member| parties.get(member))
            .any(|info| related(info, challenger_info))
    }
}

fn same_attr(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

impl Default for RelationshipDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(id: &str, org: Option<&str>, asn: Option<u32>, identity: Option<&str>) -> PartyInfo {
        PartyInfo {
            account_id: id.into(),
            org_domain: org.map(String::from),
            asn,
            identity_hash: identity.map(String::from),
        }
    }

    #[test]
    fn shared_org_is_detected() {
        let detector = RelationshipDetector::new();
        detector.register_party(party("challenger", Some("acme.com"), None, None));
        detector.register_party(party("v1", Some("acme.com"), None, None));
        detector.register_party(party("v2", Some("other.io"), None, None));

        let committee = vec!["v1".to_string(), "v2".to_string()];
        assert!(detector.detect_same_org(&committee, "challenger"));
        assert_eq!(
            detector.related_parties(&committee, "challenger"),
            HashSet::from(["v1".to_string()])
        );
    }

    #[test]
    fn shared_asn_and_identity_detected() {
        let detector = RelationshipDetector::new();
        detector.register_party(party("c", None, Some(64500), Some("idhash")));
        detector.register_party(party("v1", None, Some(64500), None));
        detector.register_party(party("v2", None, None, Some("idhash")));

        let committee = vec!["v1".to_string(), "v2".to_string()];
        assert!(detector.detect_same_asn(&committee, "c"));
        assert!(detector.detect_identity_links(&committee, "c"));
        assert!(detector.detect_any_relationship(&committee, "c"));
    }

    #[test]
    fn unknown_parties_are_unrelated() {
        let detector = RelationshipDetector::new();
        let committee = vec!["v1".to_string()];
        assert!(!detector.detect_any_relationship(&committee, "nobody"));
        assert!(detector.related_parties(&committee, "nobody").is_empty());
    }
}
