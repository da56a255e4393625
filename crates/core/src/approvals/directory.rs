use std::collections::{BTreeMap, BTreeSet};

use crate::domain::workflow::ApproverId;

/// Key whose reviewers apply to every item type.
pub const ANY_ITEM_TYPE: &str = "*";

/// Who may review items that have no configured workflow.
pub trait ReviewerDirectory: Send + Sync {
    fn reviewers_for(&self, item_type: &str) -> Vec<ApproverId>;

    fn is_reviewer(&self, item_type: &str, approver_id: &ApproverId) -> bool {
        self.reviewers_for(item_type).iter().any(|candidate| candidate == approver_id)
    }
}

/// Reviewer lists loaded once from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticReviewerDirectory {
    by_item_type: BTreeMap<String, BTreeSet<ApproverId>>,
}

impl StaticReviewerDirectory {
    pub fn new(entries: BTreeMap<String, Vec<String>>) -> Self {
        let by_item_type = entries
            .into_iter()
            .map(|(item_type, reviewers)| {
                let reviewers = reviewers
                    .into_iter()
                    .map(|reviewer| reviewer.trim().to_string())
                    .filter(|reviewer| !reviewer.is_empty())
                    .map(ApproverId)
                    .collect();
                (normalize_key(&item_type), reviewers)
            })
            .collect();
        Self { by_item_type }
    }
}

impl ReviewerDirectory for StaticReviewerDirectory {
    fn reviewers_for(&self, item_type: &str) -> Vec<ApproverId> {
        let key = normalize_key(item_type);
        let mut reviewers = BTreeSet::new();
        for lookup in [key.as_str(), ANY_ITEM_TYPE] {
            if let Some(found) = self.by_item_type.get(lookup) {
                reviewers.extend(found.iter().cloned());
            }
        }
        reviewers.into_iter().collect()
    }
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
