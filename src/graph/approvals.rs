//! Approval edges: who approved whose pull requests

use crate::github::{PullDetails, GHOST_LOGIN};
use std::collections::BTreeMap;

/// Directed `requester → reviewer` approval count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalEdge {
    pub requester: String,
    pub reviewer: String,
    pub frequency: u64,
}

/// All approval edges of a set of pull requests
#[derive(Debug, Clone, Default)]
pub struct Approvals {
    /// Edges sorted by (requester, reviewer)
    pub edges: Vec<ApprovalEdge>,
    /// Sum of all edge frequencies
    pub total: u64,
}

fn is_countable(login: &str) -> bool {
    !login.is_empty() && login != GHOST_LOGIN
}

/// Count approved reviews per `(requester, reviewer)` pair
///
/// Skips reviews that are not approvals and any pair where either side is
/// empty or the deleted-account placeholder. Self-approvals are kept.
pub fn collect_approvals(details: &[PullDetails]) -> Approvals {
    let mut frequency: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    let mut total = 0;

    for detail in details {
        let requester = detail.pull.author_login();
        if !is_countable(requester) {
            continue;
        }

        for review in detail.reviews.iter().filter(|r| r.is_approval()) {
            let reviewer = review.reviewer_login();
            if !is_countable(reviewer) {
                continue;
            }
            *frequency.entry((requester, reviewer)).or_insert(0) += 1;
            total += 1;
        }
    }

    let edges = frequency
        .into_iter()
        .map(|((requester, reviewer), frequency)| ApprovalEdge {
            requester: requester.to_string(),
            reviewer: reviewer.to_string(),
            frequency,
        })
        .collect();

    Approvals { edges, total }
}
