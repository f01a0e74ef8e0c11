//! Time-window selection over loaded pull requests

use crate::github::PullDetails;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Inclusive `[start, end]` creation-time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// From the epoch until now
    pub fn all_time() -> Self {
        Self::new(DateTime::UNIX_EPOCH, Utc::now())
    }

    /// Window with each bound defaulted when absent (epoch / now)
    pub fn from_bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self::new(
            start.unwrap_or(DateTime::UNIX_EPOCH),
            end.unwrap_or_else(Utc::now),
        )
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Keep the pull requests created inside `window`, oldest first
///
/// Pull requests without a creation time are dropped.
pub fn filter_by_window(mut details: Vec<PullDetails>, window: &TimeWindow) -> Vec<PullDetails> {
    let before = details.len();
    details.retain(|d| {
        if d.pull.created_at.is_none() {
            debug!(number = d.pull.number, "Pull request has no creation time, excluded");
        }
        d.pull.created_at.is_some()
    });
    details.sort_by_key(|d| d.pull.created_at);

    let selected: Vec<PullDetails> = details
        .into_iter()
        .skip_while(|d| d.pull.created_at.is_some_and(|t| t < window.start))
        .take_while(|d| d.pull.created_at.is_some_and(|t| window.contains(t)))
        .collect();

    debug!(
        total = before,
        selected = selected.len(),
        start = %window.start,
        end = %window.end,
        "Filtered pull requests by creation time"
    );
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PullRequest;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn details(number: u64, created_at: Option<DateTime<Utc>>) -> PullDetails {
        PullDetails {
            pull: PullRequest {
                number,
                state: "closed".to_string(),
                title: String::new(),
                html_url: None,
                user: None,
                created_at,
                merged_at: created_at,
            },
            reviews: Vec::new(),
            files: Vec::new(),
        }
    }

    fn numbers(details: &[PullDetails]) -> Vec<u64> {
        details.iter().map(|d| d.pull.number).collect()
    }

    #[test]
    fn test_inclusive_window() {
        // Deliberately unsorted input
        let input = vec![
            details(4, Some(at(4))),
            details(1, Some(at(1))),
            details(5, Some(at(5))),
            details(3, Some(at(3))),
            details(2, Some(at(2))),
        ];

        let selected = filter_by_window(input, &TimeWindow::new(at(2), at(4)));
        assert_eq!(numbers(&selected), vec![2, 3, 4]);
    }

    #[test]
    fn test_missing_creation_time_excluded() {
        let input = vec![details(1, None), details(2, Some(at(2)))];

        let selected = filter_by_window(input, &TimeWindow::new(DateTime::UNIX_EPOCH, at(31)));
        assert_eq!(numbers(&selected), vec![2]);
    }

    #[test]
    fn test_empty_and_inverted_windows() {
        assert!(filter_by_window(Vec::new(), &TimeWindow::all_time()).is_empty());

        let input = vec![details(1, Some(at(3)))];
        assert!(filter_by_window(input, &TimeWindow::new(at(4), at(2))).is_empty());
    }

    #[test]
    fn test_default_bounds() {
        let window = TimeWindow::from_bounds(None, None);
        assert_eq!(window.start, DateTime::UNIX_EPOCH);
        assert!(window.contains(at(10)));
        assert!(!window.contains(Utc::now() + chrono::Duration::days(1)));
    }
}
