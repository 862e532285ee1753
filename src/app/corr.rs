//! Correlation ids tying log lines of one harvest or scrape together.

use uuid::Uuid;

const LENGTH: usize = 8;

pub fn new_corr_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(LENGTH);
    id
}

/// `parent/child`, so every line of a nested run can be traced back to its origin.
pub fn child_corr_id(parent: &str) -> String {
    format!("{}/{}", parent, new_corr_id())
}
