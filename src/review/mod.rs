//! Decides whether a pull request needs review or re-approval.

mod classifier;

pub use classifier::{ReviewState, ReviewVerdict, check_review_status, evaluate_commits, evaluate_reviews};
