//! GitHub API layer
//!
//! This module provides:
//! - Payload types for pulls, reviews, commits and notifications
//! - `GitHubApi` trait for API abstraction
//! - `RestClient` implementation over reqwest
//! - `ClientPool` for per-organization credentials
//! - `MockGitHub` scripted double for tests

pub mod client;
pub mod mock;
pub mod rest;
pub mod types;

pub use client::{ClientPool, GitHubApi};
pub use mock::{MockCall, MockGitHub};
pub use rest::{DEFAULT_API_URL, RestClient, RestConfig};
pub use types::{
    Commit, Notification, NotificationBatch, NotificationPage, NotificationQuery, PullRequest, Review, User,
    pr_number_from_subject_url, split_repo,
};
