use eyre::{Context, Result, bail};
use pr_monitor::github::{ClientPool, DEFAULT_API_URL, RestClient, RestConfig, split_repo};
use pr_monitor::monitor::MonitorSettings;
use pr_monitor::scheduler::{DEFAULT_FULL_REFRESH_INTERVAL, Priority, RepoPriorityConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github_token: Option<String>,
    pub org_tokens: HashMap<String, String>,
    pub api_url: String,
    pub username: Option<String>,
    pub authors: Vec<String>,
    pub repos: RepoList,
    pub poll_intervals: PollIntervals,
    pub max_age_days: u32,
    pub full_refresh_interval_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

/// Either `["owner/repo", ...]` or `{high: [...], medium: [...], low: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepoList {
    Flat(Vec<String>),
    Tiered(TieredRepos),
}

impl Default for RepoList {
    fn default() -> Self {
        RepoList::Flat(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredRepos {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

impl TieredRepos {
    fn tier(&self, priority: Priority) -> &[String] {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }
}

/// Per-tier poll intervals in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            high: 120,
            medium: 900,
            low: 7200,
        }
    }
}

impl PollIntervals {
    pub fn for_priority(&self, priority: Priority) -> Duration {
        Duration::from_secs(match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            org_tokens: HashMap::new(),
            api_url: DEFAULT_API_URL.to_string(),
            username: None,
            authors: Vec::new(),
            repos: RepoList::default(),
            poll_intervals: PollIntervals::default(),
            max_age_days: 3,
            full_refresh_interval_secs: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/config.yaml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join("config.yaml");
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Check the settings the monitor cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.authors.iter().all(|a| a.trim().is_empty()) {
            bail!("No authors configured: set `authors` to the logins whose PRs you review");
        }

        let repos = self.all_repos();
        if repos.is_empty() {
            bail!("No repositories configured: set `repos`");
        }
        for repo in &repos {
            split_repo(repo).with_context(|| format!("Invalid repository {:?}: expected owner/name", repo))?;
        }

        if self.default_token().is_none() {
            let uncovered: Vec<&String> = repos
                .iter()
                .filter(|repo| !self.org_tokens.contains_key(repo_owner(repo)))
                .collect();
            if !uncovered.is_empty() {
                bail!(
                    "No GitHub token for {:?}: set `github_token`, {} or `org_tokens`",
                    uncovered,
                    TOKEN_ENV
                );
            }
        }

        Ok(())
    }

    /// Configured token, else the environment.
    pub fn default_token(&self) -> Option<String> {
        self.github_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()))
    }

    pub fn is_tiered(&self) -> bool {
        matches!(self.repos, RepoList::Tiered(_))
    }

    /// Every repository, high → medium → low for tiered configs.
    pub fn all_repos(&self) -> Vec<String> {
        self.repo_priorities().into_iter().map(|r| r.repo).collect()
    }

    /// Flat lists are polled at the medium interval when notifications are
    /// unavailable.
    pub fn repo_priorities(&self) -> Vec<RepoPriorityConfig> {
        match &self.repos {
            RepoList::Flat(repos) => repos
                .iter()
                .map(|repo| {
                    RepoPriorityConfig::new(
                        repo.clone(),
                        Priority::Medium,
                        self.poll_intervals.for_priority(Priority::Medium),
                    )
                })
                .collect(),
            RepoList::Tiered(tiers) => Priority::ALL
                .iter()
                .flat_map(|priority| {
                    tiers.tier(*priority).iter().map(move |repo| {
                        RepoPriorityConfig::new(repo.clone(), *priority, self.poll_intervals.for_priority(*priority))
                    })
                })
                .collect(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(env!("CARGO_PKG_NAME"))
        })
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let mut settings = MonitorSettings::new(self.data_dir(), self.authors.clone(), self.repo_priorities());
        settings.username = self.username.clone();
        settings.tiered = self.is_tiered();
        settings.max_age_days = self.max_age_days;
        settings.full_refresh_interval = self
            .full_refresh_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FULL_REFRESH_INTERVAL);
        settings
    }

    /// One REST client per org token plus the default credential.
    pub fn client_pool(&self) -> Result<ClientPool> {
        let rest_config = RestConfig {
            api_url: self.api_url.clone(),
            ..RestConfig::default()
        };

        let mut pool = ClientPool::new();
        if let Some(token) = self.default_token() {
            let client = RestClient::new(token, rest_config.clone()).context("Failed to build GitHub client")?;
            pool.set_default(Arc::new(client));
        }
        for (org, token) in &self.org_tokens {
            let client = RestClient::new(token.clone(), rest_config.clone())
                .context(format!("Failed to build GitHub client for {}", org))?;
            pool.add_org(org.clone(), Arc::new(client));
        }
        Ok(pool)
    }
}

fn repo_owner(repo: &str) -> &str {
    split_repo(repo).map(|(owner, _)| owner).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("authors: [dev]\n");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.max_age_days, 3);
        assert_eq!(config.poll_intervals.high, 120);
        assert_eq!(config.poll_intervals.medium, 900);
        assert_eq!(config.poll_intervals.low, 7200);
        assert!(!config.is_tiered());
        assert_eq!(config.monitor_settings().full_refresh_interval, DEFAULT_FULL_REFRESH_INTERVAL);
    }

    #[test]
    fn test_flat_repo_list() {
        let config = parse(
            r#"
github_token: abc
authors: [dev]
repos:
  - acme/widgets
  - acme/gadgets
"#,
        );
        assert!(!config.is_tiered());
        assert_eq!(config.all_repos(), vec!["acme/widgets", "acme/gadgets"]);
        assert!(config.repo_priorities().iter().all(|r| r.priority == Priority::Medium));
        config.validate().unwrap();
    }

    #[test]
    fn test_tiered_repos_in_priority_order() {
        let config = parse(
            r#"
github_token: abc
authors: [dev]
repos:
  low: [acme/docs]
  high: [acme/core]
  medium: [acme/web, acme/api]
poll_intervals:
  high: 60
"#,
        );
        assert!(config.is_tiered());
        assert_eq!(config.all_repos(), vec!["acme/core", "acme/web", "acme/api", "acme/docs"]);

        let priorities = config.repo_priorities();
        assert_eq!(priorities[0].interval, Duration::from_secs(60));
        assert_eq!(priorities[1].interval, Duration::from_secs(900));
        assert_eq!(priorities[3].priority, Priority::Low);
        assert!(config.monitor_settings().tiered);
    }

    #[test]
    fn test_validate_rejects_missing_authors_and_bad_repos() {
        let config = parse("github_token: abc\nrepos: [acme/widgets]\n");
        assert!(config.validate().is_err());

        let config = parse("github_token: abc\nauthors: [dev]\nrepos: [widgets]\n");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("widgets"));

        let config = parse("github_token: abc\nauthors: [dev]\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_org_tokens_cover_repos_without_default() {
        let config = parse(
            r#"
authors: [dev]
repos: [acme/widgets]
org_tokens:
  acme: xyz
"#,
        );
        config.validate().unwrap();
        let pool = config.client_pool().unwrap();
        assert!(pool.for_repo("acme/widgets").is_some());
    }

    #[test]
    fn test_settings_carry_overrides() {
        let config = parse(
            r#"
authors: [dev]
repos: [acme/widgets]
username: me
max_age_days: 7
full_refresh_interval_secs: 600
data_dir: /tmp/pr-monitor-test
"#,
        );
        let settings = config.monitor_settings();
        assert_eq!(settings.username.as_deref(), Some("me"));
        assert_eq!(settings.max_age_days, 7);
        assert_eq!(settings.full_refresh_interval, Duration::from_secs(600));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/pr-monitor-test"));
    }
}
