//! Selective-sync policy.
//!
//! A rule list decides, for a given path and size, whether it participates
//! in replication at all. Generalizes glob-only exclude matching to also
//! accept `/…/`-delimited regexes and priority-weighted overrides instead of
//! a flat exclude/include pair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use globset::{Glob, GlobMatcher};
use regex::Regex;
use tokio::sync::Mutex;

use crate::error::PolicyError;

const DECISION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
	Low,
	Normal,
	High,
	Critical,
}

enum Matcher {
	Glob(GlobMatcher),
	Regex(Regex),
	Literal(String),
}

impl Matcher {
	fn compile(pattern: &str) -> Result<Self, PolicyError> {
		if let Some(body) = pattern.strip_prefix('/').and_then(|p| p.strip_suffix('/')) {
			let re = Regex::new(body)
				.map_err(|e| PolicyError::InvalidPattern { pattern: pattern.to_string(), message: e.to_string() })?;
			return Ok(Matcher::Regex(re));
		}
		if pattern.contains(['*', '?', '[']) {
			let glob = Glob::new(pattern)
				.map_err(|e| PolicyError::InvalidPattern { pattern: pattern.to_string(), message: e.to_string() })?;
			return Ok(Matcher::Glob(glob.compile_matcher()));
		}
		Ok(Matcher::Literal(pattern.to_string()))
	}

	fn matches(&self, path: &str) -> bool {
		match self {
			Matcher::Glob(m) => m.is_match(path),
			Matcher::Regex(re) => re.is_match(path),
			Matcher::Literal(lit) => path.contains(lit.as_str()),
		}
	}
}

/// One selective-sync rule (spec.md §4.7 exact field list).
pub struct Rule {
	matcher: Matcher,
	pub priority: Priority,
	pub include: bool,
	pub active_hours: Option<Vec<u8>>,
	pub max_size: Option<u64>,
	pub tags: Vec<String>,
}

impl Rule {
	pub fn new(
		pattern: &str,
		priority: Priority,
		include: bool,
		active_hours: Option<Vec<u8>>,
		max_size: Option<u64>,
		tags: Vec<String>,
	) -> Result<Self, PolicyError> {
		Ok(Rule { matcher: Matcher::compile(pattern)?, priority, include, active_hours, max_size, tags })
	}

	fn applies(&self, path: &str, size: u64, hour: u8) -> bool {
		if !self.matcher.matches(path) {
			return false;
		}
		if let Some(max) = self.max_size {
			if size > max {
				return false;
			}
		}
		if let Some(hours) = &self.active_hours {
			if !hours.contains(&hour) {
				return false;
			}
		}
		true
	}
}

/// Evaluates the rule list and caches per-path decisions for
/// [`DECISION_CACHE_TTL`] (spec.md §4.7).
pub struct SelectiveSyncPolicy {
	rules: Vec<Rule>,
	cache: Mutex<HashMap<String, (bool, Instant)>>,
}

impl SelectiveSyncPolicy {
	pub fn new(rules: Vec<Rule>) -> Self {
		SelectiveSyncPolicy { rules, cache: Mutex::new(HashMap::new()) }
	}

	/// Decide whether `path`/`size` should be replicated, consulting the
	/// cache first. `hour` is the caller's current local hour (0-23), used
	/// against each rule's `active_hours`.
	pub async fn should_sync(&self, path: &str, size: u64, hour: u8) -> bool {
		{
			let cache = self.cache.lock().await;
			if let Some((decision, stamped)) = cache.get(path) {
				if stamped.elapsed() < DECISION_CACHE_TTL {
					return *decision;
				}
			}
		}

		let mut include = true;
		let mut winning_priority: Option<Priority> = None;
		for rule in &self.rules {
			if !rule.applies(path, size, hour) {
				continue;
			}
			let overrides = match winning_priority {
				None => true,
				Some(current) => rule.priority >= current,
			};
			if overrides {
				include = rule.include;
				winning_priority = Some(rule.priority);
			}
		}

		self.cache.lock().await.insert(path.to_string(), (include, Instant::now()));
		include
	}

	/// Drop all cached decisions, e.g. after the rule list is reloaded.
	pub async fn invalidate_cache(&self) {
		self.cache.lock().await.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn default_include_when_no_rules_match() {
		let policy = SelectiveSyncPolicy::new(vec![]);
		assert!(policy.should_sync("docs/readme.md", 10, 12).await);
	}

	#[tokio::test]
	async fn glob_exclude_rule_wins() {
		let rules = vec![Rule::new("*.log", Priority::Normal, false, None, None, vec![]).unwrap()];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(!policy.should_sync("server.log", 10, 12).await);
		assert!(policy.should_sync("server.txt", 10, 12).await);
	}

	#[tokio::test]
	async fn regex_pattern_dispatch() {
		let rules = vec![Rule::new("/^secrets\\//", Priority::High, false, None, None, vec![]).unwrap()];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(!policy.should_sync("secrets/token.txt", 10, 12).await);
		assert!(policy.should_sync("public/token.txt", 10, 12).await);
	}

	#[tokio::test]
	async fn higher_priority_overrides_later_lower_priority_rule() {
		let rules = vec![
			Rule::new("*.dat", Priority::Critical, true, None, None, vec![]).unwrap(),
			Rule::new("*.dat", Priority::Low, false, None, None, vec![]).unwrap(),
		];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(policy.should_sync("archive.dat", 10, 12).await, "critical include must survive over a later low-priority exclude");
	}

	#[tokio::test]
	async fn max_size_rule_only_applies_under_threshold() {
		let rules = vec![Rule::new("*.bin", Priority::Normal, false, None, Some(100), vec![]).unwrap()];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(!policy.should_sync("a.bin", 50, 12).await);
		assert!(policy.should_sync("a.bin", 500, 12).await, "rule does not apply above max_size, default include stands");
	}

	#[tokio::test]
	async fn active_hours_restricts_rule_application() {
		let rules = vec![Rule::new("*.tmp", Priority::Normal, false, Some(vec![2, 3]), None, vec![]).unwrap()];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(!policy.should_sync("x.tmp", 10, 2).await);
		assert!(policy.should_sync("x.tmp", 10, 14).await, "rule only active during configured hours");
	}

	#[tokio::test]
	async fn decision_is_cached_despite_rule_list_change_semantics() {
		let rules = vec![Rule::new("*.log", Priority::Normal, false, None, None, vec![]).unwrap()];
		let policy = SelectiveSyncPolicy::new(rules);
		assert!(!policy.should_sync("a.log", 10, 12).await);
		policy.cache.lock().await.insert("a.log".to_string(), (true, Instant::now()));
		assert!(policy.should_sync("a.log", 10, 12).await, "cached decision short-circuits re-evaluation");
	}

	#[test]
	fn invalid_regex_pattern_is_rejected() {
		let err = Rule::new("/(/", Priority::Normal, false, None, None, vec![]).unwrap_err();
		matches!(err, PolicyError::InvalidPattern { .. });
	}
}
