//! Robots compliance and per-domain rate limiting.
//!
//! [`ComplianceGate`] merges two concerns every fetch must pass through:
//! a per-domain robots.txt policy cache (re-fetched after a TTL, default
//! 24h) and a per-domain minimum inter-request interval. Robots fetch
//! failures degrade to allow-all after one retry and are logged as
//! warnings; they never block a crawl.
//!
//! Rate-limit state is keyed by domain and lives for the life of the
//! gate, so interleaved crawls of the same source share one clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

use crate::config::CrawlerConfig;

pub struct ComplianceGate {
    client: reqwest::Client,
    user_agent: String,
    robots_ttl: Duration,
    min_interval: Duration,
    robots: Mutex<HashMap<String, CachedPolicy>>,
    slots: Mutex<HashMap<String, Instant>>,
}

struct CachedPolicy {
    fetched_at: Instant,
    policy: RobotsPolicy,
}

impl ComplianceGate {
    pub fn new(config: &CrawlerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(ComplianceGate {
            client,
            user_agent: config.user_agent.clone(),
            robots_ttl: Duration::from_secs(config.robots_ttl_hours * 3600),
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            robots: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Whether the domain's robots policy permits fetching this URL.
    ///
    /// The policy is fetched on first access per domain and re-fetched
    /// once the TTL expires. An unreachable robots.txt means allow-all.
    /// The cache lock is never held across the fetch, so one domain's
    /// slow robots.txt cannot stall checks for other domains; concurrent
    /// first accesses may fetch twice, last insert wins.
    pub async fn allowed(&self, url: &Url) -> bool {
        let Some(domain) = url.host_str().map(|h| h.to_string()) else {
            return false;
        };

        let fresh = {
            let cache = self.robots.lock().await;
            cache.get(&domain).and_then(|cached| {
                (cached.fetched_at.elapsed() <= self.robots_ttl).then(|| cached.policy.clone())
            })
        };

        let policy = match fresh {
            Some(policy) => policy,
            None => {
                let policy = self.fetch_policy(url).await;
                let mut cache = self.robots.lock().await;
                cache.insert(
                    domain,
                    CachedPolicy {
                        fetched_at: Instant::now(),
                        policy: policy.clone(),
                    },
                );
                policy
            }
        };

        let mut path = url.path().to_string();
        if let Some(q) = url.query() {
            path.push('?');
            path.push_str(q);
        }

        policy.is_allowed(&path)
    }

    /// Block until the domain's minimum inter-request interval has
    /// elapsed since the previously granted slot. Concurrent callers for
    /// the same domain are serialized: each reserves the next free slot
    /// and sleeps until it arrives.
    pub async fn wait_slot(&self, domain: &str) {
        let wake = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let next = match slots.get(domain) {
                Some(prev) => {
                    let candidate = *prev + self.min_interval;
                    if candidate > now {
                        candidate
                    } else {
                        now
                    }
                }
                None => now,
            };
            slots.insert(domain.to_string(), next);
            next
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
    }

    async fn fetch_policy(&self, url: &Url) -> RobotsPolicy {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return RobotsPolicy::allow_all(),
        };

        // One retry, then allow-all.
        for attempt in 0..2 {
            match self.client.get(robots_url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(text) => return RobotsPolicy::parse(&text, &self.user_agent),
                    Err(e) => {
                        warn!(url = %robots_url, attempt, error = %e, "robots.txt body read failed");
                    }
                },
                Ok(resp) if resp.status().as_u16() == 404 => {
                    // No robots file at all: everything is allowed.
                    return RobotsPolicy::allow_all();
                }
                Ok(resp) => {
                    warn!(url = %robots_url, attempt, status = %resp.status(), "robots.txt fetch returned error status");
                }
                Err(e) => {
                    warn!(url = %robots_url, attempt, error = %e, "robots.txt fetch failed");
                }
            }
        }

        warn!(url = %robots_url, "robots.txt unreachable after retry, allowing all");
        RobotsPolicy::allow_all()
    }
}

/// Parsed robots rules for one user agent, reduced to prefix allow/deny.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    rules: Vec<RobotsRule>,
}

#[derive(Debug, Clone)]
struct RobotsRule {
    allow: bool,
    prefix: String,
}

impl RobotsPolicy {
    pub fn allow_all() -> Self {
        RobotsPolicy { rules: Vec::new() }
    }

    /// Parse robots.txt, keeping the group that best matches `user_agent`.
    /// A group naming a token contained in our UA wins over the `*` group.
    pub fn parse(text: &str, user_agent: &str) -> Self {
        struct Group {
            agents: Vec<String>,
            rules: Vec<RobotsRule>,
        }

        let ua_lower = user_agent.to_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut in_rules = false;

        for raw_line in text.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim().to_string();

            match field.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    if in_rules || groups.is_empty() {
                        groups.push(Group {
                            agents: Vec::new(),
                            rules: Vec::new(),
                        });
                        in_rules = false;
                    }
                    if let Some(g) = groups.last_mut() {
                        g.agents.push(value.to_lowercase());
                    }
                }
                "disallow" | "allow" => {
                    in_rules = true;
                    if value.is_empty() {
                        // "Disallow:" with no value permits everything.
                        continue;
                    }
                    if let Some(g) = groups.last_mut() {
                        g.rules.push(RobotsRule {
                            allow: field == "allow",
                            prefix: value,
                        });
                    }
                }
                _ => {}
            }
        }

        // Specific-UA group beats the wildcard group.
        let mut wildcard: Option<Vec<RobotsRule>> = None;
        for group in groups {
            let specific = group
                .agents
                .iter()
                .any(|a| a != "*" && ua_lower.contains(a.as_str()));
            if specific {
                return RobotsPolicy { rules: group.rules };
            }
            if group.agents.iter().any(|a| a == "*") && wildcard.is_none() {
                wildcard = Some(group.rules);
            }
        }

        RobotsPolicy {
            rules: wildcard.unwrap_or_default(),
        }
    }

    /// Longest matching prefix decides; ties favor allow; no match allows.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best_len = 0usize;
        let mut verdict = true;
        for rule in &self.rules {
            if path.starts_with(&rule.prefix) {
                let len = rule.prefix.len();
                if len > best_len || (len == best_len && rule.allow) {
                    best_len = len;
                    verdict = rule.allow;
                }
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;

    const ROBOTS: &str = "\
# sample policy
User-agent: *
Disallow: /private/
Allow: /private/press/
Disallow: /tmp

User-agent: marketlore-crawler
Disallow: /members/
";

    #[test]
    fn wildcard_group_applies_to_unknown_agent() {
        let policy = RobotsPolicy::parse(ROBOTS, "SomeOtherBot/1.0");
        assert!(!policy.is_allowed("/private/reports"));
        assert!(policy.is_allowed("/private/press/2024"));
        assert!(!policy.is_allowed("/tmp/scratch"));
        assert!(policy.is_allowed("/public/page"));
    }

    #[test]
    fn specific_group_wins_over_wildcard() {
        let policy = RobotsPolicy::parse(ROBOTS, "marketlore-crawler/0.3");
        assert!(!policy.is_allowed("/members/area"));
        // The wildcard disallow no longer applies.
        assert!(policy.is_allowed("/private/reports"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow:\n", "anybot");
        assert!(policy.is_allowed("/anything"));
    }

    #[test]
    fn no_rules_allows_everything() {
        let policy = RobotsPolicy::allow_all();
        assert!(policy.is_allowed("/private/"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_slot_enforces_min_interval() {
        let mut cfg = CrawlerConfig::default();
        cfg.min_request_interval_ms = 1000;
        let gate = ComplianceGate::new(&cfg).unwrap();

        let start = tokio::time::Instant::now();
        gate.wait_slot("example.com").await;
        gate.wait_slot("example.com").await;
        gate.wait_slot("example.com").await;
        // Two intervals must have elapsed between three grants.
        assert!(start.elapsed() >= std::time::Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_domains_do_not_block_each_other() {
        let mut cfg = CrawlerConfig::default();
        cfg.min_request_interval_ms = 60_000;
        let gate = ComplianceGate::new(&cfg).unwrap();

        let start = tokio::time::Instant::now();
        gate.wait_slot("a.example.com").await;
        gate.wait_slot("b.example.com").await;
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }
}
