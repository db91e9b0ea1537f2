//! URL phishing heuristics. Five URL features plus a context keyword score,
//! averaged over the features that fired. A verdict needs two of them, or a
//! known-bad domain on its own.

use super::{fingerprint, mean_of_active, ScoreResult};
use crate::config::PhishingConfig;
use crate::error::{ConfigError, ScoreError};
use crate::model::ModelFeature;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::{debug, info, Span};

const URL_LENGTH: &str = "url_length";
const DOMAIN: &str = "domain";
const SPECIAL_CHARS: &str = "special_chars";
const IP_ADDRESS: &str = "ip_address";
const SUBDOMAINS: &str = "subdomains";
const CONTEXT: &str = "context";
const MODEL: &str = "model_score";

/// Domain score for an exact hit in the suspicious-domain list
const KNOWN_BAD_DOMAIN: f64 = 0.9;

/// Pattern database. Loadable from JSON; any missing key takes the built-in list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhishingPatterns {
    pub keywords: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub suspicious_domains: Vec<String>,
    /// Truncated brand token → brand names it imitates
    pub lookalikes: BTreeMap<String, Vec<String>>,
    /// Brand-operated domains that carry a brand name without being its `<brand>.<tld>`
    pub trusted_domains: Vec<String>,
}

impl Default for PhishingPatterns {
    fn default() -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            keywords: strings(&[
                "verify", "confirm", "update", "validate", "secure", "account", "login",
                "password", "suspended", "urgent",
            ]),
            suspicious_tlds: strings(&[".tk", ".ml", ".ga", ".cf"]),
            suspicious_domains: strings(&[
                "paypa1.com",
                "amaz0n.com",
                "go0gle.com",
                "bank-verify.com",
                "account-confirm.com",
                "secure-login.com",
                "update-verify.com",
            ]),
            lookalikes: [
                ("paypa", "paypal"),
                ("amaz", "amazon"),
                ("goog", "google"),
                ("face", "facebook"),
            ]
            .into_iter()
            .map(|(token, brand)| (token.to_string(), vec![brand.to_string()]))
            .collect(),
            trusted_domains: strings(&[
                "googleapis.com",
                "googleusercontent.com",
                "googlevideo.com",
                "amazonaws.com",
                "facebook.net",
                "paypalobjects.com",
            ]),
        }
    }
}

impl PhishingPatterns {
    /// Missing file → built-in patterns. Unreadable or malformed → startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub struct PhishingScorer {
    threshold: f64,
    patterns: PhishingPatterns,
    suspicious_domains: HashSet<String>,
    trusted_domains: Vec<String>,
    url_format: Regex,
    model: Option<ModelFeature>,
    span: Span,
}

impl PhishingScorer {
    pub fn new(config: &PhishingConfig) -> Result<Self, ConfigError> {
        let patterns = match &config.patterns_path {
            Some(path) => PhishingPatterns::load(path)?,
            None => PhishingPatterns::default(),
        };
        Self::with_patterns(config.confidence_threshold, patterns)
    }

    pub fn with_patterns(threshold: f64, patterns: PhishingPatterns) -> Result<Self, ConfigError> {
        let url_format = Regex::new(r"(?i)^https?://[^\s/?#]+[^\s]*$").map_err(|e| ConfigError::Invalid {
            field: "phishing.url_format",
            reason: e.to_string(),
        })?;
        let suspicious_domains = patterns
            .suspicious_domains
            .iter()
            .map(|d| d.to_lowercase())
            .collect();
        let trusted_domains = patterns
            .trusted_domains
            .iter()
            .map(|d| d.to_lowercase())
            .collect();
        let span = tracing::info_span!("phishing");
        info!(
            parent: &span,
            keywords = patterns.keywords.len(),
            domains = patterns.suspicious_domains.len(),
            "phishing scorer ready"
        );
        Ok(Self {
            threshold,
            patterns,
            suspicious_domains,
            trusted_domains,
            url_format,
            model: None,
            span,
        })
    }

    pub fn with_model(mut self, model: ModelFeature) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a URL with optional surrounding text (mail body, page text).
    /// Malformed URLs fail closed with a negative result.
    pub fn detect(&self, url: &str, context: &str) -> Result<ScoreResult, ScoreError> {
        let Some(host) = self.host_of(url) else {
            debug!(parent: &self.span, "rejected malformed url");
            return Ok(ScoreResult::negative("Invalid URL format"));
        };

        let mut features = BTreeMap::new();
        features.insert(URL_LENGTH.to_string(), score_length(url));
        features.insert(DOMAIN.to_string(), self.score_domain(&host));
        features.insert(SPECIAL_CHARS.to_string(), score_special_chars(url));
        features.insert(IP_ADDRESS.to_string(), score_ip(&host));
        features.insert(SUBDOMAINS.to_string(), score_subdomains(&host));
        features.insert(CONTEXT.to_string(), self.score_context(context));

        if let Some(model) = &self.model {
            let inputs: Vec<f32> = features.values().map(|v| *v as f32).collect();
            if let Some(score) = model.score(&inputs, &self.span)? {
                features.insert(MODEL.to_string(), score);
            }
        }

        let confidence = mean_of_active(features.values());
        let is_threat = confidence >= self.threshold && corroborated(&features);
        debug!(
            parent: &self.span,
            url = %truncate(url, 50),
            score = confidence,
            is_threat,
            "phishing scored"
        );

        Ok(ScoreResult {
            is_threat,
            confidence,
            reasons: reasons(&features),
            features,
            fingerprint: Some(fingerprint(url.as_bytes())),
        })
    }

    /// Lowercased host, without userinfo or port. `None` when the URL is malformed.
    fn host_of(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if !self.url_format.is_match(url) {
            return None;
        }
        let rest = &url[url.find("://")? + 3..];
        let authority = rest.split(['/', '?', '#']).next()?;
        let host_port = authority.rsplit('@').next()?;
        let host = if let Some(bracketed) = host_port.strip_prefix('[') {
            bracketed.split(']').next()?
        } else {
            host_port.split(':').next()?
        };
        if host.is_empty() {
            return None;
        }
        Some(host.to_lowercase())
    }

    fn score_domain(&self, host: &str) -> f64 {
        if self.suspicious_domains.contains(host) {
            return KNOWN_BAD_DOMAIN;
        }
        if self
            .patterns
            .suspicious_tlds
            .iter()
            .any(|tld| host.ends_with(tld.as_str()))
        {
            return 0.7;
        }
        if self.is_lookalike(host) {
            return 0.7;
        }
        0.0
    }

    /// A host carrying both a brand token and the full brand name, outside the
    /// brand's own domains.
    fn is_lookalike(&self, host: &str) -> bool {
        if self.is_trusted(host) {
            return false;
        }
        self.patterns.lookalikes.iter().any(|(token, brands)| {
            host.contains(token.as_str())
                && brands
                    .iter()
                    .any(|brand| host.contains(brand.as_str()) && !is_brand_domain(host, brand))
        })
    }

    fn is_trusted(&self, host: &str) -> bool {
        self.trusted_domains
            .iter()
            .any(|d| host == d || host.strip_suffix(d.as_str()).is_some_and(|rest| rest.ends_with('.')))
    }

    fn score_context(&self, context: &str) -> f64 {
        if context.is_empty() {
            return 0.0;
        }
        let lower = context.to_lowercase();
        let hits = self
            .patterns
            .keywords
            .iter()
            .filter(|kw| lower.contains(kw.as_str()))
            .count();
        (hits as f64 * 0.25).min(0.5)
    }
}

/// `<brand>.<tld>` or `<brand>.<sld>.<cc>` (e.g. `amazon.co.uk`), or a subdomain of either.
fn is_brand_domain(host: &str, brand: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    labels.iter().enumerate().any(|(i, label)| {
        let suffix = &labels[i + 1..];
        *label == brand
            && (1..=2).contains(&suffix.len())
            && suffix.iter().all(|l| (2..=3).contains(&l.len()))
    })
}

/// One feature alone is not enough for a verdict, except an exact known-bad domain.
fn corroborated(features: &BTreeMap<String, f64>) -> bool {
    let active = features.values().filter(|v| **v > 0.0).count();
    active >= 2 || features.get(DOMAIN).copied().unwrap_or(0.0) >= KNOWN_BAD_DOMAIN
}

fn score_length(url: &str) -> f64 {
    match url.len() {
        n if n > 200 => 0.8,
        n if n > 100 => 0.5,
        _ => 0.0,
    }
}

fn score_special_chars(url: &str) -> f64 {
    let n = url.chars().filter(|c| matches!(c, '@' | '?')).count();
    if n > 2 {
        0.6
    } else {
        0.0
    }
}

fn score_ip(host: &str) -> f64 {
    if host.parse::<Ipv4Addr>().is_ok() || host.parse::<Ipv6Addr>().is_ok() {
        0.8
    } else {
        0.0
    }
}

fn score_subdomains(host: &str) -> f64 {
    if host.matches('.').count() > 3 {
        0.6
    } else {
        0.0
    }
}

fn reasons(features: &BTreeMap<String, f64>) -> Vec<String> {
    let f = |name: &str| features.get(name).copied().unwrap_or(0.0);
    let mut out = Vec::new();
    if f(URL_LENGTH) > 0.5 {
        out.push("Unusually long URL".to_string());
    }
    if f(DOMAIN) > 0.5 {
        out.push("Suspicious domain name".to_string());
    }
    if f(SPECIAL_CHARS) > 0.5 {
        out.push("Suspicious special characters in URL".to_string());
    }
    if f(IP_ADDRESS) > 0.5 {
        out.push("Using IP address instead of domain".to_string());
    }
    if f(SUBDOMAINS) > 0.5 {
        out.push("Too many subdomains".to_string());
    }
    // context is capped at 0.5, so it has its own trigger
    if f(CONTEXT) > 0.3 {
        out.push("Context contains phishing keywords".to_string());
    }
    if f(MODEL) > 0.5 {
        out.push("Model flags URL as phishing".to_string());
    }
    if out.is_empty() {
        out.push("URL appears legitimate".to_string());
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
