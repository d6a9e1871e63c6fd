//! Prompt-injection scanning, sanitization and gating.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::InjectionError;
use crate::injection::patterns::{
    InjectionPattern, PatternSpec, Severity, CATEGORY_STRUCTURAL, DEFAULT_PATTERNS,
};

/// Default prefixes accepted by [`PromptInjectionDetector::validate_with_prefix`].
pub const DEFAULT_SAFE_PREFIXES: &[&str] = &[
    "Please analyze",
    "Please review",
    "Please summarize",
    "Please explain",
    "Please check",
    "Please list",
];

/// Marker substituted for high-severity matches by `sanitize`.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

/// Which suspicion threshold applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    Strict,
    Lenient,
}

/// Points contributed by one match of each severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            critical: 40,
            high: 25,
            medium: 10,
            low: 3,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Detector tuning. The thresholds and weights are policy, not contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub mode: DetectionMode,
    /// Texts longer than this many characters get a length match.
    pub max_prompt_length: usize,
    pub weights: ScoreWeights,
    pub strict_threshold: u32,
    pub lenient_threshold: u32,
    /// A word seen more often than this is repetitive...
    pub repetition_limit: usize,
    /// ...when the text has fewer distinct words than this.
    pub distinct_word_floor: usize,
    /// Share of non-alphanumeric, non-space characters that is suspicious.
    pub special_char_ratio: f64,
    pub safe_prefixes: Vec<String>,
    pub redaction_marker: String,
    /// Appended to the built-in table.
    pub extra_patterns: Vec<PatternSpec>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Strict,
            max_prompt_length: 50_000,
            weights: ScoreWeights::default(),
            strict_threshold: 30,
            lenient_threshold: 50,
            repetition_limit: 10,
            distinct_word_floor: 20,
            special_char_ratio: 0.3,
            safe_prefixes: DEFAULT_SAFE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
            extra_patterns: Vec::new(),
        }
    }
}

impl DetectorConfig {
    /// Create a new builder for DetectorConfig.
    pub fn builder() -> DetectorConfigBuilder {
        DetectorConfigBuilder::default()
    }

    /// The score at or above which text is suspicious in the configured mode.
    pub fn threshold(&self) -> u32 {
        match self.mode {
            DetectionMode::Strict => self.strict_threshold,
            DetectionMode::Lenient => self.lenient_threshold,
        }
    }
}

/// Builder for creating DetectorConfig instances.
#[derive(Debug, Clone, Default)]
pub struct DetectorConfigBuilder {
    config: Option<DetectorConfig>,
}

impl DetectorConfigBuilder {
    fn config(&mut self) -> &mut DetectorConfig {
        self.config.get_or_insert_with(DetectorConfig::default)
    }

    pub fn mode(mut self, mode: DetectionMode) -> Self {
        self.config().mode = mode;
        self
    }

    pub fn max_prompt_length(mut self, chars: usize) -> Self {
        self.config().max_prompt_length = chars;
        self
    }

    pub fn weights(mut self, weights: ScoreWeights) -> Self {
        self.config().weights = weights;
        self
    }

    pub fn thresholds(mut self, strict: u32, lenient: u32) -> Self {
        self.config().strict_threshold = strict;
        self.config().lenient_threshold = lenient;
        self
    }

    pub fn safe_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config().safe_prefixes.push(prefix.into());
        self
    }

    pub fn redaction_marker(mut self, marker: impl Into<String>) -> Self {
        self.config().redaction_marker = marker.into();
        self
    }

    pub fn pattern(mut self, spec: PatternSpec) -> Self {
        self.config().extra_patterns.push(spec);
        self
    }

    /// Build the DetectorConfig.
    pub fn build(mut self) -> DetectorConfig {
        self.config.take().unwrap_or_default()
    }
}

/// Byte range of a match within the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub description: Cow<'static, str>,
    pub severity: Severity,
    pub category: Cow<'static, str>,
    /// `None` for whole-text heuristics.
    pub position: Option<Span>,
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    /// Heuristic findings first, then pattern matches in table order.
    pub matches: Vec<Match>,
    /// Weighted sum of match severities, capped at 100.
    pub score: u32,
    pub is_suspicious: bool,
    /// False if any match is medium severity or above.
    pub safe: bool,
}

impl DetectionResult {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.matches.iter().map(|m| m.severity).max()
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.matches.iter().map(|m| m.category.as_ref()).collect()
    }

    /// Nothing matched at all.
    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }
}

const MAX_SCORE: u32 = 100;

/// Scans text against the pattern table and structural heuristics.
///
/// The compiled table is immutable after construction, so one detector can
/// be shared by reference across threads.
#[derive(Debug, Clone)]
pub struct PromptInjectionDetector {
    config: DetectorConfig,
    patterns: Vec<InjectionPattern>,
}

impl PromptInjectionDetector {
    /// Compile the built-in table plus `config.extra_patterns`.
    pub fn new(config: DetectorConfig) -> Result<Self, InjectionError> {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .chain(config.extra_patterns.iter())
            .map(PatternSpec::compile)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(patterns = patterns.len(), mode = ?config.mode, "detector ready");
        Ok(Self { config, patterns })
    }

    /// Detector with default settings in strict mode.
    pub fn strict() -> Result<Self, InjectionError> {
        Self::new(DetectorConfig::default())
    }

    /// Detector with default settings in lenient mode.
    pub fn lenient() -> Result<Self, InjectionError> {
        Self::new(DetectorConfig::builder().mode(DetectionMode::Lenient).build())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn mode(&self) -> DetectionMode {
        self.config.mode
    }

    /// The compiled table, built-in entries first.
    pub fn patterns(&self) -> &[InjectionPattern] {
        &self.patterns
    }

    /// Scan `text`. The result depends only on `text` and this detector.
    pub fn scan(&self, text: &str) -> DetectionResult {
        let mut matches = Vec::new();

        let length = text.chars().count();
        if length > self.config.max_prompt_length {
            matches.push(structural(
                format!("text exceeds {} characters", self.config.max_prompt_length),
                Severity::Medium,
            ));
        }
        if self.has_excessive_repetition(text) {
            matches.push(structural("excessive word repetition".to_string(), Severity::Medium));
        }
        if special_char_ratio(text) > self.config.special_char_ratio {
            matches.push(structural("high ratio of special characters".to_string(), Severity::Low));
        }

        for pattern in &self.patterns {
            for found in pattern.regex.find_iter(text) {
                matches.push(Match {
                    description: pattern.description.clone(),
                    severity: pattern.severity,
                    category: pattern.category.clone(),
                    position: Some(Span {
                        start: found.start(),
                        end: found.end(),
                    }),
                });
            }
        }

        let score = matches
            .iter()
            .map(|m| self.config.weights.weight(m.severity))
            .fold(0u32, u32::saturating_add)
            .min(MAX_SCORE);
        let safe = !matches.iter().any(|m| m.severity >= Severity::Medium);
        let is_suspicious = score >= self.config.threshold();

        if is_suspicious {
            tracing::warn!(
                score,
                matches = matches.len(),
                categories = ?matches.iter().map(|m| m.category.as_ref()).collect::<BTreeSet<_>>(),
                "possible prompt injection"
            );
        }

        DetectionResult {
            matches,
            score,
            is_suspicious,
            safe,
        }
    }

    /// Shortcut for `scan(text).safe`.
    pub fn is_safe(&self, text: &str) -> bool {
        self.scan(text).safe
    }

    /// Replace every high or critical match with the redaction marker.
    /// Lower-severity matches are left in place.
    ///
    /// Spans are taken from the original text and overlapping spans are
    /// merged, so each redacted region is exactly one that `scan` reports.
    pub fn sanitize(&self, text: &str) -> String {
        let mut spans: Vec<(usize, usize)> = self
            .patterns
            .iter()
            .filter(|p| p.severity >= Severity::High)
            .flat_map(|p| p.regex.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        spans.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        let marker = self.config.redaction_marker.as_str();
        let mut sanitized = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end) in merged {
            sanitized.push_str(&text[cursor..start]);
            sanitized.push_str(marker);
            cursor = end;
        }
        sanitized.push_str(&text[cursor..]);
        sanitized
    }

    /// Fail iff the text is suspicious.
    pub fn validate(&self, text: &str) -> Result<(), InjectionError> {
        let result = self.scan(text);
        if result.is_suspicious {
            return Err(InjectionError::Detected(Box::new(result)));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), and in strict mode also require the
    /// trimmed text to open with one of the configured safe prefixes.
    pub fn validate_with_prefix(&self, text: &str) -> Result<(), InjectionError> {
        self.validate(text)?;
        if self.config.mode == DetectionMode::Strict && !self.has_safe_prefix(text) {
            tracing::warn!("text rejected: no approved prefix");
            return Err(InjectionError::MissingSafePrefix);
        }
        Ok(())
    }

    fn has_safe_prefix(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.config.safe_prefixes.iter().any(|prefix| {
            trimmed
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
    }

    fn has_excessive_repetition(&self, text: &str) -> bool {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }
            *counts.entry(word.to_lowercase()).or_default() += 1;
        }
        counts.len() < self.config.distinct_word_floor
            && counts.values().any(|&n| n > self.config.repetition_limit)
    }
}

fn structural(description: String, severity: Severity) -> Match {
    Match {
        description: Cow::Owned(description),
        severity,
        category: Cow::Borrowed(CATEGORY_STRUCTURAL),
        position: None,
    }
}

fn special_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut special = 0usize;
    for c in text.chars() {
        total += 1;
        if !c.is_alphanumeric() && !c.is_whitespace() {
            special += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    special as f64 / total as f64
}
