//! Detection pattern table.
//!
//! Each entry is data: a regex source, a severity and a category. The table
//! is compiled once per detector and never mutated afterwards.

use std::borrow::Cow;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::InjectionError;

/// How strongly a match indicates an injection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Uncompiled table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: Cow<'static, str>,
    pub severity: Severity,
    pub category: Cow<'static, str>,
    pub description: Cow<'static, str>,
}

impl PatternSpec {
    /// A table entry built from static strings.
    pub const fn new(
        pattern: &'static str,
        severity: Severity,
        category: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            pattern: Cow::Borrowed(pattern),
            severity,
            category: Cow::Borrowed(category),
            description: Cow::Borrowed(description),
        }
    }

    /// Compile this entry.
    pub fn compile(&self) -> Result<InjectionPattern, InjectionError> {
        let regex = Regex::new(&self.pattern).map_err(|source| InjectionError::InvalidPattern {
            pattern: self.pattern.to_string(),
            source,
        })?;
        Ok(InjectionPattern {
            regex,
            severity: self.severity,
            category: self.category.clone(),
            description: self.description.clone(),
        })
    }
}

/// A compiled table entry.
#[derive(Debug, Clone)]
pub struct InjectionPattern {
    pub regex: Regex,
    pub severity: Severity,
    pub category: Cow<'static, str>,
    pub description: Cow<'static, str>,
}

pub const CATEGORY_OVERRIDE: &str = "override";
pub const CATEGORY_ROLE_CONFUSION: &str = "role_confusion";
pub const CATEGORY_EXTRACTION: &str = "extraction";
pub const CATEGORY_JAILBREAK: &str = "jailbreak";
pub const CATEGORY_MANIPULATION: &str = "manipulation";
pub const CATEGORY_ENCODING: &str = "encoding";
pub const CATEGORY_FORMAT_MANIPULATION: &str = "format_manipulation";
pub const CATEGORY_BOUNDARY_VIOLATION: &str = "boundary_violation";
pub const CATEGORY_SUSPICIOUS: &str = "suspicious";
/// Category for the length, repetition and character-class heuristics.
pub const CATEGORY_STRUCTURAL: &str = "structural";

/// The built-in table.
pub const DEFAULT_PATTERNS: &[PatternSpec] = &[
    // override
    PatternSpec::new(
        r"(?i)\b(?:ignore|disregard|forget|skip|override)\s+(?:all\s+|any\s+|the\s+|your\s+)*(?:previous|prior|above|earlier|preceding|former)\s+(?:instructions?|directives?|prompts?|rules|commands?|context)",
        Severity::Critical,
        CATEGORY_OVERRIDE,
        "instruction to ignore previous instructions",
    ),
    PatternSpec::new(
        r"(?i)\b(?:ignore|disregard|forget)\s+(?:everything|all)\s+(?:you\s+(?:were|have\s+been)|that\s+was)\s+(?:told|given|instructed)",
        Severity::High,
        CATEGORY_OVERRIDE,
        "instruction to forget prior guidance",
    ),
    PatternSpec::new(
        r"(?i)\b(?:new|updated|revised)\s+(?:system\s+)?instructions?\s*:",
        Severity::High,
        CATEGORY_OVERRIDE,
        "replacement instruction block",
    ),
    // role_confusion
    PatternSpec::new(
        r"(?i)\byou\s+are\s+now\s+(?:a\s+|an\s+|the\s+)?(?:new\s+|different\s+)?(?:assistant|ai|bot|model|persona|character|agent)\b",
        Severity::High,
        CATEGORY_ROLE_CONFUSION,
        "attempt to reassign the assistant's role",
    ),
    PatternSpec::new(
        r"(?i)\b(?:act|behave|pretend|roleplay)\s+(?:as|like)\s+(?:if\s+you\s+(?:are|were)\s+)?(?:a|an)\s+(?:different|new|unrestricted|unfiltered|evil)\b",
        Severity::High,
        CATEGORY_ROLE_CONFUSION,
        "request to adopt an unrestricted persona",
    ),
    PatternSpec::new(
        r"(?im)^\s*(?:system|assistant)\s*:",
        Severity::Medium,
        CATEGORY_ROLE_CONFUSION,
        "forged conversation role label",
    ),
    // extraction
    PatternSpec::new(
        r"(?i)\b(?:show|reveal|print|display|repeat|output|tell|leak)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|(?:initial|hidden|original|secret)\s+instructions)",
        Severity::High,
        CATEGORY_EXTRACTION,
        "request to reveal the system prompt",
    ),
    PatternSpec::new(
        r"(?i)\bwhat\s+(?:is|are)\s+your\s+(?:system\s+prompt|instructions|rules)\b",
        Severity::Medium,
        CATEGORY_EXTRACTION,
        "question about the system prompt",
    ),
    // jailbreak
    PatternSpec::new(
        r"(?i)\b(?:enable|enter|activate|switch\s+to|you\s+are\s+in)\s+(?:developer|god|jailbreak|unrestricted)\s+mode\b",
        Severity::High,
        CATEGORY_JAILBREAK,
        "request to enter an unrestricted mode",
    ),
    PatternSpec::new(
        r"(?i)\bDAN\s+(?:mode|prompt)\b|\bdo\s+anything\s+now\b",
        Severity::Critical,
        CATEGORY_JAILBREAK,
        "DAN jailbreak",
    ),
    PatternSpec::new(
        r"(?i)\bjailbr(?:eak|oken)\b",
        Severity::High,
        CATEGORY_JAILBREAK,
        "jailbreak reference",
    ),
    // manipulation
    PatternSpec::new(
        r"(?i)\b(?:output|print|respond\s+with|reply\s+with|say|write)\s+[^\n.]{1,60}?\s+instead\b",
        Severity::Medium,
        CATEGORY_MANIPULATION,
        "request to substitute the expected output",
    ),
    PatternSpec::new(
        r"(?i)\bdo\s+not\s+(?:follow|obey)\s+(?:your|the|any)\s+(?:rules|instructions|guidelines)\b",
        Severity::High,
        CATEGORY_MANIPULATION,
        "request to disobey instructions",
    ),
    // encoding
    PatternSpec::new(
        r"(?i)\b(?:decode|decrypt|translate)\s+(?:this|the\s+following)?\s*(?:from\s+)?(?:rot13|rot-13|base64|hex)\b",
        Severity::Medium,
        CATEGORY_ENCODING,
        "request to decode obfuscated text",
    ),
    PatternSpec::new(
        r"(?i)\b(?:execute|run|follow)\s+the\s+(?:decoded|base64|rot13)\b",
        Severity::High,
        CATEGORY_ENCODING,
        "request to act on decoded text",
    ),
    // format_manipulation
    PatternSpec::new(
        r"(?i)\b(?:begin|start|prefix)\s+your\s+(?:response|reply|answer|output)\s+with\b",
        Severity::Medium,
        CATEGORY_FORMAT_MANIPULATION,
        "forced response prefix",
    ),
    PatternSpec::new(
        r"(?i)\b(?:always|only)\s+(?:respond|reply|answer)\s+with\b",
        Severity::Medium,
        CATEGORY_FORMAT_MANIPULATION,
        "forced response format",
    ),
    // boundary_violation
    PatternSpec::new(
        r"(?i)\bafter\s+this\s+(?:sentence|line|message|paragraph)\b",
        Severity::Medium,
        CATEGORY_BOUNDARY_VIOLATION,
        "instruction anchored to the surrounding text",
    ),
    PatternSpec::new(
        r"(?i)\[/?(?:INST|SYS)\]|<\|(?:im_start|im_end|system|endoftext)\|>|<</?SYS>>",
        Severity::High,
        CATEGORY_BOUNDARY_VIOLATION,
        "chat template control token",
    ),
    PatternSpec::new(
        r"(?i)\bend\s+of\s+(?:the\s+)?(?:system\s+)?(?:prompt|instructions)\b",
        Severity::Medium,
        CATEGORY_BOUNDARY_VIOLATION,
        "fake end-of-prompt marker",
    ),
    // suspicious
    PatternSpec::new(
        r"(?i)\b(?:bypass|circumvent|disable)\s+(?:the\s+|your\s+)?(?:safety|security|content)\s*(?:filters?|checks?|guardrails?|restrictions?)?\b",
        Severity::Low,
        CATEGORY_SUSPICIOUS,
        "safety bypass wording",
    ),
    PatternSpec::new(
        r"(?i)\b(?:unrestricted|unfiltered|uncensored)\b",
        Severity::Low,
        CATEGORY_SUSPICIOUS,
        "unrestricted-behaviour wording",
    ),
];
