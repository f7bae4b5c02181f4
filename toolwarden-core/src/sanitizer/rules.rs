//! Deterministic prompt-injection rules.
//!
//! Used whenever the model classifier is unconfigured, errors, or misses
//! its deadline. Rules are compiled once; evaluation is synchronous and
//! allocation-light so it can run on the request path.

use regex::Regex;

use super::{Classification, Classifier, ClassifierError, VerdictLabel};

/// Score reported when no rule matches.
pub const BENIGN_SCORE: f32 = 0.1;

/// Phrases matched case-insensitively as plain substrings.
const KNOWN_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "forget everything above",
    "new instructions:",
    "system prompt",
    "you are now",
    "pretend to be",
    "roleplay as",
    "list all functions",
    "function name",
    "mock using the example",
];

/// Confidence of a [`KNOWN_PHRASES`] hit.
const PHRASE_CONFIDENCE: f32 = 0.9;

/// Directive keywords per window that count as excessive.
const DIRECTIVE_THRESHOLD: usize = 4;
/// Directive density window, in characters.
const DIRECTIVE_WINDOW: usize = 500;
const DIRECTIVE_CONFIDENCE: f32 = 0.7;

struct RulePattern {
    name: &'static str,
    regex: Regex,
    confidence: f32,
}

const PATTERNS: &[(&str, &str, f32)] = &[
    (
        "ignore_instructions",
        r"(?i)(ignore\s+(all\s+)?(previous|prior|above|earlier|preceding)\s+(instructions|directives|rules|prompts|guidelines)|disregard\s+(all\s+)?(above|previous|prior|earlier))",
        0.95,
    ),
    (
        "instruction_override",
        r"(?i)(new\s+instructions?\s*:|updated\s+instructions?\s*:|override\s+(all\s+)?instructions|forget\s+(all\s+)?(previous|prior|your)\s+(instructions|rules|guidelines|training)|your\s+new\s+(instructions|rules|role|task)\s+(are|is)\s*:)",
        0.9,
    ),
    ("system_prompt_injection", r"(?m)^\s*(system|SYSTEM)\s*:", 0.8),
    (
        "important_directive",
        r"(?i)IMPORTANT\s*:\s*(you\s+(must|should|need\s+to|have\s+to|are\s+required)|from\s+now\s+on|override|instead\s+of|do\s+not|always|never|forget|ignore)",
        0.85,
    ),
    (
        "role_play_attack",
        r"(?i)(you\s+are\s+now|pretend\s+(to\s+be|you\s+are)|imagine\s+you\s+are|roleplay\s+as|behave\s+as\s+if|assume\s+the\s+(role|identity)\s+of|from\s+now\s+on\s+you\s+are)",
        0.85,
    ),
    (
        "delimiter_manipulation",
        r"(\[/?(SYSTEM|INTERNAL|ADMIN|INSTRUCTIONS?|PROMPT|ASSISTANT)\]|</?(system|internal|admin|instructions?|prompt|assistant)>|```\s*(system|prompt|instructions?))",
        0.9,
    ),
    (
        "unicode_direction_override",
        r"[\u{202A}\u{202B}\u{202C}\u{202D}\u{202E}\u{2066}\u{2067}\u{2068}\u{2069}]",
        0.95,
    ),
    (
        "html_script_injection",
        r"(?i)(<\s*script[\s>]|javascript\s*:|data\s*:\s*text/html)",
        0.95,
    ),
    (
        "tool_enumeration",
        r"(?i)((list|enumerate|reveal|print|show\s+me)\s+(all\s+|every\s+)?(of\s+)?(the\s+|your\s+)?(available\s+)?(tools|functions|commands)\b|every\s+(tool|function)\s+you\s+have\s+access\s+to)",
        0.85,
    ),
    (
        "unrelated_tool_invocation",
        r"(?i)(call|invoke|run|execute|use)\s+(the\s+)?(other|another|hidden|internal|unrelated|admin)\s+(tool|function)",
        0.85,
    ),
    (
        "code_execution",
        r"(eval\s*\(|exec\s*\(|__import__|subprocess|os\.system|shell\s*=\s*True)",
        0.9,
    ),
];

/// Rule-based injection classifier.
pub struct RuleClassifier {
    patterns: Vec<RulePattern>,
    directive: Regex,
}

impl RuleClassifier {
    /// Compile the rule set.
    ///
    /// # Errors
    ///
    /// Returns the regex error if a built-in pattern fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = PATTERNS
            .iter()
            .map(|&(name, pattern, confidence)| {
                Ok(RulePattern {
                    name,
                    regex: Regex::new(pattern)?,
                    confidence,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let directive =
            Regex::new(r"(?i)\b(do\s+not|don't|you\s+must|you\s+should|always|never)\b")?;

        Ok(Self {
            patterns,
            directive,
        })
    }

    /// Evaluate every rule and report the strongest match.
    pub fn evaluate(&self, text: &str) -> Classification {
        let mut best: Option<(&'static str, f32)> = None;
        let mut consider = |name: &'static str, confidence: f32| {
            if best.is_none_or(|(_, c)| confidence > c) {
                best = Some((name, confidence));
            }
        };

        let lowered = text.to_lowercase();
        if KNOWN_PHRASES.iter().any(|p| lowered.contains(p)) {
            consider("known_phrase", PHRASE_CONFIDENCE);
        }

        for pattern in &self.patterns {
            if pattern.regex.is_match(text) {
                consider(pattern.name, pattern.confidence);
            }
        }

        if self.excessive_directives(text) {
            consider("directive_density", DIRECTIVE_CONFIDENCE);
        }

        match best {
            Some((name, score)) => Classification {
                label: VerdictLabel::Suspicious,
                score,
                matched: Some(name.to_string()),
            },
            None => Classification {
                label: VerdictLabel::Benign,
                score: BENIGN_SCORE,
                matched: None,
            },
        }
    }

    /// Whether any window of [`DIRECTIVE_WINDOW`] characters holds at least
    /// [`DIRECTIVE_THRESHOLD`] directive keywords.
    fn excessive_directives(&self, text: &str) -> bool {
        let starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        if starts.len() <= DIRECTIVE_WINDOW {
            return self.directive.find_iter(text).count() >= DIRECTIVE_THRESHOLD;
        }

        let step = DIRECTIVE_WINDOW / 4;
        let mut offset = 0;
        loop {
            let begin = starts[offset];
            let end = starts
                .get(offset + DIRECTIVE_WINDOW)
                .copied()
                .unwrap_or(text.len());
            if self.directive.find_iter(&text[begin..end]).count() >= DIRECTIVE_THRESHOLD {
                return true;
            }
            if offset + DIRECTIVE_WINDOW >= starts.len() {
                return false;
            }
            offset += step;
        }
    }
}

#[async_trait::async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        Ok(self.evaluate(text))
    }
}
