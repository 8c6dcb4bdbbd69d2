use crate::config;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Scores at or above this are flagged urgent
pub const URGENT_THRESHOLD: u8 = 7;
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            8.. => UrgencyLevel::Critical,
            6..=7 => UrgencyLevel::High,
            4..=5 => UrgencyLevel::Medium,
            _ => UrgencyLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Critical => "critical",
        }
    }

    pub fn is_pressing(&self) -> bool {
        matches!(self, UrgencyLevel::High | UrgencyLevel::Critical)
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A score in [0, 10] together with everything derived from it.
///
/// Fields are private so level and urgency can only come from `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgencyScore {
    score: u8,
    level: UrgencyLevel,
    is_urgent: bool,
}

impl UrgencyScore {
    pub fn new(score: i64) -> Self {
        let score = score.clamp(0, MAX_SCORE as i64) as u8;
        Self {
            score,
            level: UrgencyLevel::from_score(score),
            is_urgent: score >= URGENT_THRESHOLD,
        }
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn level(&self) -> UrgencyLevel {
        self.level
    }

    pub fn is_urgent(&self) -> bool {
        self.is_urgent
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub phrase: String,
    pub weight: i32,
}

impl Keyword {
    fn new(phrase: &str, weight: i32) -> Self {
        Self {
            phrase: phrase.to_string(),
            weight,
        }
    }
}

/// Weighted keyword configuration. Matching is a case-insensitive substring
/// test, so "boss" also hits "bosses".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrgencyFactorTable {
    #[serde(default)]
    pub temporal: Vec<Keyword>,
    #[serde(default)]
    pub escalation: Vec<Keyword>,
    #[serde(default)]
    pub consequence: Vec<Keyword>,
    /// Matched against the sender, not the message text
    #[serde(default)]
    pub authority: Vec<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgencyAnalysis {
    #[serde(flatten)]
    pub urgency: UrgencyScore,
    pub factors: Vec<String>,
    pub reasoning: String,
}

impl UrgencyAnalysis {
    pub fn score(&self) -> u8 {
        self.urgency.score()
    }

    pub fn level(&self) -> UrgencyLevel {
        self.urgency.level()
    }

    pub fn is_urgent(&self) -> bool {
        self.urgency.is_urgent()
    }
}

fn keywords(entries: &[(&str, i32)]) -> Vec<Keyword> {
    entries.iter().map(|(p, w)| Keyword::new(p, *w)).collect()
}

impl Default for UrgencyFactorTable {
    fn default() -> Self {
        Self {
            temporal: keywords(&[
                ("urgent", 3),
                ("asap", 3),
                ("immediately", 3),
                ("right away", 2),
                ("overdue", 3),
                ("deadline", 2),
                ("today", 2),
                ("tonight", 2),
                ("end of day", 2),
                ("eod", 2),
                ("time sensitive", 2),
                ("time-sensitive", 2),
                ("tomorrow", 1),
                ("this week", 1),
                ("no rush", -2),
                ("whenever", -1),
            ]),
            escalation: keywords(&[
                ("emergency", 4),
                ("critical", 3),
                ("final notice", 3),
                ("escalat", 2),
                ("second request", 2),
                ("priority", 2),
                ("important", 1),
                ("follow up", 1),
                ("reminder", 1),
                ("fyi", -1),
            ]),
            consequence: keywords(&[
                ("outage", 3),
                ("breach", 3),
                ("lawsuit", 3),
                ("suspend", 3),
                ("terminat", 3),
                ("penalty", 2),
                ("legal", 2),
                ("expire", 2),
                ("fail", 2),
                ("lose", 1),
                ("cancel", 1),
                ("no action required", -2),
                ("unsubscribe", -3),
            ]),
            authority: keywords(&[
                ("ceo", 3),
                ("president", 2),
                ("director", 2),
                ("vp", 2),
                ("boss", 2),
                ("manager", 1),
                ("legal", 1),
                ("noreply", -1),
                ("no-reply", -1),
                ("newsletter", -2),
                ("marketing", -1),
            ]),
        }
    }
}

impl UrgencyFactorTable {
    /// Load the table from `urgency.json` in the config dir, falling back to
    /// the built-in weights when the file is absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&config::urgency_table_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse urgency table {}", path.display()))
    }

    /// Rule-based urgency score. Total over any input; empty strings score 0.
    pub fn score(&self, subject: &str, sender: &str, snippet: &str) -> UrgencyAnalysis {
        let text = format!("{} {}", subject, snippet).to_lowercase();
        let from_text = sender.to_lowercase();

        let mut total: i64 = 0;
        let mut factors = Vec::new();

        let text_classes = [&self.temporal, &self.escalation, &self.consequence];
        for class in text_classes {
            apply_class(class, &text, &mut total, &mut factors);
        }
        apply_class(&self.authority, &from_text, &mut total, &mut factors);

        for (label, bonus, hit) in compound_bonuses(&text) {
            if hit {
                total += bonus;
                factors.push(format!("{} (+{})", label, bonus));
            }
        }

        let reasoning = if factors.is_empty() {
            "No urgency indicators found".to_string()
        } else {
            factors.join(", ")
        };

        UrgencyAnalysis {
            urgency: UrgencyScore::new(total),
            factors,
            reasoning,
        }
    }
}

fn apply_class(class: &[Keyword], haystack: &str, total: &mut i64, factors: &mut Vec<String>) {
    for keyword in class {
        let phrase = keyword.phrase.to_lowercase();
        if !phrase.is_empty() && haystack.contains(&phrase) {
            *total += keyword.weight as i64;
            factors.push(format!("{} ({:+})", keyword.phrase, keyword.weight));
        }
    }
}

fn compound_bonuses(text: &str) -> [(&'static str, i64, bool); 3] {
    [
        (
            "same-day meeting",
            2,
            text.contains("meeting") && text.contains("today"),
        ),
        (
            "client waiting or upset",
            3,
            text.contains("client") && (text.contains("waiting") || text.contains("upset")),
        ),
        (
            "system issue",
            4,
            text.contains("system") && (text.contains("down") || text.contains("error")),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> UrgencyFactorTable {
        UrgencyFactorTable::default()
    }

    #[test]
    fn test_empty_input_scores_zero() {
        let result = table().score("", "", "");
        assert_eq!(result.score(), 0);
        assert_eq!(result.level(), UrgencyLevel::Low);
        assert!(!result.is_urgent());
        assert!(result.factors.is_empty());
        assert_eq!(result.reasoning, "No urgency indicators found");
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let t = table();
        let a = t.score("URGENT: deadline today", "ceo@corp.com", "Need this ASAP");
        let b = t.score("URGENT: deadline today", "ceo@corp.com", "Need this ASAP");
        assert_eq!(a, b);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(UrgencyLevel::from_score(0), UrgencyLevel::Low);
        assert_eq!(UrgencyLevel::from_score(3), UrgencyLevel::Low);
        assert_eq!(UrgencyLevel::from_score(4), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::from_score(6), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_score(7), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::from_score(8), UrgencyLevel::Critical);
        assert_eq!(UrgencyLevel::from_score(10), UrgencyLevel::Critical);
    }

    #[test]
    fn test_urgency_score_is_clamped() {
        let high = UrgencyScore::new(42);
        assert_eq!(high.score(), 10);
        assert_eq!(high.level(), UrgencyLevel::Critical);
        assert!(high.is_urgent());

        let low = UrgencyScore::new(-5);
        assert_eq!(low.score(), 0);
        assert_eq!(low.level(), UrgencyLevel::Low);

        assert!(UrgencyScore::new(7).is_urgent());
        assert!(!UrgencyScore::new(6).is_urgent());
    }

    #[test]
    fn test_text_keywords_add_weights_and_factors() {
        let result = table().score("Deadline reminder", "alice@corp.com", "");
        assert_eq!(result.score(), 3);
        assert_eq!(result.factors, vec!["deadline (+2)", "reminder (+1)"]);
        assert_eq!(result.reasoning, "deadline (+2), reminder (+1)");
    }

    #[test]
    fn test_authority_matches_sender_only() {
        let t = table();
        let in_sender = t.score("Hello", "The Bosses <team@corp.com>", "");
        assert_eq!(in_sender.score(), 2);
        assert_eq!(in_sender.factors, vec!["boss (+2)"]);

        let in_body = t.score("Hello", "alice@corp.com", "my boss says hi");
        assert_eq!(in_body.score(), 0);
    }

    #[test]
    fn test_compound_bonuses() {
        let t = table();
        let meeting = t.score("Meeting", "a@corp.com", "are we still on");
        let same_day = t.score("Meeting", "a@corp.com", "are we still on today");
        // "today" (+2) plus same-day meeting bonus (+2)
        assert_eq!(same_day.score() - meeting.score(), 4);
        assert!(same_day.factors.contains(&"same-day meeting (+2)".to_string()));

        let client = t.score("Client waiting on us", "a@corp.com", "");
        assert!(client.factors.contains(&"client waiting or upset (+3)".to_string()));

        let outage = t.score("System down", "a@corp.com", "");
        assert_eq!(outage.score(), 4);
        assert_eq!(outage.factors, vec!["system issue (+4)"]);
    }

    #[test]
    fn test_negative_weights_never_go_below_zero() {
        let result = table().score(
            "Weekly newsletter",
            "newsletter@shop.com",
            "no rush, click unsubscribe anytime",
        );
        assert_eq!(result.score(), 0);
        assert!(result.factors.iter().any(|f| f == "unsubscribe (-3)"));
    }

    #[test]
    fn test_critical_email() {
        let result = table().score(
            "URGENT: system down, client waiting",
            "CEO <ceo@corp.com>",
            "Emergency - need a fix immediately",
        );
        assert_eq!(result.score(), 10);
        assert_eq!(result.level(), UrgencyLevel::Critical);
        assert!(result.is_urgent());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = UrgencyFactorTable::load_from(&dir.path().join("urgency.json")).unwrap();
        assert_eq!(loaded, UrgencyFactorTable::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urgency.json");
        fs::write(
            &path,
            r#"{"temporal": [{"phrase": "Pronto", "weight": 5}]}"#,
        )
        .unwrap();

        let loaded = UrgencyFactorTable::load_from(&path).unwrap();
        assert!(loaded.authority.is_empty());
        let result = loaded.score("Need it PRONTO", "", "");
        assert_eq!(result.score(), 5);
        assert_eq!(result.factors, vec!["Pronto (+5)"]);
    }
}
