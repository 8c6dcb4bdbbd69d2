use crate::analysis::AiAnalysis;
use crate::classifier::Category;
use crate::config;
use crate::providers::EmailRecord;
use crate::urgency::UrgencyLevel;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// What `scan` remembers about an email once it has been analyzed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAnalysis {
    pub email_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    pub category: Category,
    pub urgency_score: u8,
    pub urgency_level: UrgencyLevel,
    pub needs_response: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct AnalysisStore {
    analyses: HashMap<String, StoredAnalysis>,
    #[serde(skip)]
    path: PathBuf,
}

impl AnalysisStore {
    pub fn load() -> Result<Self> {
        Self::load_from(&config::analyses_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut store = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        store.path = path.to_path_buf();
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    /// Record (or replace) the analysis of one email
    pub fn store(&mut self, email: &EmailRecord, analysis: &AiAnalysis) {
        self.analyses.insert(
            email.id.clone(),
            StoredAnalysis {
                email_id: email.id.clone(),
                from: email.sender.clone(),
                subject: email.subject().to_string(),
                category: analysis.category,
                urgency_score: analysis.urgency_score(),
                urgency_level: analysis.urgency_level(),
                needs_response: analysis.needs_response(),
                timestamp: analysis.processed_at,
            },
        );
    }

    /// Emails still waiting on a reply, most urgent first
    pub fn needs_response(&self) -> Vec<&StoredAnalysis> {
        let mut pending: Vec<_> = self.analyses.values().filter(|a| a.needs_response).collect();
        pending.sort_by(|a, b| {
            b.urgency_score
                .cmp(&a.urgency_score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::{BlendedUrgency, ScoreProvider};
    use crate::classifier::CategoryResult;
    use crate::relationship::SenderRelationship;
    use crate::urgency::{UrgencyFactorTable, UrgencyScore};

    fn email(id: &str, subject: &str) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            subject: Some(subject.to_string()),
            sender: "carol@client.com".to_string(),
            recipient: None,
            body_snippet: String::new(),
            full_body: None,
            received_at: None,
        }
    }

    fn analysis(category: Category, score: i64) -> AiAnalysis {
        let urgency = BlendedUrgency {
            urgency: UrgencyScore::new(score),
            provider: ScoreProvider::RuleBased,
            rule: UrgencyFactorTable::default().score("", "", ""),
            ai_score: None,
            ai_reasoning: None,
        };
        let category = CategoryResult {
            category,
            confidence: 0.7,
            reasoning: String::new(),
            overridden: false,
        };
        AiAnalysis::new(category, &urgency, SenderRelationship::Client)
    }

    #[test]
    fn test_store_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("analyses.json");

        let mut store = AnalysisStore::load_from(&path).unwrap();
        assert!(store.is_empty());
        store.store(&email("a", "Invoice #12"), &analysis(Category::Invoice, 2));
        store.save().unwrap();

        let reloaded = AnalysisStore::load_from(&path).unwrap();
        let stored = &reloaded.analyses["a"];
        assert_eq!(stored.subject, "Invoice #12");
        assert_eq!(stored.from, "carol@client.com");
        assert_eq!(stored.category, Category::Invoice);
        assert_eq!(stored.urgency_level, UrgencyLevel::Low);
        assert!(!stored.needs_response);
    }

    #[test]
    fn test_needs_response_sorted_by_urgency() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AnalysisStore::load_from(&dir.path().join("analyses.json")).unwrap();
        store.store(&email("low", "Lunch?"), &analysis(Category::Personal, 1));
        store.store(&email("spam", "Win big"), &analysis(Category::Spam, 0));
        store.store(&email("high", "Server down"), &analysis(Category::Work, 9));

        let ids: Vec<&str> = store.needs_response().iter().map(|a| a.email_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_restore_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AnalysisStore::load_from(&dir.path().join("analyses.json")).unwrap();
        store.store(&email("a", "Ping"), &analysis(Category::Work, 2));
        store.store(&email("a", "Ping"), &analysis(Category::Spam, 0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.analyses["a"].category, Category::Spam);
    }
}
