use crate::analysis::{AiAnalysis, Analyzer};
use crate::classifier::Category;
use crate::providers::EmailRecord;
use crate::urgency::UrgencyLevel;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Most emails handled in one batch call; the rest are left untouched
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub generate_responses: bool,
}

/// Tallies over the successfully analyzed emails of one batch. Failed items
/// are only counted in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalytics {
    pub total: usize,
    pub categories: BTreeMap<Category, usize>,
    pub urgency_levels: BTreeMap<UrgencyLevel, usize>,
    pub needs_response_count: usize,
    pub failed: usize,
}

impl BatchAnalytics {
    fn record(&mut self, analysis: &AiAnalysis) {
        self.total += 1;
        *self.categories.entry(analysis.category).or_default() += 1;
        *self.urgency_levels.entry(analysis.urgency_level()).or_default() += 1;
        if analysis.needs_response() {
            self.needs_response_count += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Complete(Box<AiAnalysis>),
    Failed { error: String },
}

impl AnalysisOutcome {
    pub fn analysis(&self) -> Option<&AiAnalysis> {
        match self {
            AnalysisOutcome::Complete(analysis) => Some(analysis),
            AnalysisOutcome::Failed { .. } => None,
        }
    }
}

impl From<Result<AiAnalysis>> for AnalysisOutcome {
    fn from(result: Result<AiAnalysis>) -> Self {
        match result {
            Ok(analysis) => AnalysisOutcome::Complete(Box::new(analysis)),
            Err(_) => AnalysisOutcome::Failed {
                error: "Processing failed".to_string(),
            },
        }
    }
}

/// An email with its analysis attached
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEmail {
    #[serde(flatten)]
    pub email: EmailRecord,
    pub ai_analysis: AnalysisOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Emails submitted, including any beyond the batch limit
    pub received: usize,
    pub processed: Vec<ProcessedEmail>,
    pub analytics: BatchAnalytics,
}

/// Analyze emails one after another, in input order. A failing email is
/// marked as failed and the batch carries on.
pub async fn process_batch(analyzer: &Analyzer, emails: Vec<EmailRecord>, options: BatchOptions) -> BatchResult {
    let received = emails.len();
    if received > MAX_BATCH_SIZE {
        info!(received, limit = MAX_BATCH_SIZE, "batch truncated");
    }

    let mut results: Vec<(EmailRecord, Result<AiAnalysis>)> = Vec::new();
    for email in emails.into_iter().take(MAX_BATCH_SIZE) {
        let result = analyzer.analyze(&email, options.generate_responses).await;
        if let Err(e) = &result {
            warn!(email_id = %email.id, "failed to process email: {:#}", e);
        }
        results.push((email, result));
    }

    let mut analytics = BatchAnalytics::default();
    for (_, result) in &results {
        match result {
            Ok(analysis) => analytics.record(analysis),
            Err(_) => analytics.failed += 1,
        }
    }

    info!(
        processed = results.len(),
        failed = analytics.failed,
        "batch complete"
    );

    BatchResult {
        received,
        processed: results
            .into_iter()
            .map(|(email, result)| ProcessedEmail {
                email,
                ai_analysis: result.into(),
            })
            .collect(),
        analytics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;
    use crate::llm::LlmError;
    use crate::urgency::UrgencyFactorTable;
    use std::sync::Arc;

    const WORK_REPLY: &str = r#"{"category": "work", "confidence": 0.8, "reasoning": "Routine", "score": 2}"#;

    fn analyzer(generator: ScriptedGenerator) -> Analyzer {
        Analyzer::new(Arc::new(generator), Arc::new(UrgencyFactorTable::default()), 0.6)
    }

    fn email(id: &str, subject: &str) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            subject: Some(subject.to_string()),
            sender: "bob@corp.com".to_string(),
            recipient: None,
            body_snippet: "see below".to_string(),
            full_body: None,
            received_at: None,
        }
    }

    /// Fails whenever the prompt mentions BROKEN
    fn flaky() -> ScriptedGenerator {
        ScriptedGenerator::new(|req| {
            if req.prompt.contains("BROKEN") {
                Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(WORK_REPLY.to_string())
            }
        })
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_batch() {
        let analyzer = analyzer(flaky());
        let emails = vec![
            email("1", "Weekly report"),
            email("2", "BROKEN message"),
            email("3", "Lunch plans"),
        ];

        let result = process_batch(&analyzer, emails, BatchOptions::default()).await;

        assert_eq!(result.received, 3);
        assert_eq!(result.processed.len(), 3);
        let ids: Vec<&str> = result.processed.iter().map(|p| p.email.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        assert!(result.processed[0].ai_analysis.analysis().is_some());
        assert!(result.processed[1].ai_analysis.analysis().is_none());
        assert!(result.processed[2].ai_analysis.analysis().is_some());

        assert_eq!(result.analytics.total, 2);
        assert_eq!(result.analytics.failed, 1);
        assert_eq!(result.analytics.categories.get(&Category::Work), Some(&2));
        assert_eq!(result.analytics.urgency_levels.values().sum::<usize>(), 2);
        assert_eq!(result.analytics.needs_response_count, 2);

        let json = serde_json::to_value(&result.processed[1]).unwrap();
        assert_eq!(json["aiAnalysis"]["error"], "Processing failed");
        assert_eq!(json["id"], "2");
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let generator = Arc::new(ScriptedGenerator::replying(WORK_REPLY));
        let analyzer = Analyzer::new(generator.clone(), Arc::new(UrgencyFactorTable::default()), 0.6);
        let emails: Vec<_> = (0..15).map(|i| email(&i.to_string(), "Status")).collect();

        let result = process_batch(&analyzer, emails, BatchOptions::default()).await;

        assert_eq!(result.received, 15);
        assert_eq!(result.processed.len(), MAX_BATCH_SIZE);
        assert_eq!(result.analytics.total, MAX_BATCH_SIZE);
        assert_eq!(result.processed.last().unwrap().email.id, "9");
        // category + urgency call per email
        assert_eq!(generator.calls(), 2 * MAX_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_analytics_tallies() {
        let analyzer = analyzer(ScriptedGenerator::new(|req| {
            if req.prompt.contains("newsletter digest") && req.prompt.contains("Categorize") {
                Ok(r#"{"category": "newsletter", "confidence": 0.9}"#.to_string())
            } else if req.prompt.contains("Rate the urgency") {
                Ok("0".to_string())
            } else {
                Ok(WORK_REPLY.to_string())
            }
        }));
        let emails = vec![
            email("1", "Your newsletter digest"),
            email("2", "URGENT: system down, fix immediately"),
            email("3", "Notes"),
        ];

        let result = process_batch(&analyzer, emails, BatchOptions::default()).await;
        let analytics = result.analytics;

        assert_eq!(analytics.total, 3);
        assert_eq!(analytics.categories.get(&Category::Newsletter), Some(&1));
        // keyword score 10 forces urgent even though the model said work
        assert_eq!(analytics.categories.get(&Category::Urgent), Some(&1));
        assert_eq!(analytics.categories.get(&Category::Work), Some(&1));
        // newsletter is the only one nobody needs to answer
        assert_eq!(analytics.needs_response_count, 2);

        let json = serde_json::to_value(&analytics).unwrap();
        assert_eq!(json["categories"]["newsletter"], 1);
        assert!(json["urgencyLevels"].is_object());
        assert_eq!(json["needsResponseCount"], 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let analyzer = analyzer(ScriptedGenerator::failing());
        let result = process_batch(&analyzer, Vec::new(), BatchOptions::default()).await;
        assert!(result.processed.is_empty());
        assert_eq!(result.analytics, BatchAnalytics::default());
    }
}
