use crate::blend::{BlendedUrgency, ScoreProvider, UrgencyEstimator};
use crate::classifier::{Category, CategoryResult, Classifier};
use crate::llm::TextGenerator;
use crate::providers::EmailRecord;
use crate::relationship::{self, SenderRelationship};
use crate::responder::{GeneratedResponse, ResponseGenerator, ResponseRequest};
use crate::urgency::{UrgencyAnalysis, UrgencyFactorTable, UrgencyLevel, UrgencyScore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Everything learned about one email.
///
/// The urgency fields and `needs_response` are private: they only come out of
/// `AiAnalysis::new`, which derives them from a single score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    pub category: Category,
    pub category_confidence: f32,
    pub category_reasoning: String,
    urgency_score: u8,
    urgency_level: UrgencyLevel,
    is_urgent: bool,
    pub urgency_provider: ScoreProvider,
    pub relationship: SenderRelationship,
    needs_response: bool,
    pub factors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<GeneratedResponse>,
    pub processed_at: DateTime<Utc>,
}

impl AiAnalysis {
    pub fn new(category: CategoryResult, urgency: &BlendedUrgency, relationship: SenderRelationship) -> Self {
        let score: UrgencyScore = urgency.urgency;
        Self {
            needs_response: category.category.expects_reply() || score.is_urgent(),
            category: category.category,
            category_confidence: category.confidence.clamp(0.0, 1.0),
            category_reasoning: category.reasoning,
            urgency_score: score.score(),
            urgency_level: score.level(),
            is_urgent: score.is_urgent(),
            urgency_provider: urgency.provider,
            relationship,
            factors: urgency.rule.factors.clone(),
            suggested_response: None,
            processed_at: Utc::now(),
        }
    }

    pub fn urgency_score(&self) -> u8 {
        self.urgency_score
    }

    pub fn urgency_level(&self) -> UrgencyLevel {
        self.urgency_level
    }

    pub fn is_urgent(&self) -> bool {
        self.is_urgent
    }

    pub fn needs_response(&self) -> bool {
        self.needs_response
    }
}

/// Wires the scorer, classifier, estimator and reply generator to one
/// text-generation backend.
pub struct Analyzer {
    table: Arc<UrgencyFactorTable>,
    classifier: Classifier,
    estimator: UrgencyEstimator,
    responder: ResponseGenerator,
}

impl Analyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, table: Arc<UrgencyFactorTable>, ai_weight: f64) -> Self {
        Self {
            classifier: Classifier::new(generator.clone()),
            estimator: UrgencyEstimator::new(generator.clone(), table.clone()).with_ai_weight(ai_weight),
            responder: ResponseGenerator::new(generator),
            table,
        }
    }

    pub fn score(&self, email: &EmailRecord) -> UrgencyAnalysis {
        self.table
            .score(email.subject(), &email.sender, &email.body_snippet)
    }

    pub async fn categorize(&self, email: &EmailRecord) -> Result<(CategoryResult, UrgencyAnalysis)> {
        let urgency = self.score(email);
        let category = self.classifier.classify(email, &urgency).await?;
        Ok((category, urgency))
    }

    pub async fn estimate(&self, email: &EmailRecord) -> BlendedUrgency {
        self.estimator.estimate(email).await
    }

    pub async fn respond(&self, request: &ResponseRequest<'_>) -> GeneratedResponse {
        self.responder.generate(request).await
    }

    /// Full pipeline for one email. Only categorization can fail; urgency
    /// and replies degrade to their rule and template fallbacks.
    pub async fn analyze(&self, email: &EmailRecord, generate_response: bool) -> Result<AiAnalysis> {
        if !email.has_content() {
            anyhow::bail!("Email {} has no subject or snippet", email.id);
        }

        let relationship = relationship::classify_sender(&email.sender);
        let (category, rule) = self.categorize(email).await?;
        let urgency = self.estimator.estimate_with_rule(email, rule).await;
        let mut analysis = AiAnalysis::new(category, &urgency, relationship);

        if generate_response {
            let request = ResponseRequest {
                email,
                category: analysis.category,
                response_type: None,
                relationship,
                urgency: analysis.urgency_level(),
                custom_instructions: None,
            };
            analysis.suggested_response = Some(self.respond(&request).await);
        }

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;
    use crate::responder::{ResponseSource, ResponseType};

    const REPLY: &str = r#"{"category": "meeting", "confidence": 0.8, "reasoning": "Invite", "score": 4}"#;

    fn analyzer(generator: ScriptedGenerator) -> Analyzer {
        Analyzer::new(Arc::new(generator), Arc::new(UrgencyFactorTable::default()), 0.6)
    }

    fn email(subject: &str, sender: &str) -> EmailRecord {
        EmailRecord {
            id: "m1".to_string(),
            subject: Some(subject.to_string()),
            sender: sender.to_string(),
            recipient: None,
            body_snippet: String::new(),
            full_body: None,
            received_at: None,
        }
    }

    #[tokio::test]
    async fn test_analyze_combines_everything() {
        let analyzer = analyzer(ScriptedGenerator::replying(REPLY));
        let email = email("Team meeting tomorrow", "Director Dan <dan@corp.com>");

        let analysis = analyzer.analyze(&email, false).await.unwrap();
        assert_eq!(analysis.category, Category::Meeting);
        assert_eq!(analysis.relationship, SenderRelationship::Boss);
        assert_eq!(analysis.urgency_provider, ScoreProvider::Hybrid);
        // rule: "tomorrow" (+1), "director" (+2) = 3; round(4 * 0.6 + 3 * 0.4) = 4
        assert_eq!(analysis.urgency_score(), 4);
        assert_eq!(analysis.urgency_level(), UrgencyLevel::Medium);
        assert!(!analysis.is_urgent());
        assert!(analysis.needs_response());
        assert_eq!(analysis.factors, vec!["tomorrow (+1)", "director (+2)"]);
        assert!(analysis.suggested_response.is_none());
    }

    #[tokio::test]
    async fn test_analyze_with_response() {
        let analyzer = analyzer(ScriptedGenerator::new(|req| {
            if req.prompt.contains("Write a reply") {
                Err(crate::llm::LlmError::EmptyResponse)
            } else {
                Ok(REPLY.to_string())
            }
        }));
        let email = email("Team meeting tomorrow", "dan@corp.com");

        let analysis = analyzer.analyze(&email, true).await.unwrap();
        let response = analysis.suggested_response.unwrap();
        assert_eq!(response.source, ResponseSource::Template);
        assert_eq!(response.response_type, ResponseType::Accept);
    }

    #[tokio::test]
    async fn test_analyze_rejects_blank_email() {
        let generator = Arc::new(ScriptedGenerator::replying(REPLY));
        let analyzer = Analyzer::new(generator.clone(), Arc::new(UrgencyFactorTable::default()), 0.6);
        let email = email("", "dan@corp.com");

        assert!(analyzer.analyze(&email, false).await.is_err());
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn test_serialized_field_names() {
        let rule = UrgencyFactorTable::default().score("", "", "");
        let urgency = BlendedUrgency {
            urgency: UrgencyScore::new(8),
            provider: ScoreProvider::Hybrid,
            rule,
            ai_score: Some(9),
            ai_reasoning: None,
        };
        let category = CategoryResult {
            category: Category::Newsletter,
            confidence: 0.9,
            reasoning: "Digest".to_string(),
            overridden: false,
        };
        let analysis = AiAnalysis::new(category, &urgency, SenderRelationship::Vendor);
        let json = serde_json::to_value(&analysis).unwrap();

        assert_eq!(json["category"], "newsletter");
        assert_eq!(json["urgencyScore"], 8);
        assert_eq!(json["urgencyLevel"], "critical");
        assert_eq!(json["isUrgent"], true);
        // urgent overrides a category that would not normally need a reply
        assert_eq!(json["needsResponse"], true);
        assert_eq!(json["relationship"], "vendor");
        assert!(json.get("suggestedResponse").is_none());
    }
}
