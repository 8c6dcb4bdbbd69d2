use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRelationship {
    Boss,
    Client,
    Vendor,
    Colleague,
    Personal,
}

impl SenderRelationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRelationship::Boss => "boss",
            SenderRelationship::Client => "client",
            SenderRelationship::Vendor => "vendor",
            SenderRelationship::Colleague => "colleague",
            SenderRelationship::Personal => "personal",
        }
    }

    /// Tone instruction used when drafting a reply to this sender
    pub fn tone_guide(&self) -> &'static str {
        match self {
            SenderRelationship::Boss => {
                "Be respectful and concise, and acknowledge their authority."
            }
            SenderRelationship::Client => {
                "Be customer-service oriented: helpful, polite and solution-focused."
            }
            SenderRelationship::Colleague => "Be professional but friendly.",
            SenderRelationship::Vendor => "Be transactional and to the point.",
            SenderRelationship::Personal => "Be casual and warm.",
        }
    }
}

impl fmt::Display for SenderRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SENIOR_TITLES: &[&str] = &["ceo", "president", "director"];
const MANAGER_TITLES: &[&str] = &["manager", "supervisor", "lead"];
const CLIENT_MARKERS: &[&str] = &["client", "customer"];
const VENDOR_MARKERS: &[&str] = &["vendor", "supplier", "sales"];
const PERSONAL_DOMAINS: &[&str] = &["gmail.com", "yahoo.com", "hotmail.com"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a sender. Checks run in a fixed order and the first hit wins, so
/// `director.client@company.com` is a boss, not a client.
pub fn classify(from_address: &str, from_name: Option<&str>) -> SenderRelationship {
    let address = from_address.to_lowercase();
    let combined = format!("{} {}", address, from_name.unwrap_or("").to_lowercase());

    if contains_any(&combined, SENIOR_TITLES) || contains_any(&combined, MANAGER_TITLES) {
        SenderRelationship::Boss
    } else if contains_any(&address, CLIENT_MARKERS) {
        SenderRelationship::Client
    } else if contains_any(&address, VENDOR_MARKERS) {
        SenderRelationship::Vendor
    } else if contains_any(&address, PERSONAL_DOMAINS) {
        SenderRelationship::Personal
    } else {
        SenderRelationship::Colleague
    }
}

/// Split a `"Name <address>"` sender into address and optional display name.
/// A bare address comes back with no name.
pub fn parse_sender(sender: &str) -> (String, Option<String>) {
    let sender = sender.trim();
    if let (Some(open), Some(close)) = (sender.rfind('<'), sender.rfind('>')) {
        if close > open {
            let address = sender[open + 1..close].trim().to_string();
            let name = sender[..open].trim().trim_matches('"').trim();
            let name = (!name.is_empty()).then(|| name.to_string());
            return (address, name);
        }
    }
    (sender.to_string(), None)
}

/// Classify straight from a free-form sender string
pub fn classify_sender(sender: &str) -> SenderRelationship {
    let (address, name) = parse_sender(sender);
    classify(&address, name.as_deref())
}
