//! Notification payloads.
//!
//! Workflow outcomes are reported as MessageCard documents posted to a
//! webhook. The core only builds the payload; delivery belongs to the
//! notification sender in the engine crate.

use serde_json::{json, Value};

/// Default card image (the GitHub mark).
const DEFAULT_IMAGE: &str =
    "https://github.githubassets.com/images/modules/logos_page/GitHub-Mark.png";

/// A structured outcome notification.
#[derive(Debug, Clone)]
pub struct MessageCard {
    pub success: bool,
    pub summary: String,
    pub message: String,
    pub repo: String,
    pub facts: Vec<(String, String)>,
    pub action_links: Vec<(String, String)>,
    pub image: String,
}

impl MessageCard {
    /// A card with the default image and no facts or links.
    pub fn new(success: bool, summary: impl Into<String>, repo: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            success,
            message: summary.clone(),
            summary,
            repo: repo.into(),
            facts: Vec::new(),
            action_links: Vec::new(),
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    /// Replace the card body message (defaults to the summary).
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append a fact row.
    pub fn fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.push((name.into(), value.into()));
        self
    }

    /// Append an action link.
    pub fn action_link(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.action_links.push((name.into(), url.into()));
        self
    }

    /// Replace the card image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Render to the MessageCard JSON schema.
    pub fn to_json(&self) -> Value {
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": if self.success { "4ACF3E" } else { "D63215" },
            "summary": self.summary,
            "sections": [{
                "activityTitle": self.message,
                "activitySubtitle": self.repo,
                "activityImage": self.image,
                "facts": self.facts.iter()
                    .map(|(name, value)| json!({"name": name, "value": value}))
                    .collect::<Vec<_>>(),
                "markdown": true,
            }],
            "potentialAction": self.action_links.iter()
                .map(|(name, url)| json!({
                    "@type": "OpenUri",
                    "name": name,
                    "targets": [{"os": "default", "uri": url}],
                }))
                .collect::<Vec<_>>(),
        })
    }
}
