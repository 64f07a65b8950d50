use std::future::Future;

use serde::Deserialize;
use tracing::{error, warn};

pub const FALLBACK_CATEGORY: &str = "Motivation";
pub const DEFAULT_TEXT: &str = "Have a great day!";
pub const DEFAULT_REFERENCE: &str = "Daily Phrases";
pub const NOTIFICATION_TITLE: &str = "Phrase of the Day";
const DEEP_LINK_BASE: &str = "dailyphrases://phrase";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct NotificationPhrase {
    pub text: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub category: String,
}

impl NotificationPhrase {
    pub fn fallback() -> Self {
        Self {
            text: DEFAULT_TEXT.to_string(),
            reference: DEFAULT_REFERENCE.to_string(),
            category: FALLBACK_CATEGORY.to_string(),
        }
    }

    pub fn body(&self) -> String {
        let reference = self.reference.trim();
        if reference.is_empty() {
            format!("\"{}\"", self.text)
        } else {
            format!("\"{}\"\n\n- {}", self.text, reference)
        }
    }

    /// Link the toast opens, carrying the phrase back into the app.
    pub fn deep_link(&self) -> String {
        match reqwest::Url::parse_with_params(
            DEEP_LINK_BASE,
            &[
                ("text", self.text.as_str()),
                ("reference", self.reference.as_str()),
                ("category", self.category.as_str()),
            ],
        ) {
            Ok(url) => url.to_string(),
            Err(_) => DEEP_LINK_BASE.to_string(),
        }
    }
}

/// Categories tried in order: the requested one (if any), then the fallback category.
pub fn categories_to_try(category: &str) -> Vec<&str> {
    let category = category.trim();
    if category.is_empty() || category == FALLBACK_CATEGORY {
        vec![FALLBACK_CATEGORY]
    } else {
        vec![category, FALLBACK_CATEGORY]
    }
}

/// Walks [`categories_to_try`] and settles on the default phrase if every lookup fails or
/// comes back empty.
pub async fn pick_phrase<F, Fut>(category: &str, mut fetch: F) -> NotificationPhrase
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<NotificationPhrase>>>,
{
    for c in categories_to_try(category) {
        match fetch(c.to_string()).await {
            Ok(Some(p)) if !p.text.trim().is_empty() => return p,
            Ok(_) => warn!("no phrase available in '{c}'"),
            Err(e) => error!("phrase lookup for '{c}' failed: {e}"),
        }
    }
    NotificationPhrase::fallback()
}
