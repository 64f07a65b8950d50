use crate::db::Phrase;

pub const SHARE_FOOTER: &str = "Shared via Daily Phrases";

/// Text handed to the platform share sheet. The explanation is only included once unlocked.
pub fn share_text(phrase: &Phrase, unlocked: bool) -> String {
    let mut out = format!("\"{}\"\n\n", phrase.text.trim());
    let reference = phrase.reference.trim();
    if !reference.is_empty() {
        out.push_str(reference);
        out.push_str("\n\n");
    }
    let explanation = phrase.explanation.trim();
    if unlocked && !explanation.is_empty() {
        out.push_str(explanation);
        out.push_str("\n\n");
    }
    out.push_str(SHARE_FOOTER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrase() -> Phrase {
        Phrase {
            id: 1,
            text: "Discipline is the bridge between goals and accomplishment.".to_string(),
            reference: "Jim Rohn".to_string(),
            category: "Motivation".to_string(),
            subcategory: String::new(),
            explanation: "Consistency wins.".to_string(),
            tags: String::new(),
            is_favorite: false,
            times_viewed: 0,
            date_added: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn locked_share_omits_explanation() {
        assert_eq!(
            share_text(&phrase(), false),
            "\"Discipline is the bridge between goals and accomplishment.\"\n\nJim Rohn\n\nShared via Daily Phrases"
        );
    }

    #[test]
    fn unlocked_share_includes_explanation() {
        let text = share_text(&phrase(), true);
        assert!(text.contains("Jim Rohn\n\nConsistency wins.\n\nShared via"));
    }

    #[test]
    fn blank_reference_is_skipped() {
        let mut p = phrase();
        p.reference = "  ".to_string();
        assert!(share_text(&p, false).starts_with("\"Discipline is the bridge between goals and accomplishment.\"\n\nShared via"));
    }
}
