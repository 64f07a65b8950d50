use rusqlite::Connection;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::info;

use crate::db;
use crate::reward::{RewardGate, ShowOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOutcome {
    AlreadyUnlocked,
    Rewarded,
    FreeUnlock,
    AdLoading,
}

impl UnlockOutcome {
    pub fn unlocked(self) -> bool {
        !matches!(self, UnlockOutcome::AdLoading)
    }
}

/// Unlocks `text` through the reward gate. Already-unlocked texts never touch the gate.
pub fn request_unlock(
    conn: &Connection,
    gate: &mut RewardGate,
    text: &str,
    now: OffsetDateTime,
) -> rusqlite::Result<UnlockOutcome> {
    if db::is_unlocked(conn, text)? {
        return Ok(UnlockOutcome::AlreadyUnlocked);
    }

    let outcome = match gate.show() {
        ShowOutcome::Rewarded => UnlockOutcome::Rewarded,
        ShowOutcome::FreeUnlock => UnlockOutcome::FreeUnlock,
        ShowOutcome::NotReady => return Ok(UnlockOutcome::AdLoading),
    };

    let unlocked_at = now.format(&Rfc3339).unwrap_or_default();
    db::mark_unlocked(conn, text, &unlocked_at)?;
    info!("phrase unlocked ({outcome:?})");
    Ok(outcome)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExplanationLookup {
    Found(String),
    Locked,
    NotFound,
}

pub fn explanation_for(conn: &Connection, id: i64) -> rusqlite::Result<ExplanationLookup> {
    let Some(phrase) = db::get_phrase(conn, id)? else {
        return Ok(ExplanationLookup::NotFound);
    };
    if !db::is_unlocked(conn, &phrase.text)? {
        return Ok(ExplanationLookup::Locked);
    }
    Ok(ExplanationLookup::Found(phrase.explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{find_phrase_by_text, test_conn};
    use crate::reward::AdState;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-10-19 12:00:00 UTC);

    #[test]
    fn rewarded_unlock_marks_text() {
        let conn = test_conn(&[("a", "Motivation", "")]);
        let mut gate = RewardGate::new();
        gate.begin_load();
        gate.load_finished(true, std::time::Instant::now());

        assert_eq!(
            request_unlock(&conn, &mut gate, "a", NOW).unwrap(),
            UnlockOutcome::Rewarded
        );
        assert_eq!(gate.state(), AdState::Shown);
        assert!(db::is_unlocked(&conn, "a").unwrap());

        assert_eq!(
            request_unlock(&conn, &mut gate, "a", NOW).unwrap(),
            UnlockOutcome::AlreadyUnlocked
        );
        assert_eq!(gate.state(), AdState::Shown);
    }

    #[test]
    fn loading_ad_leaves_text_locked() {
        let conn = test_conn(&[("a", "Motivation", "")]);
        let mut gate = RewardGate::new();
        gate.begin_load();

        let outcome = request_unlock(&conn, &mut gate, "a", NOW).unwrap();
        assert_eq!(outcome, UnlockOutcome::AdLoading);
        assert!(!outcome.unlocked());
        assert!(!db::is_unlocked(&conn, "a").unwrap());
    }

    #[test]
    fn no_ad_means_free_unlock() {
        let conn = test_conn(&[("a", "Motivation", "")]);
        let mut gate = RewardGate::new();
        assert_eq!(
            request_unlock(&conn, &mut gate, "a", NOW).unwrap(),
            UnlockOutcome::FreeUnlock
        );
        assert!(db::is_unlocked(&conn, "a").unwrap());
        assert_eq!(gate.state(), AdState::Loading);
    }

    #[test]
    fn explanation_requires_unlock() {
        let conn = test_conn(&[("a", "Motivation", "")]);
        let id = find_phrase_by_text(&conn, "a").unwrap().unwrap().id;
        assert_eq!(explanation_for(&conn, id).unwrap(), ExplanationLookup::Locked);
        assert_eq!(explanation_for(&conn, id + 1).unwrap(), ExplanationLookup::NotFound);

        db::mark_unlocked(&conn, "a", "2026-10-19T12:00:00Z").unwrap();
        assert_eq!(
            explanation_for(&conn, id).unwrap(),
            ExplanationLookup::Found(String::new())
        );
    }
}
