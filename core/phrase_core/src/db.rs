use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

const PHRASE_COLUMNS: &str =
    "id, text, reference, category, subcategory, explanation, tags, is_favorite, times_viewed, date_added";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Phrase {
    pub id: i64,
    pub text: String,
    pub reference: String,
    pub category: String,
    pub subcategory: String,
    pub explanation: String,
    /// Comma separated, used only for search.
    pub tags: String,
    pub is_favorite: bool,
    pub times_viewed: i64,
    pub date_added: String,
}

/// One entry of the bundled dataset.
#[derive(Clone, Debug, Deserialize)]
pub struct SeedPhrase {
    pub text: String,
    #[serde(default)]
    pub reference: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub tags: String,
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS phrases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  text TEXT NOT NULL,
  reference TEXT NOT NULL DEFAULT '',
  category TEXT NOT NULL,
  subcategory TEXT NOT NULL DEFAULT '',
  explanation TEXT NOT NULL DEFAULT '',
  tags TEXT NOT NULL DEFAULT '',
  is_favorite INTEGER NOT NULL DEFAULT 0,
  times_viewed INTEGER NOT NULL DEFAULT 0,
  date_added TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_phrases_category ON phrases(category, subcategory);
CREATE INDEX IF NOT EXISTS idx_phrases_text ON phrases(text);

CREATE TABLE IF NOT EXISTS unlocked_phrases (
  text TEXT PRIMARY KEY,
  unlocked_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prefs (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
    )
}

/// Inserts the dataset when the phrase table is still empty. Returns the number of rows inserted.
///
/// A dataset that fails to parse is replaced by [`default_phrases`] so a fresh install never
/// starts with an empty store.
pub fn seed_if_empty(conn: &mut Connection, dataset: &str) -> rusqlite::Result<usize> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM phrases", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let phrases = match serde_json::from_str::<Vec<SeedPhrase>>(dataset) {
        Ok(v) if !v.is_empty() => v,
        Ok(_) => {
            warn!("seed dataset is empty; using built-in phrases");
            default_phrases()
        }
        Err(err) => {
            warn!("seed dataset unreadable ({err}); using built-in phrases");
            default_phrases()
        }
    };

    let date_added = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let n = insert_phrases(conn, &phrases, &date_added)?;
    info!("seeded {n} phrases");
    Ok(n)
}

pub fn insert_phrases(
    conn: &mut Connection,
    phrases: &[SeedPhrase],
    date_added: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            r#"
INSERT INTO phrases (text, reference, category, subcategory, explanation, tags, date_added)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        )?;
        for p in phrases {
            stmt.execute((
                p.text.trim(),
                p.reference.trim(),
                p.category.trim(),
                p.subcategory.trim(),
                &p.explanation,
                &p.tags,
                date_added,
            ))?;
        }
    }
    tx.commit()?;
    Ok(phrases.len())
}

pub fn default_phrases() -> Vec<SeedPhrase> {
    let p = |text: &str, reference: &str, category: &str, subcategory: &str, explanation: &str, tags: &str| {
        SeedPhrase {
            text: text.to_string(),
            reference: reference.to_string(),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            explanation: explanation.to_string(),
            tags: tags.to_string(),
        }
    };
    vec![
        p(
            "Trust in the Lord with all your heart and lean not on your own understanding.",
            "Proverbs 3:5",
            "Bible Verses",
            "Trust",
            "Our own wisdom is limited. The verse asks for trust even when the circumstances make no sense yet.",
            "trust, wisdom, faith, understanding",
        ),
        p(
            "I can do all things through Christ who strengthens me.",
            "Philippians 4:13",
            "Bible Verses",
            "Strength and Perseverance",
            "Written from prison: strength that does not depend on outside circumstances.",
            "strength, perseverance, capacity",
        ),
        p(
            "Discipline is the bridge between goals and accomplishment.",
            "Jim Rohn",
            "Motivation",
            "Self-discipline",
            "Consistent action is what connects where we are with where we want to be.",
            "discipline, goals, achievement, persistence",
        ),
        p(
            "Success is not final, failure is not fatal: it is the courage to continue that counts.",
            "Winston Churchill",
            "Motivation",
            "Perseverance",
            "Both outcomes are temporary. What matters is the ability to keep going and keep learning.",
            "success, failure, courage, persistence",
        ),
    ]
}

fn phrase_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Phrase> {
    let is_favorite: i64 = row.get(7)?;
    Ok(Phrase {
        id: row.get(0)?,
        text: row.get(1)?,
        reference: row.get(2)?,
        category: row.get(3)?,
        subcategory: row.get(4)?,
        explanation: row.get(5)?,
        tags: row.get(6)?,
        is_favorite: is_favorite != 0,
        times_viewed: row.get(8)?,
        date_added: row.get(9)?,
    })
}

fn collect_phrases<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<Phrase>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, phrase_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn get_phrase(conn: &Connection, id: i64) -> rusqlite::Result<Option<Phrase>> {
    conn.query_row(
        &format!("SELECT {PHRASE_COLUMNS} FROM phrases WHERE id = ?1"),
        [id],
        phrase_from_row,
    )
    .optional()
}

pub fn find_phrase_by_text(conn: &Connection, text: &str) -> rusqlite::Result<Option<Phrase>> {
    conn.query_row(
        &format!("SELECT {PHRASE_COLUMNS} FROM phrases WHERE text = ?1 ORDER BY id LIMIT 1"),
        [text],
        phrase_from_row,
    )
    .optional()
}

pub fn list_all_phrases(conn: &Connection) -> rusqlite::Result<Vec<Phrase>> {
    collect_phrases(
        conn,
        &format!("SELECT {PHRASE_COLUMNS} FROM phrases ORDER BY id"),
        [],
    )
}

pub fn list_favorites(conn: &Connection) -> rusqlite::Result<Vec<Phrase>> {
    collect_phrases(
        conn,
        &format!("SELECT {PHRASE_COLUMNS} FROM phrases WHERE is_favorite = 1 ORDER BY date_added DESC, id DESC"),
        [],
    )
}

pub fn list_most_viewed(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<Phrase>> {
    collect_phrases(
        conn,
        &format!("SELECT {PHRASE_COLUMNS} FROM phrases ORDER BY times_viewed DESC, id LIMIT ?1"),
        [limit as i64],
    )
}

/// Ids of every phrase in a category, or in a (category, subcategory) pair.
pub fn list_phrase_ids(
    conn: &Connection,
    category: &str,
    subcategory: Option<&str>,
) -> rusqlite::Result<Vec<i64>> {
    let mut out = Vec::new();
    match subcategory {
        Some(sub) => {
            let mut stmt = conn
                .prepare("SELECT id FROM phrases WHERE category = ?1 AND subcategory = ?2 ORDER BY id")?;
            let rows = stmt.query_map((category, sub), |row| row.get::<_, i64>(0))?;
            for r in rows {
                out.push(r?);
            }
        }
        None => {
            let mut stmt = conn.prepare("SELECT id FROM phrases WHERE category = ?1 ORDER BY id")?;
            let rows = stmt.query_map([category], |row| row.get::<_, i64>(0))?;
            for r in rows {
                out.push(r?);
            }
        }
    }
    Ok(out)
}

pub fn list_categories(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT category FROM phrases ORDER BY category")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn list_subcategories(conn: &Connection, category: &str) -> rusqlite::Result<Vec<String>> {
    if category.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        r#"
SELECT DISTINCT subcategory
FROM phrases
WHERE category = ?1 AND TRIM(subcategory) != ''
ORDER BY subcategory
"#,
    )?;
    let rows = stmt.query_map([category], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn increment_views(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE phrases SET times_viewed = times_viewed + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

pub fn set_favorite(conn: &Connection, id: i64, is_favorite: bool) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE phrases SET is_favorite = ?2 WHERE id = ?1",
        (id, is_favorite as i64),
    )
}

/// Flips the favorite flag and returns the updated row, or `None` for an unknown id.
pub fn toggle_favorite(conn: &Connection, id: i64) -> rusqlite::Result<Option<Phrase>> {
    let Some(mut phrase) = get_phrase(conn, id)? else {
        return Ok(None);
    };
    phrase.is_favorite = !phrase.is_favorite;
    set_favorite(conn, id, phrase.is_favorite)?;
    Ok(Some(phrase))
}

pub fn is_favorite_text(conn: &Connection, text: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM phrases WHERE text = ?1 AND is_favorite = 1)",
        [text],
        |row| row.get(0),
    )
}

pub fn is_unlocked(conn: &Connection, text: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM unlocked_phrases WHERE text = ?1)",
        [text],
        |row| row.get(0),
    )
}

/// Returns `true` when the text was not unlocked before.
pub fn mark_unlocked(conn: &Connection, text: &str, unlocked_at: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO unlocked_phrases (text, unlocked_at) VALUES (?1, ?2) ON CONFLICT(text) DO NOTHING",
        (text, unlocked_at),
    )?;
    Ok(n > 0)
}

pub fn get_pref(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    match conn.query_row("SELECT value FROM prefs WHERE key = ?1", [key], |row| {
        row.get::<_, String>(0)
    }) {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn set_pref(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        r#"
INSERT INTO prefs (key, value) VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value=excluded.value
"#,
        (key, value),
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_conn(phrases: &[(&str, &str, &str)]) -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    init_db(&conn).unwrap();
    let seeds: Vec<SeedPhrase> = phrases
        .iter()
        .map(|(text, category, subcategory)| SeedPhrase {
            text: text.to_string(),
            reference: String::new(),
            category: category.to_string(),
            subcategory: subcategory.to_string(),
            explanation: String::new(),
            tags: String::new(),
        })
        .collect();
    insert_phrases(&mut conn, &seeds, "2026-01-01T00:00:00Z").unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_runs_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let dataset = r#"[
            {"text": "a", "category": "Motivation", "subcategory": "Focus", "tags": "x"},
            {"text": "b", "reference": "R", "category": "Wisdom"}
        ]"#;
        assert_eq!(seed_if_empty(&mut conn, dataset).unwrap(), 2);
        assert_eq!(seed_if_empty(&mut conn, dataset).unwrap(), 0);
        assert_eq!(list_all_phrases(&conn).unwrap().len(), 2);

        let b = find_phrase_by_text(&conn, "b").unwrap().unwrap();
        assert_eq!(b.reference, "R");
        assert_eq!(b.subcategory, "");
        assert!(!b.is_favorite);
        assert_eq!(b.times_viewed, 0);
    }

    #[test]
    fn broken_dataset_falls_back_to_defaults() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let n = seed_if_empty(&mut conn, "{not json").unwrap();
        assert_eq!(n, default_phrases().len());
        assert_eq!(
            list_categories(&conn).unwrap(),
            vec!["Bible Verses".to_string(), "Motivation".to_string()]
        );
    }

    #[test]
    fn subcategories_skip_blank_values() {
        let conn = test_conn(&[
            ("a", "Motivation", "Focus"),
            ("b", "Motivation", "  "),
            ("c", "Motivation", ""),
            ("d", "Motivation", "Courage"),
            ("e", "Motivation", "Focus"),
            ("f", "Wisdom", "Life"),
        ]);
        assert_eq!(
            list_subcategories(&conn, "Motivation").unwrap(),
            vec!["Courage".to_string(), "Focus".to_string()]
        );
        assert!(list_subcategories(&conn, "").unwrap().is_empty());
    }

    #[test]
    fn toggle_favorite_twice_restores_state() {
        let conn = test_conn(&[("a", "Motivation", "")]);
        let id = find_phrase_by_text(&conn, "a").unwrap().unwrap().id;

        let once = toggle_favorite(&conn, id).unwrap().unwrap();
        assert!(once.is_favorite);
        assert!(is_favorite_text(&conn, "a").unwrap());
        assert_eq!(list_favorites(&conn).unwrap().len(), 1);

        let twice = toggle_favorite(&conn, id).unwrap().unwrap();
        assert!(!twice.is_favorite);
        assert!(!get_phrase(&conn, id).unwrap().unwrap().is_favorite);
        assert!(list_favorites(&conn).unwrap().is_empty());

        assert!(toggle_favorite(&conn, id + 100).unwrap().is_none());
    }

    #[test]
    fn mark_unlocked_is_idempotent() {
        let conn = test_conn(&[]);
        assert!(!is_unlocked(&conn, "a").unwrap());
        assert!(mark_unlocked(&conn, "a", "2026-01-01T00:00:00Z").unwrap());
        assert!(!mark_unlocked(&conn, "a", "2026-01-02T00:00:00Z").unwrap());
        assert!(is_unlocked(&conn, "a").unwrap());
    }

    #[test]
    fn unlocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrases.db");
        {
            let conn = Connection::open(&path).unwrap();
            init_db(&conn).unwrap();
            mark_unlocked(&conn, "Keep going.", "2026-01-01T00:00:00Z").unwrap();
        }
        let conn = Connection::open(&path).unwrap();
        init_db(&conn).unwrap();
        assert!(is_unlocked(&conn, "Keep going.").unwrap());
        assert!(!is_unlocked(&conn, "keep going.").unwrap());
    }

    #[test]
    fn most_viewed_orders_by_counter() {
        let conn = test_conn(&[("a", "M", ""), ("b", "M", ""), ("c", "M", "")]);
        let b = find_phrase_by_text(&conn, "b").unwrap().unwrap().id;
        let c = find_phrase_by_text(&conn, "c").unwrap().unwrap().id;
        increment_views(&conn, b).unwrap();
        increment_views(&conn, b).unwrap();
        increment_views(&conn, c).unwrap();

        let top: Vec<String> = list_most_viewed(&conn, 2)
            .unwrap()
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(top, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn prefs_upsert() {
        let conn = test_conn(&[]);
        assert_eq!(get_pref(&conn, "dark_mode").unwrap(), None);
        set_pref(&conn, "dark_mode", "false").unwrap();
        set_pref(&conn, "dark_mode", "true").unwrap();
        assert_eq!(get_pref(&conn, "dark_mode").unwrap().as_deref(), Some("true"));
    }
}
