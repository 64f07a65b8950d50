use std::collections::{HashMap, VecDeque};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rusqlite::Connection;
use time::OffsetDateTime;

use crate::db::{self, Phrase};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum PoolKey {
    Category(String),
    Subcategory(String, String),
}

impl PoolKey {
    fn parts(&self) -> (&str, Option<&str>) {
        match self {
            PoolKey::Category(c) => (c.as_str(), None),
            PoolKey::Subcategory(c, s) => (c.as_str(), Some(s.as_str())),
        }
    }
}

/// Hands out phrases so that a category is exhausted before anything repeats.
///
/// Pools hold phrase ids only and are rebuilt from the store whenever they run dry, so a
/// refill always sees the current set of rows. Nothing here is persisted.
pub struct SelectionService {
    pools: HashMap<PoolKey, VecDeque<i64>>,
    rng: StdRng,
}

impl SelectionService {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            pools: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn random_phrase(
        &mut self,
        conn: &Connection,
        category: &str,
    ) -> rusqlite::Result<Option<Phrase>> {
        self.draw(conn, PoolKey::Category(category.to_string()))
    }

    pub fn random_phrase_for_subcategory(
        &mut self,
        conn: &Connection,
        category: &str,
        subcategory: &str,
    ) -> rusqlite::Result<Option<Phrase>> {
        self.draw(
            conn,
            PoolKey::Subcategory(category.to_string(), subcategory.to_string()),
        )
    }

    /// Picks today's category from the day number, then draws from that category's pool.
    ///
    /// Only the category is stable for the day; the phrase itself comes from the pool.
    pub fn phrase_of_day(
        &mut self,
        conn: &Connection,
        days_since_epoch: i64,
    ) -> rusqlite::Result<Option<Phrase>> {
        let categories = db::list_categories(conn)?;
        let Some(category) = category_for_day(&categories, days_since_epoch) else {
            return Ok(None);
        };
        let category = category.to_string();
        self.random_phrase(conn, &category)
    }

    fn draw(&mut self, conn: &Connection, key: PoolKey) -> rusqlite::Result<Option<Phrase>> {
        let (category, subcategory) = key.parts();
        let pool = self.pools.entry(key.clone()).or_default();
        if pool.is_empty() {
            let mut ids = db::list_phrase_ids(conn, category, subcategory)?;
            ids.shuffle(&mut self.rng);
            pool.extend(ids);
        }

        // Rows are never deleted, but skip stale ids rather than fail the draw.
        while let Some(id) = pool.pop_front() {
            if let Some(mut phrase) = db::get_phrase(conn, id)? {
                db::increment_views(conn, id)?;
                phrase.times_viewed += 1;
                return Ok(Some(phrase));
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    fn pool_len(&self, category: &str) -> usize {
        self.pools
            .get(&PoolKey::Category(category.to_string()))
            .map(|p| p.len())
            .unwrap_or(0)
    }
}

impl Default for SelectionService {
    fn default() -> Self {
        Self::new()
    }
}

pub fn days_since_epoch(now: OffsetDateTime) -> i64 {
    now.unix_timestamp().div_euclid(SECONDS_PER_DAY)
}

/// `categories` must already be sorted so every process agrees on the index.
pub fn category_for_day(categories: &[String], days_since_epoch: i64) -> Option<&str> {
    if categories.is_empty() {
        return None;
    }
    let idx = days_since_epoch.rem_euclid(categories.len() as i64) as usize;
    Some(categories[idx].as_str())
}

/// Case-insensitive substring search over text, explanation and tags. A blank term matches nothing.
pub fn search(conn: &Connection, term: &str) -> rusqlite::Result<Vec<Phrase>> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let all = db::list_all_phrases(conn)?;
    Ok(all
        .into_iter()
        .filter(|p| phrase_matches(p, &needle))
        .collect())
}

fn phrase_matches(p: &Phrase, needle_lower: &str) -> bool {
    [&p.text, &p.explanation, &p.tags]
        .iter()
        .any(|field| field.to_lowercase().contains(needle_lower))
}
