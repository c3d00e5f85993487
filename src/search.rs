//! Person and place name search.
//!
//! Exact search works on the core schema alone. Fuzzy search ranks the
//! trigram index by trigram similarity, phonetic search needs `soundex()`
//! and semantic search needs the vector capability plus an [`Embedder`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchSettings;
use crate::error::{Result, TreeplexError};
use crate::persist::TenantConnection;
use crate::tables::ObjectKind;
use crate::vector::VectorApi;

/// Turns text into an embedding vector for semantic search.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Auto,
    Exact,
    Fuzzy,
    Phonetic,
    Semantic,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SearchMode::Auto => "auto",
            SearchMode::Exact => "exact",
            SearchMode::Fuzzy => "fuzzy",
            SearchMode::Phonetic => "phonetic",
            SearchMode::Semantic => "semantic",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SearchMode {
    type Err = TreeplexError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SearchMode::Auto),
            "exact" => Ok(SearchMode::Exact),
            "fuzzy" => Ok(SearchMode::Fuzzy),
            "phonetic" => Ok(SearchMode::Phonetic),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(TreeplexError::InvalidArgument(format!("unknown search mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub handle: String,
    pub kind: ObjectKind,
    pub score: f64,
}

/// Lowercased trigrams of every word, each word padded with two leading
/// blanks and one trailing blank.
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut grams = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word.to_lowercase()).chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Shared trigrams over all distinct trigrams, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (trigrams(a), trigrams(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

// Best similarity of the query against the whole text or any of its words.
fn best_similarity(query: &str, text: &str) -> f64 {
    text.split_whitespace()
        .map(|word| similarity(query, word))
        .fold(similarity(query, text), f64::max)
}

#[derive(Clone)]
pub struct SearchApi {
    connection: TenantConnection,
    settings: SearchSettings,
    fuzzy: bool,
    phonetic: bool,
    semantic: Option<(VectorApi, Arc<dyn Embedder>)>,
}

impl fmt::Debug for SearchApi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SearchApi")
            .field("fuzzy", &self.fuzzy)
            .field("phonetic", &self.phonetic)
            .field("semantic", &self.semantic.is_some())
            .finish()
    }
}

impl SearchApi {
    pub fn new(connection: TenantConnection, settings: SearchSettings) -> Self {
        Self {
            connection,
            settings,
            fuzzy: false,
            phonetic: false,
            semantic: None,
        }
    }
    pub fn with_fuzzy(mut self, enabled: bool) -> Self {
        self.fuzzy = enabled;
        self
    }
    pub fn with_phonetic(mut self, enabled: bool) -> Self {
        self.phonetic = enabled;
        self
    }
    pub fn with_semantic(mut self, vectors: VectorApi, embedder: Arc<dyn Embedder>) -> Self {
        self.semantic = Some((vectors, embedder));
        self
    }

    pub fn supports(&self, mode: SearchMode) -> bool {
        match mode {
            SearchMode::Auto | SearchMode::Exact => true,
            SearchMode::Fuzzy => self.fuzzy,
            SearchMode::Phonetic => self.phonetic,
            SearchMode::Semantic => self.semantic.is_some(),
        }
    }

    pub fn default_limit(&self) -> usize {
        self.settings.default_limit
    }

    /// Hits in descending score order (ties by handle), at most `limit`.
    pub fn search(&self, query: &str, mode: SearchMode, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.supports(mode) {
            return Err(TreeplexError::CapabilityUnavailable(format!("{} search", mode)));
        }
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut hits = match mode {
            SearchMode::Exact => self.exact(query)?,
            SearchMode::Fuzzy => self.fuzzy(query)?,
            SearchMode::Phonetic => self.phonetic(query)?,
            SearchMode::Semantic => self.semantic(query, limit)?,
            SearchMode::Auto => {
                let mut hits = self.exact(query)?;
                if self.fuzzy {
                    hits.extend(self.fuzzy(query)?);
                } else if self.phonetic {
                    hits.extend(self.phonetic(query)?);
                }
                hits
            }
        };
        hits = best_per_handle(hits);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.handle.cmp(&b.handle)));
        hits.truncate(limit);
        debug!(%mode, query, hits = hits.len(), "search");
        Ok(hits)
    }

    fn exact(&self, query: &str) -> Result<Vec<SearchHit>> {
        let people = self.connection.query(
            "select handle, coalesce(given_name, ''), coalesce(surname, '') from person
              where lower(given_name) = lower(?1)
                 or lower(surname) = lower(?1)
                 or lower(trim(coalesce(given_name, '') || ' ' || coalesce(surname, ''))) = lower(?1)",
            [query],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
        )?;
        let mut hits: Vec<SearchHit> = people
            .into_iter()
            .map(|(handle, given, surname)| {
                let full = format!("{} {}", given, surname);
                let score = if full.trim().eq_ignore_ascii_case(query) { 1.0 } else { 0.8 };
                SearchHit {
                    handle,
                    kind: ObjectKind::Person,
                    score,
                }
            })
            .collect();
        let places = self.connection.query(
            "select handle from place where lower(name) = lower(?1)",
            [query],
            |row| row.get::<_, String>(0),
        )?;
        hits.extend(places.into_iter().map(|handle| SearchHit {
            handle,
            kind: ObjectKind::Place,
            score: 1.0,
        }));
        Ok(hits)
    }

    fn fuzzy(&self, query: &str) -> Result<Vec<SearchHit>> {
        let rows = self.connection.query(
            "select handle, obj_type, content from search_index",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|(handle, obj_type, content)| {
                let score = best_similarity(query, &content);
                let kind = ObjectKind::from_name(&obj_type)?;
                (score >= self.settings.fuzzy_threshold).then_some(SearchHit { handle, kind, score })
            })
            .collect())
    }

    fn phonetic(&self, query: &str) -> Result<Vec<SearchHit>> {
        let people = self.connection.query(
            "select handle, coalesce(given_name, '') || ' ' || coalesce(surname, '') from person
              where soundex(surname) = soundex(?1) or soundex(given_name) = soundex(?1)",
            [query],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let places = self.connection.query(
            "select handle, coalesce(name, '') from place where soundex(name) = soundex(?1)",
            [query],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let people = people.into_iter().map(|row| (row, ObjectKind::Person));
        let places = places.into_iter().map(|row| (row, ObjectKind::Place));
        Ok(people
            .chain(places)
            .map(|((handle, text), kind)| SearchHit {
                score: 0.5 + 0.5 * best_similarity(query, &text),
                handle,
                kind,
            })
            .collect())
    }

    fn semantic(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some((vectors, embedder)) = &self.semantic else {
            return Err(TreeplexError::CapabilityUnavailable("semantic search".into()));
        };
        let embedding = embedder.embed(query)?;
        let matches = vectors.similarity_search(
            &embedding,
            &self.settings.semantic_embedding_kind,
            limit,
            self.settings.semantic_threshold,
        )?;
        let mut hits = Vec::with_capacity(matches.len());
        for found in matches {
            match self.object_kind(&found.handle)? {
                Some(kind) => hits.push(SearchHit {
                    handle: found.handle,
                    kind,
                    score: found.similarity,
                }),
                None => debug!(handle = %found.handle, "embedding without an object, skipped"),
            }
        }
        Ok(hits)
    }

    // Embeddings are keyed by handle alone, so the kind is whichever object
    // table holds that handle.
    fn object_kind(&self, handle: &str) -> Result<Option<ObjectKind>> {
        for kind in ObjectKind::ALL {
            let sql = format!("select 1 from {} where handle = ?1", kind.name());
            if self.connection.query_optional(&sql, [handle], |_| Ok(()))?.is_some() {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }
}

fn best_per_handle(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut best: HashMap<String, SearchHit> = HashMap::new();
    for hit in hits {
        match best.get(&hit.handle) {
            Some(kept) if kept.score >= hit.score => {}
            _ => {
                best.insert(hit.handle.clone(), hit);
            }
        }
    }
    best.into_values().collect()
}
