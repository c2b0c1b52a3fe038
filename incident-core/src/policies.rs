//! Policy retrieval for the corrective-action stage.
//!
//! `PolicyStore` keeps policy text in SQLite and ranks it with a term-frequency
//! cosine similarity. Seeding happens at startup; queries are read-only.

use crate::error::PolicyError;
use async_trait::async_trait;
use incident_schema::PolicyReference;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const NO_POLICIES_FOUND: &str = "No policies found. Base recommendations on best practice.";
const DEFAULT_TAG: &str = "policy";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f64,
}

impl PolicyMatch {
    pub fn tag(&self) -> &str {
        self.metadata
            .get("tag")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TAG)
    }

    pub fn to_reference(&self) -> PolicyReference {
        PolicyReference {
            title: self.id.clone(),
            excerpt: self.document.clone(),
            source: self.tag().to_string(),
        }
    }
}

#[async_trait]
pub trait PolicyIndex: Send + Sync {
    /// Up to `k` matches, nearest first. Empty text yields no matches.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<PolicyMatch>, PolicyError>;
}

/// Renders matches as `<tag>: <text>` lines, or the explicit placeholder.
pub fn format_policy_context(matches: &[PolicyMatch]) -> String {
    if matches.is_empty() {
        return NO_POLICIES_FOUND.to_string();
    }
    matches
        .iter()
        .map(|m| format!("{}: {}", m.tag(), m.document))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl PolicyDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>, source: &str, tag: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), source.to_string());
        metadata.insert("tag".to_string(), tag.to_string());
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }
}

#[derive(Clone)]
pub struct PolicyStore {
    db_path: Arc<PathBuf>,
}

impl PolicyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                metadata TEXT NOT NULL
            );
            ",
        )?;

        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    /// Inserts or replaces documents; entries without an id or text are skipped.
    pub fn upsert(&self, documents: &[PolicyDocument]) -> Result<usize, PolicyError> {
        let mut conn = Connection::open(&*self.db_path)?;
        let tx = conn.transaction()?;
        let mut written = 0;
        for doc in documents {
            if doc.id.trim().is_empty() || doc.text.trim().is_empty() {
                continue;
            }
            tx.execute(
                "INSERT INTO policies (id, document, metadata) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document, metadata = excluded.metadata",
                params![doc.id, doc.text, serde_json::to_string(&doc.metadata)?],
            )?;
            written += 1;
        }
        tx.commit()?;
        if written > 0 {
            tracing::info!(count = written, "upserted policy documents");
        }
        Ok(written)
    }

    pub fn count(&self) -> Result<usize, PolicyError> {
        let conn = Connection::open(&*self.db_path)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM policies", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Loads `*.txt` policies from `directory` when the store is empty, falling
    /// back to the built-in seed set. Returns how many documents were written.
    pub fn ensure_seed_documents(&self, directory: Option<&Path>) -> Result<usize, PolicyError> {
        if self.count()? > 0 {
            return Ok(0);
        }

        let mut docs = Vec::new();
        if let Some(dir) = directory.filter(|d| d.is_dir()) {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let text = std::fs::read_to_string(&path)?;
                docs.push(PolicyDocument::new(
                    stem,
                    text,
                    &path.display().to_string(),
                    DEFAULT_TAG,
                ));
            }
            docs.sort_by(|a, b| a.id.cmp(&b.id));
        }

        if docs.is_empty() {
            tracing::info!("using built-in seed policies");
            docs = builtin_policies();
        }
        self.upsert(&docs)
    }

    pub fn search(&self, text: &str, k: usize) -> Result<Vec<PolicyMatch>, PolicyError> {
        let query = term_frequencies(text);
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let conn = Connection::open(&*self.db_path)?;
        let mut stmt = conn.prepare("SELECT id, document, metadata FROM policies")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, document, metadata) = row?;
            let similarity = cosine(&query, &term_frequencies(&document));
            if similarity <= 0.0 {
                continue;
            }
            matches.push(PolicyMatch {
                id,
                document,
                metadata: serde_json::from_str(&metadata)?,
                distance: 1.0 - similarity,
            });
        }

        matches.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }
}

#[async_trait]
impl PolicyIndex for PolicyStore {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<PolicyMatch>, PolicyError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let store = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || store.search(&text, k))
            .await
            .map_err(|e| PolicyError::Task(e.to_string()))?
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
    {
        *counts.entry(token.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm = |v: &HashMap<String, f64>| v.values().map(|w| w * w).sum::<f64>().sqrt();
    dot / (norm(a) * norm(b))
}

fn builtin_policies() -> Vec<PolicyDocument> {
    vec![
        PolicyDocument::new(
            "ppe_policy",
            "All personnel in production areas must wear ANSI Z89.1 hard hats, \
             ANSI Z87.1 eye protection, and high-visibility vests at all times.",
            "seed",
            "PPE",
        ),
        PolicyDocument::new(
            "lockout_tagout",
            "Before servicing equipment, apply lockout/tagout per OSHA 1910.147. \
             Verify zero energy state prior to maintenance activities.",
            "seed",
            "LOTO",
        ),
        PolicyDocument::new(
            "chemical_handling",
            "When handling corrosive chemicals, use splash-resistant gloves, \
             face shields, and ensure eyewash stations are operational within \
             10 seconds travel time.",
            "seed",
            "Chemical",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PolicyStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PolicyStore::open(dir.path().join("policies.db")).expect("open");
        (dir, store)
    }

    #[test]
    fn seeds_builtin_policies_once() {
        let (_dir, store) = store();
        assert_eq!(store.ensure_seed_documents(None).expect("seed"), 3);
        assert_eq!(store.ensure_seed_documents(None).expect("seed"), 0);
        assert_eq!(store.count().expect("count"), 3);
    }

    #[test]
    fn seeds_from_directory_when_present() {
        let (dir, store) = store();
        let seed_dir = dir.path().join("seed");
        std::fs::create_dir_all(&seed_dir).expect("mkdir");
        std::fs::write(seed_dir.join("housekeeping.txt"), "Spills must be cleaned immediately.")
            .expect("write");
        std::fs::write(seed_dir.join("readme.md"), "ignored").expect("write");

        assert_eq!(store.ensure_seed_documents(Some(&seed_dir)).expect("seed"), 1);
        let hits = store.search("spills cleaned", 4).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "housekeeping");
        assert_eq!(hits[0].tag(), "policy");
    }

    #[test]
    fn ranks_by_similarity_and_truncates() {
        let (_dir, store) = store();
        store.ensure_seed_documents(None).expect("seed");

        let hits = store
            .search("worker splashed by corrosive chemicals without gloves", 4)
            .expect("search");
        assert_eq!(hits[0].id, "chemical_handling");
        assert_eq!(hits[0].tag(), "Chemical");
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        let one = store.search("equipment maintenance energy gloves", 1).expect("search");
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn unrelated_text_yields_no_matches() {
        let (_dir, store) = store();
        store.ensure_seed_documents(None).expect("seed");
        assert!(store.search("quarterly budget spreadsheet", 4).expect("search").is_empty());
    }

    #[tokio::test]
    async fn empty_query_returns_empty_list() {
        let (_dir, store) = store();
        store.ensure_seed_documents(None).expect("seed");
        assert!(store.query("   ", 4).await.expect("query").is_empty());
        assert!(!store.query("hard hats", 4).await.expect("query").is_empty());
    }

    #[test]
    fn context_uses_tag_lines_or_placeholder() {
        assert_eq!(format_policy_context(&[]), NO_POLICIES_FOUND);

        let mut metadata = BTreeMap::new();
        metadata.insert("tag".to_string(), "LOTO".to_string());
        let matches = vec![
            PolicyMatch {
                id: "lockout_tagout".into(),
                document: "Apply lockout".into(),
                metadata,
                distance: 0.2,
            },
            PolicyMatch {
                id: "untagged".into(),
                document: "Be careful".into(),
                metadata: BTreeMap::new(),
                distance: 0.4,
            },
        ];
        assert_eq!(
            format_policy_context(&matches),
            "LOTO: Apply lockout\npolicy: Be careful"
        );
        let reference = matches[0].to_reference();
        assert_eq!(reference.title, "lockout_tagout");
        assert_eq!(reference.source, "LOTO");
    }
}
