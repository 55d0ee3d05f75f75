//! Git journal for committed transactions.
//!
//! Every committed read-write transaction becomes one git commit on `HEAD`:
//! - the root tree holds one directory per model
//! - each model directory holds one `<id>.json` blob per record
//! - `_meta.json` at the root holds the commit counter and id sequences,
//!   so ids and versions are never reissued after a restart
//!
//! Opening a store replays the tree at `HEAD`; the journal is never read
//! again afterwards, the in-memory tables are authoritative while running.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, ErrorCode, FileMode, ObjectType, Repository, Signature, Sort, Tree};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::record::{deserialize_record, serialize_record, Record};
use crate::storage::store::StampedChange;
use crate::storage::types::{ModelName, RecordId};

const AUTHOR_NAME: &str = "portaldb";
const AUTHOR_EMAIL: &str = "portaldb@localhost";
const META_FILE: &str = "_meta.json";

/// Record tables keyed by model.
pub(crate) type Tables = HashMap<ModelName, BTreeMap<RecordId, Record>>;

/// Counters persisted next to the tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalMeta {
    /// Version stamped by the last commit.
    pub head: u64,
    /// Last id allocated per model, including ids of deleted records.
    #[serde(default)]
    pub sequences: BTreeMap<ModelName, u64>,
}

/// One journal commit.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    /// Commit id (SHA).
    pub id: String,
    /// Commit message.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JournalEntry {
    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// Git repository receiving committed transactions.
pub struct GitJournal {
    repo: Repository,
}

impl GitJournal {
    /// Open the journal at `path`, initializing an empty repository if needed.
    pub fn open_or_init(path: &Path) -> StorageResult<Self> {
        let repo = if path.join(".git").exists() {
            Repository::open(path)?
        } else {
            std::fs::create_dir_all(path)?;
            Repository::init(path)?
        };
        Ok(Self { repo })
    }

    fn head_commit(&self) -> StorageResult<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load all tables and the persisted counters from the tree at `HEAD`.
    ///
    /// Journals written before the counters existed yield default counters.
    pub fn load(&self) -> StorageResult<(Tables, JournalMeta)> {
        let mut tables = HashMap::new();
        let commit = match self.head_commit()? {
            Some(commit) => commit,
            None => return Ok((tables, JournalMeta::default())),
        };
        let root = commit.tree()?;

        let meta = match root.get_name(META_FILE) {
            Some(entry) => {
                let blob = self.repo.find_blob(entry.id())?;
                serde_json::from_slice(blob.content())?
            }
            None => JournalMeta::default(),
        };

        for entry in root.iter() {
            if entry.kind() != Some(ObjectType::Tree) {
                continue;
            }
            let name = match entry.name() {
                Some(name) => name,
                None => continue,
            };
            let model = ModelName::new(name)?;
            let subtree = self.repo.find_tree(entry.id())?;
            let table = self.load_table(&model, &subtree)?;
            tables.insert(model, table);
        }

        Ok((tables, meta))
    }

    fn load_table(
        &self,
        model: &ModelName,
        tree: &Tree<'_>,
    ) -> StorageResult<BTreeMap<RecordId, Record>> {
        let mut table = BTreeMap::new();
        for entry in tree.iter() {
            if entry.kind() != Some(ObjectType::Blob) {
                continue;
            }
            let name = entry.name().unwrap_or_default();
            let id = name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<u64>().ok())
                .map(RecordId::new)
                .ok_or_else(|| StorageError::CorruptedData {
                    path: Path::new(model.as_str()).join(name),
                    reason: "record file name is not <id>.json".to_string(),
                })?;
            let blob = self.repo.find_blob(entry.id())?;
            let record = deserialize_record(blob.content(), id)?;
            table.insert(id, record);
        }
        Ok(table)
    }

    /// Write one commit containing the given changes and counters.
    pub(crate) fn record(
        &self,
        changes: &[StampedChange],
        tx_id: &str,
        meta: &JournalMeta,
    ) -> StorageResult<String> {
        let version = meta.head;
        let parent = self.head_commit()?;
        let root = match &parent {
            Some(commit) => Some(commit.tree()?),
            None => None,
        };

        let mut by_model: BTreeMap<&ModelName, Vec<(RecordId, Option<&Record>)>> = BTreeMap::new();
        for (model, id, record) in changes {
            by_model.entry(model).or_default().push((*id, record.as_ref()));
        }

        let mut root_builder = self.repo.treebuilder(root.as_ref())?;
        for (model, records) in &by_model {
            let existing = match root.as_ref().and_then(|t| t.get_name(model.as_str())) {
                Some(entry) => Some(self.repo.find_tree(entry.id())?),
                None => None,
            };
            let mut builder = self.repo.treebuilder(existing.as_ref())?;

            for (id, record) in records {
                let filename = format!("{}.json", id);
                match record {
                    Some(record) => {
                        let bytes = serialize_record(record)?;
                        let blob = self.repo.blob(&bytes)?;
                        builder.insert(filename.as_str(), blob, i32::from(FileMode::Blob))?;
                    }
                    None => {
                        if builder.get(filename.as_str())?.is_some() {
                            builder.remove(filename.as_str())?;
                        }
                    }
                }
            }

            if builder.len() == 0 {
                if root_builder.get(model.as_str())?.is_some() {
                    root_builder.remove(model.as_str())?;
                }
            } else {
                let tree_id = builder.write()?;
                root_builder.insert(model.as_str(), tree_id, i32::from(FileMode::Tree))?;
            }
        }

        let meta_blob = self.repo.blob(&serde_json::to_vec_pretty(meta)?)?;
        root_builder.insert(META_FILE, meta_blob, i32::from(FileMode::Blob))?;

        let tree_id = root_builder.write()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?;
        let message = commit_message(&by_model, tx_id, version);
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    /// Walk the journal from `HEAD`, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<JournalEntry>> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL)?;

        let mut entries = Vec::new();
        for oid in walk.take(limit.unwrap_or(usize::MAX)) {
            let commit = self.repo.find_commit(oid?)?;
            let timestamp = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);
            entries.push(JournalEntry {
                id: commit.id().to_string(),
                message: commit.message().unwrap_or("").to_string(),
                timestamp,
            });
        }
        Ok(entries)
    }
}

fn commit_message(
    by_model: &BTreeMap<&ModelName, Vec<(RecordId, Option<&Record>)>>,
    tx_id: &str,
    version: u64,
) -> String {
    let mut message = format!("[portaldb] commit {} (tx: {})\n", version, tx_id);
    for (model, records) in by_model {
        let written = records.iter().filter(|(_, r)| r.is_some()).count();
        let deleted = records.len() - written;
        message.push_str(&format!("\n{}: {} written, {} deleted", model, written, deleted));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Values;
    use serde_json::json;
    use tempfile::TempDir;

    fn stamped(model: &ModelName, id: u64, version: u64) -> StampedChange {
        let mut data = Values::new();
        data.insert("code".to_string(), json!(format!("code-{}", id)));
        let mut record = Record::new(RecordId::new(id), data);
        record.version = version;
        (model.clone(), RecordId::new(id), Some(record))
    }

    fn meta(model: &ModelName, head: u64, last_id: u64) -> JournalMeta {
        JournalMeta {
            head,
            sequences: BTreeMap::from([(model.clone(), last_id)]),
        }
    }

    #[test]
    fn test_empty_journal() {
        let dir = TempDir::new().unwrap();
        let journal = GitJournal::open_or_init(dir.path()).unwrap();
        let (tables, meta) = journal.load().unwrap();
        assert!(tables.is_empty());
        assert_eq!(meta, JournalMeta::default());
        assert!(journal.history(None).unwrap().is_empty());
    }

    #[test]
    fn test_record_and_load() {
        let dir = TempDir::new().unwrap();
        let journal = GitJournal::open_or_init(dir.path()).unwrap();
        let model = ModelName::new("checksum").unwrap();

        journal
            .record(&[stamped(&model, 1, 1), stamped(&model, 2, 1)], "tx1", &meta(&model, 1, 2))
            .unwrap();
        journal
            .record(&[(model.clone(), RecordId::new(1), None)], "tx2", &meta(&model, 2, 2))
            .unwrap();

        let (tables, counters) = journal.load().unwrap();
        assert_eq!(counters, meta(&model, 2, 2));
        let table = &tables[&model];
        assert_eq!(table.len(), 1);
        assert_eq!(table[&RecordId::new(2)].get_str("code"), Some("code-2"));

        let history = journal.history(Some(10)).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].summary().contains("tx2"));
    }

    #[test]
    fn test_deleting_last_record_drops_directory() {
        let dir = TempDir::new().unwrap();
        let journal = GitJournal::open_or_init(dir.path()).unwrap();
        let model = ModelName::new("company.company").unwrap();

        journal.record(&[stamped(&model, 1, 1)], "tx1", &meta(&model, 1, 1)).unwrap();
        journal
            .record(&[(model.clone(), RecordId::new(1), None)], "tx2", &meta(&model, 2, 1))
            .unwrap();

        let (tables, counters) = journal.load().unwrap();
        assert!(tables.get(&model).is_none());
        // the sequence outlives the last record
        assert_eq!(counters.sequences[&model], 1);
    }
}
