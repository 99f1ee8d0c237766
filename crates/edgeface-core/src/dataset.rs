//! Enrolled dataset: validation at the load boundary, on-disk store, and the
//! shared handle the recognizer reads from.
//!
//! A [`Dataset`] only exists in a validated state. Everything downstream
//! (search, scoring) relies on its invariants instead of re-checking shapes.

use crate::config::{ConfigError, RecognitionConfig};
use crate::types::{euclidean_distance, FaceSample};
use ndarray::{Array2, ArrayView1};
use serde_json::Value;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

const FACES_FILE: &str = "faces.json";
const NAMES_FILE: &str = "names.json";
const CURRENT_LINK: &str = "current";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error(
        "no enrollment data in '{}'; run `edgeface collect --name <NAME>` to capture faces first",
        .0.display()
    )]
    NotFound(PathBuf),
    #[error("dataset is empty (0 samples)")]
    Empty,
    #[error("dataset corrupt: {vectors} face vectors but {labels} labels")]
    LabelMismatch { vectors: usize, labels: usize },
    #[error("malformed face vectors: {0}")]
    MalformedVector(Malformation),
    #[error("label {index} is empty")]
    EmptyLabel { index: usize },
    #[error("non-finite value at row {row}, column {column}")]
    NonFiniteValue { row: usize, column: usize },
    #[error("cannot append {actual}-dimensional vectors to a {expected}-dimensional dataset")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("nothing to append: no samples given")]
    NoSamples,
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// The specific way a vector collection failed the shape check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformation {
    #[error("expected a rank-2 (samples × features) matrix, got rank {rank}")]
    Rank { rank: usize },
    #[error("row {row} has width {actual}, expected {expected}")]
    Ragged { row: usize, expected: usize, actual: usize },
    #[error("rows have zero width")]
    ZeroWidth,
}

/// Vector collection exactly as read from a source, before any checks.
#[derive(Debug, Clone, PartialEq)]
pub enum RawVectors {
    Rows(Vec<Vec<f32>>),
    /// Anything other than a list of numeric rows. `count` is the length of
    /// the outermost list, `rank` the observed nesting depth.
    Other { count: usize, rank: usize },
}

impl RawVectors {
    fn count(&self) -> usize {
        match self {
            RawVectors::Rows(rows) => rows.len(),
            RawVectors::Other { count, .. } => *count,
        }
    }
}

/// Unvalidated vectors and labels produced by a [`DatasetSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataset {
    pub vectors: RawVectors,
    pub labels: Vec<String>,
}

/// Anything that can produce raw enrollment data. The encoding is the source's business.
pub trait DatasetSource {
    fn read(&self) -> Result<RawDataset, DatasetError>;

    /// Human-readable origin for log lines.
    fn describe(&self) -> String;
}

impl DatasetSource for RawDataset {
    fn read(&self) -> Result<RawDataset, DatasetError> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// Read and validate a dataset. Fails on the first violated guard; there is
/// no fallback dataset.
pub fn load(source: &dyn DatasetSource) -> Result<Dataset, DatasetError> {
    let raw = source.read()?;
    let dataset = Dataset::validate(raw)?;
    tracing::info!(
        source = %source.describe(),
        samples = dataset.len(),
        dimension = dataset.dimension(),
        identities = dataset.summary().len(),
        "loaded dataset"
    );
    Ok(dataset)
}

/// Validated enrollment data: a samples × D matrix and a parallel label list.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    vectors: Array2<f32>,
    labels: Vec<String>,
}

impl Dataset {
    /// Enforce every invariant, in order: non-empty, counts agree, uniform
    /// rank-2 shape, non-empty labels, finite values.
    pub fn validate(raw: RawDataset) -> Result<Self, DatasetError> {
        let count = raw.vectors.count();
        if count == 0 {
            return Err(DatasetError::Empty);
        }
        if count != raw.labels.len() {
            return Err(DatasetError::LabelMismatch {
                vectors: count,
                labels: raw.labels.len(),
            });
        }

        let rows = match raw.vectors {
            RawVectors::Rows(rows) => rows,
            RawVectors::Other { rank, .. } => {
                return Err(DatasetError::MalformedVector(Malformation::Rank { rank }));
            }
        };

        let width = rows[0].len();
        if width == 0 {
            return Err(DatasetError::MalformedVector(Malformation::ZeroWidth));
        }
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(DatasetError::MalformedVector(Malformation::Ragged {
                row,
                expected: width,
                actual: r.len(),
            }));
        }

        if let Some(index) = raw.labels.iter().position(|l| l.is_empty()) {
            return Err(DatasetError::EmptyLabel { index });
        }

        for (row, r) in rows.iter().enumerate() {
            if let Some(column) = r.iter().position(|v| !v.is_finite()) {
                return Err(DatasetError::NonFiniteValue { row, column });
            }
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let vectors = Array2::from_shape_vec((count, width), flat).map_err(|_| {
            DatasetError::MalformedVector(Malformation::Rank { rank: 1 })
        })?;

        Ok(Self {
            vectors,
            labels: raw.labels,
        })
    }

    pub fn from_samples(samples: Vec<FaceSample>) -> Result<Self, DatasetError> {
        let (rows, labels) = samples.into_iter().map(|s| (s.vector, s.label)).unzip();
        Self::validate(RawDataset {
            vectors: RawVectors::Rows(rows),
            labels,
        })
    }

    /// Number of enrolled samples (always >= 1).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; a validated dataset holds at least one sample.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Feature dimensionality D.
    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn vector(&self, index: usize) -> ArrayView1<'_, f32> {
        self.vectors.row(index)
    }

    /// Euclidean distance from `query` to every sample, in enrollment order.
    ///
    /// `query` must have exactly [`dimension`](Self::dimension) values.
    pub fn distances(&self, query: &[f32]) -> Vec<f32> {
        self.vectors
            .outer_iter()
            .map(|row| euclidean_distance(query, row))
            .collect()
    }

    /// Sample counts per identity, in order of first enrollment.
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for label in &self.labels {
            match counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label.clone(), 1)),
            }
        }
        counts
    }

    fn rows(&self) -> Vec<Vec<f32>> {
        self.vectors.outer_iter().map(|r| r.to_vec()).collect()
    }
}

/// Directory-backed store holding `faces.json` (matrix) and `names.json` (labels).
///
/// Each write goes into a fresh `gen-NNNNNN/` directory. The pair becomes
/// visible when the `current` symlink is renamed onto it, so readers always
/// see one complete generation. A root that holds the two files directly
/// (no `current` link) is read as-is and migrated on the next append.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the committed file pair, if one exists.
    fn committed_dir(&self) -> Result<Option<PathBuf>, DatasetError> {
        let link = self.root.join(CURRENT_LINK);
        match fs::read_link(&link) {
            Ok(target) => {
                let dir = self.root.join(target);
                Ok(has_pair(&dir).then_some(dir))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(has_pair(&self.root).then(|| self.root.clone()))
            }
            Err(source) => Err(DatasetError::Io { path: link, source }),
        }
    }

    /// A committed pair is present.
    pub fn exists(&self) -> bool {
        matches!(self.committed_dir(), Ok(Some(_)))
    }

    pub fn load(&self) -> Result<Dataset, DatasetError> {
        load(self)
    }

    /// Append samples for one identity, creating the store on first use.
    ///
    /// Returns the total sample count after the append.
    pub fn append(&self, vectors: Vec<Vec<f32>>, name: &str) -> Result<usize, DatasetError> {
        if vectors.is_empty() {
            return Err(DatasetError::NoSamples);
        }

        let new_samples: Vec<FaceSample> = vectors
            .into_iter()
            .map(|vector| FaceSample { vector, label: name.to_string() })
            .collect();
        // Validates the new batch on its own: shape, label, finiteness.
        let batch = Dataset::from_samples(new_samples)?;

        let previous = self.committed_dir()?;
        let (mut rows, mut labels) = if previous.is_some() {
            let existing = self.load()?;
            if existing.dimension() != batch.dimension() {
                return Err(DatasetError::DimensionMismatch {
                    expected: existing.dimension(),
                    actual: batch.dimension(),
                });
            }
            (existing.rows(), existing.labels)
        } else {
            (Vec::new(), Vec::new())
        };
        let created = rows.is_empty();

        rows.extend(batch.rows());
        labels.extend(batch.labels);

        fs::create_dir_all(&self.root).map_err(|source| DatasetError::Io {
            path: self.root.clone(),
            source,
        })?;

        let generation = self.next_generation()?;
        let dir = self.root.join(generation_name(generation));
        fs::create_dir(&dir).map_err(|source| DatasetError::Io {
            path: dir.clone(),
            source,
        })?;
        write_json(&dir.join(FACES_FILE), &rows)?;
        write_json(&dir.join(NAMES_FILE), &labels)?;
        self.commit(generation)?;
        self.prune(&dir, previous.as_deref());

        tracing::info!(
            root = %self.root.display(),
            name,
            generation,
            total = labels.len(),
            created,
            "saved samples"
        );

        Ok(labels.len())
    }

    fn generations(&self) -> Result<Vec<u64>, DatasetError> {
        let entries = fs::read_dir(&self.root).map_err(|source| DatasetError::Io {
            path: self.root.clone(),
            source,
        })?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_generation(&entry.file_name().to_string_lossy()))
            .collect())
    }

    /// One past the highest generation on disk, including uncommitted ones.
    fn next_generation(&self) -> Result<u64, DatasetError> {
        Ok(self.generations()?.into_iter().max().map_or(1, |g| g + 1))
    }

    /// Point `current` at `generation` with a single rename.
    fn commit(&self, generation: u64) -> Result<(), DatasetError> {
        let name = generation_name(generation);
        let staged = self.root.join(format!("{CURRENT_LINK}.{name}.tmp"));
        std::os::unix::fs::symlink(&name, &staged).map_err(|source| DatasetError::Io {
            path: staged.clone(),
            source,
        })?;
        rename(&staged, &self.root.join(CURRENT_LINK))
    }

    /// Remove everything but the new generation and the one it replaced.
    ///
    /// The replaced one stays for readers that resolved it before the commit.
    /// Leftovers from an interrupted append (unlinked generations, staged
    /// links) go here too. Failures only cost disk space.
    fn prune(&self, committed: &Path, previous: Option<&Path>) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let result = if parse_generation(&name).is_some() {
                if path == committed || Some(path.as_path()) == previous {
                    continue;
                }
                fs::remove_dir_all(&path)
            } else if name.starts_with(CURRENT_LINK) && name.ends_with(".tmp") {
                fs::remove_file(&path)
            } else {
                continue;
            };
            match result {
                Ok(()) => tracing::debug!(path = %path.display(), "removed stale dataset entry"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to prune"),
            }
        }

        // A flat pair in the root is superseded by the first generation.
        if previous == Some(self.root.as_path()) {
            for file in [FACES_FILE, NAMES_FILE] {
                if let Err(e) = fs::remove_file(self.root.join(file)) {
                    tracing::warn!(file, error = %e, "failed to remove migrated dataset file");
                }
            }
        }
    }
}

fn generation_name(generation: u64) -> String {
    format!("{GENERATION_PREFIX}{generation:06}")
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn has_pair(dir: &Path) -> bool {
    dir.join(FACES_FILE).is_file() && dir.join(NAMES_FILE).is_file()
}

impl DatasetSource for DatasetStore {
    fn read(&self) -> Result<RawDataset, DatasetError> {
        // Resolve once so both files come from the same generation.
        let dir = self
            .committed_dir()?
            .ok_or_else(|| DatasetError::NotFound(self.root.clone()))?;

        let faces_path = dir.join(FACES_FILE);
        let faces: Value = read_json(&faces_path)?;
        let vectors = raw_vectors_from_json(faces).map_err(|message| DatasetError::Parse {
            path: faces_path,
            message,
        })?;

        let labels: Vec<String> = read_json(&dir.join(NAMES_FILE))?;

        Ok(RawDataset { vectors, labels })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let file = fs::File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| DatasetError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| io_err(e.into()))?;
    writer.flush().map_err(io_err)?;
    writer.get_ref().sync_all().map_err(io_err)
}

fn rename(from: &Path, to: &Path) -> Result<(), DatasetError> {
    fs::rename(from, to).map_err(|source| DatasetError::Io {
        path: to.to_path_buf(),
        source,
    })
}

/// Classify a JSON value as numeric rows or as something with another rank.
fn raw_vectors_from_json(value: Value) -> Result<RawVectors, String> {
    let Value::Array(items) = value else {
        return Err("expected a JSON array of face vectors".to_string());
    };
    let count = items.len();

    let rank = 1 + items.first().map(json_depth).unwrap_or(1);
    if rank != 2 {
        return Ok(RawVectors::Other { count, rank });
    }

    let mut rows = Vec::with_capacity(count);
    for item in items {
        // Scalars mixed in with rows: not a matrix.
        let Value::Array(values) = item else {
            return Ok(RawVectors::Other { count, rank: 1 });
        };
        let mut row = Vec::with_capacity(values.len());
        for v in values {
            match v.as_f64() {
                Some(n) => row.push(n as f32),
                None if v.is_array() => return Ok(RawVectors::Other { count, rank: 3 }),
                None => return Err("face vectors must contain only numbers".to_string()),
            }
        }
        rows.push(row);
    }
    Ok(RawVectors::Rows(rows))
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.first().map(json_depth).unwrap_or(0),
        _ => 0,
    }
}

/// Shared, swappable reference to the session's dataset.
///
/// Readers take an `Arc` snapshot per query; a reload swaps the whole `Arc`,
/// so a query sees either the old or the new dataset, never a mix.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    current: Arc<RwLock<Arc<Dataset>>>,
}

impl DatasetHandle {
    /// Wrap a dataset after checking it against the session configuration.
    pub fn new(dataset: Dataset, config: &RecognitionConfig) -> Result<Self, ConfigError> {
        config.check_dataset(&dataset)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(dataset))),
        })
    }

    pub fn snapshot(&self) -> Arc<Dataset> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the dataset. A dataset that does not fit `config` is refused
    /// and the current one stays in place. Returns the replaced dataset.
    pub fn reload(
        &self,
        dataset: Dataset,
        config: &RecognitionConfig,
    ) -> Result<Arc<Dataset>, ConfigError> {
        config.check_dataset(&dataset)?;
        let next = Arc::new(dataset);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, next);
        tracing::info!(
            previous_samples = previous.len(),
            samples = guard.len(),
            "dataset reloaded"
        );
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize, dim: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32; dim]).collect()
    }

    fn raw(vectors: Vec<Vec<f32>>, labels: &[&str]) -> RawDataset {
        RawDataset {
            vectors: RawVectors::Rows(vectors),
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_load_well_formed() {
        let dataset = load(&raw(rows(3, 12), &["a", "a", "b"])).unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels().len(), 3);
        assert_eq!(dataset.dimension(), 12);
        assert_eq!(dataset.vector(2)[0], 2.0);
        assert_eq!(dataset.label(2), "b");
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let err = load(&raw(vec![], &[])).unwrap_err();
        assert!(matches!(err, DatasetError::Empty));
    }

    #[test]
    fn test_empty_checked_before_label_count() {
        // Zero vectors with leftover labels is still reported as empty.
        let err = load(&raw(vec![], &["a"])).unwrap_err();
        assert!(matches!(err, DatasetError::Empty));
    }

    #[test]
    fn test_label_mismatch_reports_counts() {
        let err = load(&raw(rows(3, 4), &["a", "b"])).unwrap_err();
        assert!(matches!(err, DatasetError::LabelMismatch { vectors: 3, labels: 2 }));
        assert!(err.to_string().contains("3 face vectors but 2 labels"));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![1.0, 2.0]];
        let err = load(&raw(vectors, &["a", "b"])).unwrap_err();
        match err {
            DatasetError::MalformedVector(Malformation::Ragged { row, expected, actual }) => {
                assert_eq!((row, expected, actual), (1, 3, 2));
            }
            other => panic!("expected ragged error, got {other:?}"),
        }
    }

    #[test]
    fn test_one_dimensional_rejected() {
        let source = RawDataset {
            vectors: RawVectors::Other { count: 2, rank: 1 },
            labels: vec!["a".into(), "b".into()],
        };
        let err = load(&source).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MalformedVector(Malformation::Rank { rank: 1 })
        ));
    }

    #[test]
    fn test_zero_width_rejected() {
        let err = load(&raw(vec![vec![], vec![]], &["a", "b"])).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedVector(Malformation::ZeroWidth)));
    }

    #[test]
    fn test_empty_label_rejected() {
        let err = load(&raw(rows(2, 2), &["a", ""])).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyLabel { index: 1 }));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = load(&raw(vec![vec![1.0, f32::NAN]], &["a"])).unwrap_err();
        assert!(matches!(err, DatasetError::NonFiniteValue { row: 0, column: 1 }));
    }

    #[test]
    fn test_summary_in_enrollment_order() {
        let dataset = load(&raw(rows(5, 1), &["bob", "alice", "bob", "carol", "alice"])).unwrap();
        assert_eq!(
            dataset.summary(),
            vec![("bob".to_string(), 2), ("alice".to_string(), 2), ("carol".to_string(), 1)]
        );
    }

    #[test]
    fn test_json_rank_detection() {
        let v: Value = serde_json::from_str("[[1, 2], [3, 4]]").unwrap();
        assert_eq!(
            raw_vectors_from_json(v).unwrap(),
            RawVectors::Rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]])
        );

        let v: Value = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(raw_vectors_from_json(v).unwrap(), RawVectors::Other { count: 3, rank: 1 });

        let v: Value = serde_json::from_str("[[[1]], [[2]]]").unwrap();
        assert_eq!(raw_vectors_from_json(v).unwrap(), RawVectors::Other { count: 2, rank: 3 });

        let v: Value = serde_json::from_str("[]").unwrap();
        assert_eq!(raw_vectors_from_json(v).unwrap().count(), 0);

        let v: Value = serde_json::from_str(r#"{"a": 1}"#).unwrap();
        assert!(raw_vectors_from_json(v).is_err());
    }

    #[test]
    fn test_store_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("data"));
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(DatasetError::NotFound(_))));
    }

    #[test]
    fn test_store_append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("data"));

        assert_eq!(store.append(rows(3, 6), "alice").unwrap(), 3);
        assert_eq!(store.append(rows(2, 6), "bob").unwrap(), 5);

        let dataset = store.load().unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.dimension(), 6);
        assert_eq!(
            dataset.summary(),
            vec![("alice".to_string(), 3), ("bob".to_string(), 2)]
        );
        let root = dir.path().join("data");
        assert_eq!(fs::read_link(root.join(CURRENT_LINK)).unwrap(), PathBuf::from("gen-000002"));
        // The replaced generation is kept for readers that already resolved it.
        assert!(root.join("gen-000001").join(NAMES_FILE).exists());
    }

    #[test]
    fn test_store_append_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        store.append(rows(2, 6), "alice").unwrap();

        let err = store.append(rows(2, 5), "bob").unwrap_err();
        assert!(matches!(err, DatasetError::DimensionMismatch { expected: 6, actual: 5 }));
        // Existing data untouched.
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_store_append_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        assert!(matches!(store.append(vec![], "alice"), Err(DatasetError::NoSamples)));
        assert!(matches!(
            store.append(rows(1, 2), ""),
            Err(DatasetError::EmptyLabel { index: 0 })
        ));
    }

    #[test]
    fn test_store_detects_truncated_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path());
        store.append(rows(3, 2), "alice").unwrap();
        let committed = store.committed_dir().unwrap().unwrap();
        fs::write(committed.join(NAMES_FILE), r#"["alice"]"#).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, DatasetError::LabelMismatch { vectors: 3, labels: 1 }));
    }

    #[test]
    fn test_store_detects_flat_matrix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FACES_FILE), "[1.0, 2.0]").unwrap();
        fs::write(dir.path().join(NAMES_FILE), r#"["a", "b"]"#).unwrap();

        let err = DatasetStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MalformedVector(Malformation::Rank { rank: 1 })
        ));
    }

    #[test]
    fn test_store_interrupted_append_keeps_committed_pair() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let store = DatasetStore::new(root);
        store.append(rows(3, 2), "alice").unwrap();

        // Killed mid-write: new faces file only, no names file, no link switch.
        let partial = root.join("gen-000002");
        fs::create_dir(&partial).unwrap();
        write_json(&partial.join(FACES_FILE), &rows(5, 2)).unwrap();
        // Killed after staging the link but before the rename.
        let complete = root.join("gen-000003");
        fs::create_dir(&complete).unwrap();
        write_json(&complete.join(FACES_FILE), &rows(5, 2)).unwrap();
        write_json(&complete.join(NAMES_FILE), &["x"; 5]).unwrap();
        let staged = root.join("current.gen-000003.tmp");
        std::os::unix::fs::symlink("gen-000003", &staged).unwrap();

        let dataset = store.load().unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.summary(), vec![("alice".to_string(), 3)]);

        // The next append starts from the committed data and clears the debris.
        assert_eq!(store.append(rows(2, 2), "bob").unwrap(), 5);
        assert_eq!(
            store.load().unwrap().summary(),
            vec![("alice".to_string(), 3), ("bob".to_string(), 2)]
        );
        assert!(!partial.exists());
        assert!(!complete.exists());
        assert!(fs::symlink_metadata(&staged).is_err());
        assert!(root.join("gen-000001").exists());
    }

    #[test]
    fn test_store_migrates_flat_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_json(&dir.path().join(FACES_FILE), &rows(2, 3)).unwrap();
        write_json(&dir.path().join(NAMES_FILE), &["a", "a"]).unwrap();

        let store = DatasetStore::new(dir.path());
        assert!(store.exists());
        assert_eq!(store.load().unwrap().len(), 2);

        assert_eq!(store.append(rows(1, 3), "b").unwrap(), 3);
        assert!(!dir.path().join(FACES_FILE).exists());
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_write_json_serialization_failure_is_io() {
        struct Unserializable;
        impl serde::Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("refused"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let err = write_json(&dir.path().join(FACES_FILE), &Unserializable).unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }), "got {err:?}");
    }

    #[test]
    fn test_handle_reload_swaps_whole_dataset() {
        let config = RecognitionConfig {
            k: 1,
            crop_width: 1,
            crop_height: 1,
            ..Default::default()
        };
        let first = load(&raw(rows(2, 3), &["a", "b"])).unwrap();
        let handle = DatasetHandle::new(first, &config).unwrap();

        let held = handle.snapshot();
        let second = load(&raw(rows(4, 3), &["c", "c", "d", "d"])).unwrap();
        let previous = handle.reload(second, &config).unwrap();

        // A reader holding the old snapshot still sees the old data in full.
        assert_eq!(held.len(), 2);
        assert_eq!(previous.len(), 2);
        assert_eq!(handle.snapshot().len(), 4);
        assert_eq!(handle.snapshot().label(0), "c");
    }

    #[test]
    fn test_handle_reload_refuses_wrong_dimension() {
        let config = RecognitionConfig {
            k: 1,
            crop_width: 1,
            crop_height: 1,
            ..Default::default()
        };
        let handle = DatasetHandle::new(load(&raw(rows(2, 3), &["a", "b"])).unwrap(), &config).unwrap();

        let wrong = load(&raw(rows(2, 4), &["c", "d"])).unwrap();
        let err = handle.reload(wrong, &config).unwrap_err();
        assert_eq!(err, ConfigError::DimensionMismatch { expected: 3, actual: 4 });
        assert_eq!(handle.snapshot().dimension(), 3);
    }
}
