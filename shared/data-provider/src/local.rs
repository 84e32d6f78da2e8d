use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::{
    lazy::check_index,
    record::Record,
    traits::{DataSource, RecordSource},
};

fn mmap_file(p: &Path) -> Result<memmap2::Mmap> {
    let file = std::fs::File::open(p)?;
    let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
    Ok(mmap)
}

/// One memory-mapped JSON-lines file. Line boundaries are found once at load;
/// lines are parsed when read.
struct JsonLinesFile {
    path: PathBuf,
    data: memmap2::Mmap,
    // byte range of each non-blank line
    lines: Vec<(usize, usize)>,
}

impl JsonLinesFile {
    fn open(path: PathBuf) -> Result<Self> {
        let data = mmap_file(&path).with_context(|| format!("failed to map {}", path.display()))?;
        let mut lines = Vec::new();
        let mut start = 0;
        for end in data
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == b'\n')
            .map(|(i, _)| i)
            .chain(std::iter::once(data.len()))
        {
            if data[start..end].iter().any(|b| !b.is_ascii_whitespace()) {
                lines.push((start, end));
            }
            start = end + 1;
        }
        Ok(Self { path, data, lines })
    }
}

impl RecordSource for JsonLinesFile {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn get(&self, index: usize) -> Result<Record> {
        check_index(index, self.lines.len())?;
        let (start, end) = self.lines[index];
        serde_json::from_slice(&self.data[start..end]).with_context(|| {
            format!(
                "failed to parse record {index} of {}",
                self.path.display()
            )
        })
    }
}

/// A directory of `<split>.jsonl` files, one split per file.
pub struct LocalDataSource {
    dir: PathBuf,
    splits: BTreeMap<String, Arc<JsonLinesFile>>,
}

impl std::fmt::Debug for LocalDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDataSource")
            .field("dir", &self.dir)
            .field("splits", &self.splits.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalDataSource {
    pub fn new_from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = std::fs::canonicalize(&dir)
            .map_err(|e| anyhow!("Failed to open data directory {:?}: {e}", dir.as_ref()))?;
        let mut splits = BTreeMap::new();
        for file in std::fs::read_dir(&dir)
            .map_err(|e| anyhow!("couldn't load data from {}: {e}", dir.display()))?
            .flatten()
        {
            let path = file.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                if let Some(split) = path.file_stem().and_then(|s| s.to_str()) {
                    splits.insert(split.to_owned(), Arc::new(JsonLinesFile::open(path.clone())?));
                }
            }
        }

        if splits.is_empty() {
            anyhow::bail!("No .jsonl split files in directory {:?}", dir);
        }

        info!(
            "Loaded {} splits ({} records) from directory {}",
            splits.len(),
            splits.values().map(|f| f.len()).sum::<usize>(),
            dir.display()
        );

        Ok(Self { dir, splits })
    }
}

impl DataSource for LocalDataSource {
    fn splits(&self) -> Vec<String> {
        self.splits.keys().cloned().collect()
    }

    fn num_input_examples(&self, split: &str) -> Result<Option<usize>> {
        Ok(self.splits.get(split).map(|file| file.len()))
    }

    fn get_data_source(&self, split: &str) -> Result<Arc<dyn RecordSource>> {
        let file = self
            .splits
            .get(split)
            .ok_or_else(|| anyhow!("unknown split {split} in {}", self.dir.display()))?;
        Ok(file.clone())
    }
}
