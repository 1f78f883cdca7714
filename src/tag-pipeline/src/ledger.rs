//! CSV ledgers: the tagged, in-progress, and suggestion files.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::annotation::{
    AnnotationRow, ImageKey, PREDICTIONS_SCHEMA, PREDICTIONS_SCHEMA_NO_FOLDER,
};
use crate::error::{Error, Result};

fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }

    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))
}

/// Read every row of a ledger. Works with and without the folder column.
pub fn read_rows(path: &Path) -> Result<Vec<AnnotationRow>> {
    let mut reader = open_reader(path)?;

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<AnnotationRow>, _>>()
        .map_err(|e| Error::csv(path, e))
}

/// First column of a headed CSV, e.g. a held-out test set.
pub fn read_filenames(path: &Path) -> Result<HashSet<String>> {
    let mut reader = open_reader(path)?;
    let mut names = HashSet::new();

    for record in reader.records() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        if let Some(name) = record.get(0) {
            names.insert(name.to_owned());
        }
    }

    Ok(names)
}

/// Images that already have a human-reviewed or in-review label.
#[derive(Debug, Clone)]
pub enum TaggedSet {
    Flat(HashSet<String>),
    ByFolder(HashMap<String, HashSet<String>>),
}

impl TaggedSet {
    pub fn empty(by_folder: bool) -> Self {
        if by_folder {
            TaggedSet::ByFolder(HashMap::new())
        } else {
            TaggedSet::Flat(HashSet::new())
        }
    }

    /// Merge the filenames of the given ledgers. In folder mode every ledger
    /// must carry the folder column.
    pub fn load<P: AsRef<Path>>(ledgers: &[P], by_folder: bool) -> Result<Self> {
        let mut set = TaggedSet::empty(by_folder);

        for path in ledgers {
            let path = path.as_ref();
            let before = set.len();
            let mut reader = open_reader(path)?;
            let headers = reader.headers().map_err(|e| Error::csv(path, e))?.clone();

            let filename_idx = headers.iter().position(|h| h == "filename").unwrap_or(0);
            let folder_idx = headers.iter().position(|h| h == "folder");
            if by_folder && folder_idx.is_none() && !headers.is_empty() {
                return Err(Error::LedgerSchema {
                    path: path.to_path_buf(),
                    column: "folder",
                });
            }

            for record in reader.records() {
                let record = record.map_err(|e| Error::csv(path, e))?;
                let name = match record.get(filename_idx) {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                };
                let key = match folder_idx.and_then(|i| record.get(i)) {
                    Some(folder) if by_folder => ImageKey::in_folder(folder, name),
                    _ => ImageKey::flat(name),
                };
                set.insert(key);
            }

            info!(
                "{}: {} labelled images, {} new",
                path.display(),
                set.len(),
                set.len() - before
            );
        }

        Ok(set)
    }

    pub fn insert(&mut self, key: ImageKey) {
        match self {
            TaggedSet::Flat(names) => {
                names.insert(key.name);
            }
            TaggedSet::ByFolder(folders) => {
                let folder = key.folder.unwrap_or_default();
                folders.entry(folder).or_default().insert(key.name);
            }
        }
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        match self {
            TaggedSet::Flat(names) => names.contains(&key.name),
            TaggedSet::ByFolder(folders) => key
                .folder
                .as_ref()
                .and_then(|f| folders.get(f))
                .map_or(false, |names| names.contains(&key.name)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TaggedSet::Flat(names) => names.len(),
            TaggedSet::ByFolder(folders) => folders.values().map(HashSet::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes suggestion rows under the header for the active schema.
pub struct LedgerWriter {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    with_folder: bool,
    rows: usize,
}

impl LedgerWriter {
    pub fn create(path: &Path, with_folder: bool) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let header_result = if with_folder {
            writer.write_record(PREDICTIONS_SCHEMA)
        } else {
            writer.write_record(PREDICTIONS_SCHEMA_NO_FOLDER)
        };
        header_result.map_err(|e| Error::csv(path, e))?;

        Ok(LedgerWriter {
            path: path.to_path_buf(),
            writer,
            with_folder,
            rows: 0,
        })
    }

    pub fn write(&mut self, row: &AnnotationRow) -> Result<()> {
        self.writer
            .write_record(row.to_record(self.with_folder))
            .map_err(|e| Error::csv(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush everything to disk and return the number of rows written.
    pub fn finish(self) -> Result<usize> {
        let path = self.path;
        let mut inner = self
            .writer
            .into_inner()
            .map_err(|e| Error::io(&path, e.into_error()))?;
        inner.flush().map_err(|e| Error::io(&path, e))?;
        Ok(self.rows)
    }
}
