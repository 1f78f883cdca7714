//! Builds TFRecord training shards from the tagged ledger.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::annotation::{AnnotationRow, ImageKey};
use crate::config::RecordConfig;
use crate::error::{Error, Result};
use crate::ledger::{read_filenames, read_rows};
use crate::tfrecord::{Example, Feature, RecordWriter};
use crate::timer::Timer;

pub const UNSPECIFIED_VIEW: &str = "Unspecified";

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub name: String,
    pub path: PathBuf,
    pub examples: usize,
}

/// Class name to label id, numbered from 1 in the given order.
pub fn label_map(classes: &[String]) -> HashMap<String, i64> {
    classes
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i as i64 + 1))
        .collect()
}

/// `<dir>/<stem>_<split><.ext>` for a record location `<dir>/<stem><.ext>`.
pub fn split_record_path(record_file: &Path, split: &str) -> PathBuf {
    let stem = record_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match record_file.extension() {
        Some(ext) => format!("{}_{}.{}", stem, split, ext.to_string_lossy()),
        None => format!("{}_{}", stem, split),
    };
    record_file.with_file_name(name)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn format_tag(raw: &[u8]) -> &'static str {
    match image::guess_format(raw) {
        Ok(ImageFormat::Jpeg) => "jpeg",
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::Bmp) => "bmp",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Tiff) => "tiff",
        _ => {
            warn!("Could not identify image format, recording it as jpeg");
            "jpeg"
        }
    }
}

/// Group ledger rows by image, dropping filenames in `excluded`. With folder
/// grouping the same filename in two folders is two images.
pub fn group_by_image(
    rows: Vec<AnnotationRow>,
    excluded: &HashSet<String>,
    by_folder: bool,
) -> BTreeMap<ImageKey, Vec<AnnotationRow>> {
    let mut groups: BTreeMap<ImageKey, Vec<AnnotationRow>> = BTreeMap::new();
    for row in rows {
        if excluded.contains(&row.filename) {
            continue;
        }
        let key = ImageKey {
            folder: if by_folder { row.folder.clone() } else { None },
            name: row.filename.clone(),
        };
        groups.entry(key).or_default().push(row);
    }
    groups
}

/// One example for an image. NULL rows contribute no boxes.
pub fn create_example(
    rows: &[AnnotationRow],
    raw_image: &[u8],
    labels: &HashMap<String, i64>,
) -> Result<Example> {
    let first = rows
        .first()
        .ok_or_else(|| Error::CorruptRecord("image without ledger rows".to_owned()))?;
    let filename = first.filename.as_bytes().to_vec();

    let boxes: Vec<&AnnotationRow> = rows.iter().filter(|r| !r.is_null()).collect();
    let mut xmin = Vec::with_capacity(boxes.len());
    let mut xmax = Vec::with_capacity(boxes.len());
    let mut ymin = Vec::with_capacity(boxes.len());
    let mut ymax = Vec::with_capacity(boxes.len());
    let mut classes_text = Vec::with_capacity(boxes.len());
    let mut classes = Vec::with_capacity(boxes.len());

    for row in &boxes {
        let label = labels
            .get(&row.class)
            .ok_or_else(|| Error::UnknownClass(row.class.clone()))?;
        xmin.push(row.xmin);
        xmax.push(row.xmax);
        ymin.push(row.ymin);
        ymax.push(row.ymax);
        classes_text.push(row.class.as_bytes().to_vec());
        classes.push(*label);
    }

    let mut feature = BTreeMap::new();
    feature.insert("image/height".to_owned(), Feature::int64s(vec![first.height as i64]));
    feature.insert("image/width".to_owned(), Feature::int64s(vec![first.width as i64]));
    feature.insert("image/filename".to_owned(), Feature::bytes(vec![filename.clone()]));
    feature.insert("image/source_id".to_owned(), Feature::bytes(vec![filename]));
    feature.insert(
        "image/key/sha256".to_owned(),
        Feature::bytes(vec![sha256_hex(raw_image).into_bytes()]),
    );
    feature.insert("image/encoded".to_owned(), Feature::bytes(vec![raw_image.to_vec()]));
    feature.insert(
        "image/format".to_owned(),
        Feature::bytes(vec![format_tag(raw_image).as_bytes().to_vec()]),
    );
    feature.insert("image/object/bbox/xmin".to_owned(), Feature::floats(xmin));
    feature.insert("image/object/bbox/xmax".to_owned(), Feature::floats(xmax));
    feature.insert("image/object/bbox/ymin".to_owned(), Feature::floats(ymin));
    feature.insert("image/object/bbox/ymax".to_owned(), Feature::floats(ymax));
    feature.insert("image/object/class/text".to_owned(), Feature::bytes(classes_text));
    feature.insert("image/object/class/label".to_owned(), Feature::int64s(classes));
    feature.insert(
        "image/object/difficult".to_owned(),
        Feature::int64s(vec![0; boxes.len()]),
    );
    feature.insert(
        "image/object/truncated".to_owned(),
        Feature::int64s(vec![0; boxes.len()]),
    );
    feature.insert(
        "image/object/view".to_owned(),
        Feature::bytes(vec![UNSPECIFIED_VIEW.as_bytes().to_vec(); boxes.len()]),
    );

    Ok(Example::from_features(feature))
}

fn image_path(image_dir: &Path, row: &AnnotationRow, user_folders: bool) -> Result<PathBuf> {
    if !user_folders {
        return Ok(image_dir.join(&row.filename));
    }

    match row.folder.as_deref() {
        Some(folder) if !folder.is_empty() => Ok(image_dir.join(folder).join(&row.filename)),
        _ => Err(Error::invalid(
            "user_folders",
            format!("ledger row for {} has no folder", row.filename),
        )),
    }
}

fn write_split(
    path: &Path,
    images: &[ImageKey],
    groups: &BTreeMap<ImageKey, Vec<AnnotationRow>>,
    image_dir: &Path,
    user_folders: bool,
    labels: &HashMap<String, i64>,
) -> Result<usize> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = RecordWriter::new(BufWriter::new(file));

    for key in images {
        let rows = &groups[key];
        let image_loc = image_path(image_dir, &rows[0], user_folders)?;
        debug!("Using image at {}", image_loc.display());

        let raw = fs::read(&image_loc).map_err(|e| Error::io(&image_loc, e))?;
        let example = create_example(rows, &raw, labels)?;
        writer
            .write_example(&example)
            .map_err(|e| Error::io(path, e))?;
    }

    writer.flush().map_err(|e| Error::io(path, e))?;
    Ok(writer.records())
}

/// Write one TFRecord file per split of the tagged ledger.
///
/// Splits are written in plan order; if one fails, earlier split files stay
/// on disk.
pub fn create_tf_records(config: &RecordConfig) -> Result<Vec<SplitSummary>> {
    let plan = &config.split;
    let rows = read_rows(&config.tagged_ledger)?;
    info!(
        "Read {} rows from {}",
        rows.len(),
        config.tagged_ledger.display()
    );

    let excluded = match &config.test_file {
        Some(test_file) => {
            let names = read_filenames(test_file)?;
            info!("Holding out {} test images", names.len());
            names
        }
        None => HashSet::new(),
    };

    let groups = group_by_image(rows, &excluded, config.user_folders);
    let labels = label_map(&config.classes);
    let keys: Vec<ImageKey> = groups.keys().cloned().collect();

    let mut summaries = Vec::with_capacity(plan.names().len());
    for (name, split_images) in plan.partition(keys) {
        let path = split_record_path(&config.record_location, &name);
        let mut t = Timer::start_new(&format!("Creating TF record {}", path.display()));

        let examples = write_split(
            &path,
            &split_images,
            &groups,
            &config.image_dir,
            config.user_folders,
            &labels,
        )?;

        t.stop();
        summaries.push(SplitSummary {
            name,
            path,
            examples,
        });
    }

    Ok(summaries)
}
