//! Suggestion generator: runs the detector over every image under the image
//! directory and writes candidate boxes to the tagged or untagged CSV,
//! depending on whether a reviewer has already seen the image.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use serde::Serialize;
use walkdir::WalkDir;

use crate::annotation::{image_confidence, AnnotationRow, ImageKey, Prediction};
use crate::config::SuggestionConfig;
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::ledger::{LedgerWriter, TaggedSet};
use crate::timer::Timer;

/// An image found under the image directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub key: ImageKey,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderConfidence {
    pub folder: String,
    pub images: usize,
    pub mean_confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuggestionSummary {
    pub images: usize,
    pub tagged_images: usize,
    pub untagged_images: usize,
    pub tagged_rows: usize,
    pub untagged_rows: usize,
    /// Folders ordered from least to most confident
    pub folders: Vec<FolderConfidence>,
}

fn matching_files(dir: &Path, pattern: &glob::Pattern) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::io(&path, io::Error::from(e))
        })?;

        if entry.file_type().is_file()
            && pattern.matches(&entry.file_name().to_string_lossy())
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Find all images whose file name matches `filetype`, recursively. With
/// folder grouping only files inside the immediate subdirectories count, and
/// each is keyed by its subdirectory name.
pub fn enumerate_images(base: &Path, filetype: &str, by_folder: bool) -> Result<Vec<ImageEntry>> {
    let pattern = glob::Pattern::new(filetype).map_err(|source| Error::Pattern {
        pattern: filetype.to_owned(),
        source,
    })?;

    let file_name = |path: &Path| path.file_name().map(|n| n.to_string_lossy().into_owned());

    let mut entries = Vec::new();
    if by_folder {
        let mut subdirs = Vec::new();
        for entry in fs::read_dir(base).map_err(|e| Error::io(base, e))? {
            let path = entry.map_err(|e| Error::io(base, e))?.path();
            if path.is_dir() {
                subdirs.push(path);
            }
        }
        subdirs.sort();

        for subdir in subdirs {
            let folder = match file_name(&subdir) {
                Some(folder) => folder,
                None => continue,
            };
            for path in matching_files(&subdir, &pattern)? {
                if let Some(name) = file_name(&path) {
                    entries.push(ImageEntry {
                        key: ImageKey::in_folder(&folder, &name),
                        path,
                    });
                }
            }
        }
    } else {
        for path in matching_files(base, &pattern)? {
            if let Some(name) = file_name(&path) {
                entries.push(ImageEntry {
                    key: ImageKey::flat(&name),
                    path,
                });
            }
        }
    }

    info!(
        "Found {} images of filetype '{}' under {}",
        entries.len(),
        filetype,
        base.display()
    );

    Ok(entries)
}

/// Ledger rows for one image. An image without detections gets a single
/// NULL row so it still shows up for review.
pub fn image_rows(key: &ImageKey, predictions: &[Prediction], size: (u32, u32)) -> Vec<AnnotationRow> {
    let placeholder = [Prediction::null()];
    let predictions = if predictions.is_empty() {
        &placeholder[..]
    } else {
        predictions
    };
    let confidence = image_confidence(predictions);

    predictions
        .iter()
        .map(|p| AnnotationRow::from_prediction(key, p, size, confidence))
        .collect()
}

fn load_resized(path: &Path, (width, height): (u32, u32)) -> Result<RgbImage> {
    let rgb = image::open(path)
        .map_err(|e| Error::image(path, e))?
        .to_rgb8();

    Ok(imageops::resize(&rgb, width, height, FilterType::Triangle))
}

fn rank_folders(confidences: BTreeMap<String, Vec<f32>>) -> Vec<FolderConfidence> {
    let mut ranked: Vec<FolderConfidence> = confidences
        .into_iter()
        .map(|(folder, values)| FolderConfidence {
            folder,
            images: values.len(),
            mean_confidence: values.iter().sum::<f32>() / values.len().max(1) as f32,
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.mean_confidence
            .partial_cmp(&b.mean_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

/// Run `detector` over the configured image directory and write the tagged
/// and untagged suggestion CSVs.
pub fn get_suggestions<D: Detector + ?Sized>(
    detector: &D,
    config: &SuggestionConfig,
) -> Result<SuggestionSummary> {
    let tagged = TaggedSet::load(&[&config.cur_tagged, &config.cur_tagging], config.user_folders)?;
    let entries = enumerate_images(&config.image_dir, &config.filetype, config.user_folders)?;

    let mut tagged_writer = LedgerWriter::create(&config.tagged_output, config.user_folders)?;
    let mut untagged_writer = LedgerWriter::create(&config.untagged_output, config.user_folders)?;

    let mut summary = SuggestionSummary {
        images: entries.len(),
        ..Default::default()
    };
    let mut folder_confidences: BTreeMap<String, Vec<f32>> = BTreeMap::new();

    for (batch_idx, chunk) in entries.chunks(config.minibatch_size).enumerate() {
        let mut t = Timer::start_new(&format!("Suggestion batch {}", batch_idx));

        let mut sizes = Vec::with_capacity(chunk.len());
        let mut batch = Vec::with_capacity(chunk.len());
        for entry in chunk {
            // Original dimensions, not the resized copy's
            let (width, height) =
                image::image_dimensions(&entry.path).map_err(|e| Error::image(&entry.path, e))?;
            sizes.push((height, width));
            batch.push(load_resized(&entry.path, config.image_size)?);
        }

        let predictions = detector.predict(&batch, config.min_confidence)?;
        if predictions.len() != chunk.len() {
            return Err(Error::Detector(format!(
                "expected predictions for {} images, got {}",
                chunk.len(),
                predictions.len()
            )));
        }

        for ((entry, size), preds) in chunk.iter().zip(sizes).zip(predictions) {
            let rows = image_rows(&entry.key, &preds, size);

            if let Some(folder) = &entry.key.folder {
                let confidence = rows.first().map_or(0.0, |r| r.image_confidence);
                folder_confidences
                    .entry(folder.clone())
                    .or_default()
                    .push(confidence);
            }

            let already_tagged = tagged.contains(&entry.key);
            debug!(
                "{} -> {} ({} rows)",
                entry.path.display(),
                if already_tagged { "tagged" } else { "untagged" },
                rows.len()
            );

            let writer = if already_tagged {
                summary.tagged_images += 1;
                &mut tagged_writer
            } else {
                summary.untagged_images += 1;
                &mut untagged_writer
            };
            for row in &rows {
                writer.write(row)?;
            }
        }

        t.stop();
    }

    summary.tagged_rows = tagged_writer.finish()?;
    summary.untagged_rows = untagged_writer.finish()?;
    summary.folders = rank_folders(folder_confidences);

    info!(
        "Wrote {} tagged and {} untagged rows for {} images",
        summary.tagged_rows, summary.untagged_rows, summary.images
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{BoundingBox, NULL_CLASS};
    use crate::ledger::read_rows;
    use image::Rgb;
    use std::cell::RefCell;

    /// Reports one box per image whose top-left pixel is bright; images with
    /// a dark corner get nothing.
    struct CornerDetector {
        batch_sizes: RefCell<Vec<usize>>,
    }

    impl CornerDetector {
        fn new() -> Self {
            CornerDetector {
                batch_sizes: RefCell::new(Vec::new()),
            }
        }
    }

    impl Detector for CornerDetector {
        fn predict(&self, batch: &[RgbImage], min_confidence: f32) -> Result<Vec<Vec<Prediction>>> {
            self.batch_sizes.borrow_mut().push(batch.len());
            Ok(batch
                .iter()
                .map(|img| {
                    let score = img.get_pixel(0, 0).0[0] as f32 / 255.0;
                    let boxes = vec![
                        Prediction::new(
                            "knot",
                            BoundingBox {
                                xmin: 0.1,
                                xmax: 0.5,
                                ymin: 0.2,
                                ymax: 0.6,
                            },
                            score,
                        ),
                        Prediction::new("knot", BoundingBox::default(), 0.95),
                    ];
                    if score >= min_confidence {
                        boxes
                    } else {
                        Vec::new()
                    }
                })
                .collect())
        }
    }

    fn write_image(path: &Path, brightness: u8, size: (u32, u32)) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(size.0, size.1, Rgb([brightness, brightness, brightness]))
            .save(path)
            .unwrap();
    }

    fn config(root: &Path, user_folders: bool) -> SuggestionConfig {
        SuggestionConfig {
            image_dir: root.join("images"),
            untagged_output: root.join("untagged.csv"),
            tagged_output: root.join("tagged_preds.csv"),
            cur_tagged: root.join("tagged.csv"),
            cur_tagging: root.join("tagging.csv"),
            classes: vec!["knot".to_owned()],
            inference_graph: root.join("model.pb"),
            filetype: "*.png".to_owned(),
            min_confidence: 0.5,
            user_folders,
            image_size: (8, 6),
            minibatch_size: 2,
        }
    }

    #[test]
    fn empty_predictions_become_single_null_row() {
        let key = ImageKey::flat("a.png");
        let rows = image_rows(&key, &[], (10, 20));

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class, NULL_CLASS);
        assert_eq!(rows[0].bbox(), BoundingBox::default());
        assert_eq!(rows[0].image_confidence, 0.0);
    }

    #[test]
    fn every_row_carries_the_image_minimum() {
        let key = ImageKey::flat("a.png");
        let preds = vec![
            Prediction::new("knot", BoundingBox::default(), 0.8),
            Prediction::new("knot", BoundingBox::default(), 0.6),
        ];
        let rows = image_rows(&key, &preds, (10, 20));

        assert!(rows.iter().all(|r| r.image_confidence == 0.6));
        assert_eq!(rows[0].height, 10);
        assert_eq!(rows[0].width, 20);
    }

    #[test]
    fn folder_enumeration_is_keyed_by_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        write_image(&images.join("b").join("2.png"), 0, (4, 4));
        write_image(&images.join("a").join("nested").join("1.png"), 0, (4, 4));
        fs::write(images.join("a").join("notes.txt"), "not an image").unwrap();
        write_image(&images.join("top.png"), 0, (4, 4));

        let entries = enumerate_images(&images, "*.png", true).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(
            keys,
            vec![ImageKey::in_folder("a", "1.png"), ImageKey::in_folder("b", "2.png")]
        );

        let flat = enumerate_images(&images, "*.png", false).unwrap();
        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|e| e.key.folder.is_none()));
    }

    #[test]
    fn suggestions_route_by_ledger_membership() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), true);
        write_image(&cfg.image_dir.join("f1").join("seen.png"), 255, (40, 30));
        write_image(&cfg.image_dir.join("f1").join("dark.png"), 0, (20, 10));
        write_image(&cfg.image_dir.join("f2").join("new.png"), 200, (40, 30));

        fs::write(
            &cfg.cur_tagged,
            "filename,class,xmin,xmax,ymin,ymax,height,width,folder\nseen.png,knot,0,0,0,0,30,40,f1\n",
        )
        .unwrap();
        fs::write(&cfg.cur_tagging, "").unwrap();

        let detector = CornerDetector::new();
        let summary = get_suggestions(&detector, &cfg).unwrap();

        assert_eq!(summary.images, 3);
        assert_eq!(summary.tagged_images, 1);
        assert_eq!(summary.untagged_images, 2);
        assert_eq!(*detector.batch_sizes.borrow(), vec![2, 1]);

        let tagged = read_rows(&cfg.tagged_output).unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(tagged.iter().all(|r| r.filename == "seen.png"));
        assert!(tagged.iter().all(|r| r.image_confidence == 0.95));

        let untagged = read_rows(&cfg.untagged_output).unwrap();
        let dark: Vec<_> = untagged.iter().filter(|r| r.filename == "dark.png").collect();
        assert_eq!(dark.len(), 1);
        assert_eq!(dark[0].class, NULL_CLASS);
        assert_eq!((dark[0].height, dark[0].width), (10, 20));
        assert_eq!(dark[0].folder.as_deref(), Some("f1"));

        let new: Vec<_> = untagged.iter().filter(|r| r.filename == "new.png").collect();
        assert_eq!(new.len(), 2);
        assert!((new[0].image_confidence - 200.0 / 255.0).abs() < 0.01);

        // f1 averages a NULL image with a confident one
        assert_eq!(summary.folders[0].folder, "f1");
        assert_eq!(summary.folders[0].images, 2);
    }

    #[test]
    fn rerun_keeps_tagged_images_out_of_untagged() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), false);
        write_image(&cfg.image_dir.join("x").join("a.png"), 255, (8, 8));
        write_image(&cfg.image_dir.join("b.png"), 255, (8, 8));
        fs::write(&cfg.cur_tagged, "filename,class\n").unwrap();
        fs::write(&cfg.cur_tagging, "filename,class\na.png,NULL\n").unwrap();

        get_suggestions(&CornerDetector::new(), &cfg).unwrap();

        let untagged = read_rows(&cfg.untagged_output).unwrap();
        assert!(untagged.iter().all(|r| r.filename == "b.png"));
        assert!(untagged.iter().all(|r| r.folder.is_none()));
        let tagged = read_rows(&cfg.tagged_output).unwrap();
        assert!(tagged.iter().all(|r| r.filename == "a.png"));
        assert!(!tagged.is_empty());

        let header = fs::read_to_string(&cfg.untagged_output).unwrap();
        assert!(!header.lines().next().unwrap().contains("folder"));
    }
}
