use serde::{Deserialize, Serialize};

/// Class written for an image the detector found nothing in.
pub const NULL_CLASS: &str = "NULL";

pub const PREDICTIONS_SCHEMA: [&str; 11] = [
    "filename",
    "class",
    "xmin",
    "xmax",
    "ymin",
    "ymax",
    "height",
    "width",
    "folder",
    "box_confidence",
    "image_confidence",
];

pub const PREDICTIONS_SCHEMA_NO_FOLDER: [&str; 10] = [
    "filename",
    "class",
    "xmin",
    "xmax",
    "ymin",
    "ymax",
    "height",
    "width",
    "box_confidence",
    "image_confidence",
];

/// Box corners, normalized to the image size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(class: &str, bbox: BoundingBox, confidence: f32) -> Self {
        Prediction {
            class: class.to_owned(),
            bbox,
            confidence,
        }
    }

    /// Placeholder standing in for "no detection".
    pub fn null() -> Self {
        Prediction::new(NULL_CLASS, BoundingBox::default(), 0.0)
    }

    pub fn is_null(&self) -> bool {
        self.class == NULL_CLASS
    }
}

/// Minimum box confidence of an image, 0 when there are no boxes.
pub fn image_confidence(predictions: &[Prediction]) -> f32 {
    predictions
        .iter()
        .map(|p| p.confidence)
        .reduce(f32::min)
        .unwrap_or(0.0)
}

/// Identifies an image across runs: its file name, scoped by its folder when
/// folder grouping is on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub folder: Option<String>,
    pub name: String,
}

impl ImageKey {
    pub fn flat(name: &str) -> Self {
        ImageKey {
            folder: None,
            name: name.to_owned(),
        }
    }

    pub fn in_folder(folder: &str, name: &str) -> Self {
        ImageKey {
            folder: Some(folder.to_owned()),
            name: name.to_owned(),
        }
    }
}

/// One ledger line: a single box (or the NULL placeholder) of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub filename: String,
    pub class: String,
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
    pub height: u32,
    pub width: u32,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub box_confidence: f32,
    #[serde(default)]
    pub image_confidence: f32,
}

impl AnnotationRow {
    pub fn from_prediction(
        key: &ImageKey,
        prediction: &Prediction,
        (height, width): (u32, u32),
        image_confidence: f32,
    ) -> Self {
        AnnotationRow {
            filename: key.name.clone(),
            class: prediction.class.clone(),
            xmin: prediction.bbox.xmin,
            xmax: prediction.bbox.xmax,
            ymin: prediction.bbox.ymin,
            ymax: prediction.bbox.ymax,
            height,
            width,
            folder: key.folder.clone(),
            box_confidence: prediction.confidence,
            image_confidence,
        }
    }

    pub fn is_null(&self) -> bool {
        self.class == NULL_CLASS
    }

    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
        }
    }

    /// Fields in schema order; the folder column is only present when
    /// folder grouping is on.
    pub fn to_record(&self, with_folder: bool) -> Vec<String> {
        let mut record = vec![
            self.filename.clone(),
            self.class.clone(),
            self.xmin.to_string(),
            self.xmax.to_string(),
            self.ymin.to_string(),
            self.ymax.to_string(),
            self.height.to_string(),
            self.width.to_string(),
        ];
        if with_folder {
            record.push(self.folder.clone().unwrap_or_default());
        }
        record.push(self.box_confidence.to_string());
        record.push(self.image_confidence.to_string());
        record
    }
}
