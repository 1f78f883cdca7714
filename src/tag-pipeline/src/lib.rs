//! Offline half of the tagging workflow: suggest boxes for unlabeled images
//! with an object detector, then turn the reviewed ledger into TFRecord
//! training shards.

pub mod annotation;
pub mod config;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod records;
pub mod split;
pub mod suggest;
pub mod tfrecord;
mod timer;

pub use annotation::{AnnotationRow, BoundingBox, ImageKey, Prediction};
pub use config::{ConfigFile, RecordConfig, SuggestionConfig};
pub use detector::Detector;
#[cfg(feature = "tensorflow")]
pub use detector::TfDetector;
pub use error::{Error, Result};
pub use records::{create_tf_records, SplitSummary};
pub use split::SplitPlan;
pub use suggest::{get_suggestions, SuggestionSummary};
pub use timer::Timer;
