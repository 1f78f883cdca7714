use image::RgbImage;

use crate::annotation::Prediction;
use crate::error::Result;

#[cfg(feature = "tensorflow")]
pub use self::tf::TfDetector;

/// An object detector that runs over a batch of equally sized RGB images.
pub trait Detector {
    /// Returns one list of predictions per input image, in input order.
    /// Boxes are normalized to `[0, 1]` and only boxes scoring at least
    /// `min_confidence` are kept.
    fn predict(&self, batch: &[RgbImage], min_confidence: f32) -> Result<Vec<Vec<Prediction>>>;
}

#[cfg(feature = "tensorflow")]
mod tf {
    use std::fs;
    use std::path::Path;

    use image::RgbImage;
    use log::{debug, warn};
    use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};

    use super::Detector;
    use crate::annotation::{BoundingBox, Prediction};
    use crate::error::{Error, Result};
    use crate::timer::Timer;

    const INPUT_OP: &str = "image_tensor";
    const BOXES_OP: &str = "detection_boxes";
    const SCORES_OP: &str = "detection_scores";
    const CLASSES_OP: &str = "detection_classes";
    const NUM_DETECTIONS_OP: &str = "num_detections";

    /// Detector backed by a frozen TensorFlow object-detection graph.
    pub struct TfDetector {
        /// TensorFlow model graph
        graph: Graph,

        /// TensorFlow session
        session: Session,

        /// Class names, indexed by model class id minus one
        classes: Vec<String>,
    }

    impl TfDetector {
        pub fn load(graph_path: &Path, classes: &[String]) -> Result<Self> {
            let mut t = Timer::start_new("Loading inference graph");

            if !graph_path.is_file() {
                return Err(Error::MissingFile(graph_path.to_path_buf()));
            }
            let proto = fs::read(graph_path).map_err(|e| Error::io(graph_path, e))?;

            let mut graph = Graph::new();
            graph.import_graph_def(&proto, &ImportGraphDefOptions::new())?;
            let session = Session::new(&SessionOptions::new(), &graph)?;

            t.stop();

            Ok(TfDetector {
                graph,
                session,
                classes: classes.to_vec(),
            })
        }

        fn class_name(&self, id: f32) -> Option<&str> {
            let id = id.round() as usize;
            if id == 0 {
                return None;
            }
            self.classes.get(id - 1).map(String::as_str)
        }
    }

    impl Detector for TfDetector {
        fn predict(
            &self,
            batch: &[RgbImage],
            min_confidence: f32,
        ) -> Result<Vec<Vec<Prediction>>> {
            let first = match batch.first() {
                Some(first) => first,
                None => return Ok(Vec::new()),
            };
            let (width, height) = first.dimensions();
            if batch.iter().any(|img| img.dimensions() != (width, height)) {
                return Err(Error::Detector(
                    "all images in a batch must share one size".to_owned(),
                ));
            }

            let mut t = Timer::start_new(&format!("Detecting {} images", batch.len()));

            let mut pixels = Vec::with_capacity(batch.len() * (width * height * 3) as usize);
            for img in batch {
                pixels.extend_from_slice(img.as_raw());
            }
            let input = Tensor::<u8>::new(&[batch.len() as u64, height as u64, width as u64, 3])
                .with_values(&pixels)?;

            let mut args = SessionRunArgs::new();
            args.add_feed(&self.graph.operation_by_name_required(INPUT_OP)?, 0, &input);
            let boxes_tok =
                args.request_fetch(&self.graph.operation_by_name_required(BOXES_OP)?, 0);
            let scores_tok =
                args.request_fetch(&self.graph.operation_by_name_required(SCORES_OP)?, 0);
            let classes_tok =
                args.request_fetch(&self.graph.operation_by_name_required(CLASSES_OP)?, 0);
            let num_tok =
                args.request_fetch(&self.graph.operation_by_name_required(NUM_DETECTIONS_OP)?, 0);

            self.session.run(&mut args)?;

            let boxes: Tensor<f32> = args.fetch(boxes_tok)?;
            let scores: Tensor<f32> = args.fetch(scores_tok)?;
            let classes: Tensor<f32> = args.fetch(classes_tok)?;
            let num_detections: Tensor<f32> = args.fetch(num_tok)?;

            let max_detections = scores.dims().get(1).copied().unwrap_or(0) as usize;

            let mut all = Vec::with_capacity(batch.len());
            for image_idx in 0..batch.len() {
                let count = (num_detections[image_idx] as usize).min(max_detections);
                let mut predictions = Vec::new();

                for det in 0..count {
                    let flat = image_idx * max_detections + det;
                    let score = scores[flat];
                    if score < min_confidence {
                        continue;
                    }

                    let class = match self.class_name(classes[flat]) {
                        Some(class) => class,
                        None => {
                            warn!("Skipping detection with unknown class id {}", classes[flat]);
                            continue;
                        }
                    };

                    // detection_boxes are [ymin, xmin, ymax, xmax]
                    let b = &boxes[flat * 4..flat * 4 + 4];
                    let bbox = BoundingBox {
                        xmin: b[1],
                        xmax: b[3],
                        ymin: b[0],
                        ymax: b[2],
                    };
                    predictions.push(Prediction::new(class, bbox, score));
                }

                debug!("image {}: {} boxes kept", image_idx, predictions.len());
                all.push(predictions);
            }

            t.stop();

            Ok(all)
        }
    }
}
