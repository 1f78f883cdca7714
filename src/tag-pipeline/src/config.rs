//! Configuration shared by the suggestion and record stages.
//!
//! The config is a TOML key/value file. Older configs quote every value
//! (`user_folders = "True"`, `min_confidence = "0.5"`), so the typed
//! accessors accept either the native TOML type or its string spelling.
//! Each stage validates the keys it needs, and the files it expects to
//! exist, before any work starts.

use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::error::{Error, Result};
use crate::split::{SplitPlan, DEFAULT_SPLIT_SEED};

pub const DEFAULT_FILETYPE: &str = "*.jpg";
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.2;
pub const DEFAULT_IMAGE_SIZE: (u32, u32) = (1000, 750);
pub const DEFAULT_MINIBATCH_SIZE: usize = 50;
pub const INFERENCE_GRAPH_FILE: &str = "frozen_inference_graph.pb";

pub struct ConfigFile {
    path: PathBuf,
    table: Table,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        let table = toml::from_str::<Table>(contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(ConfigFile {
            path: path.to_path_buf(),
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn string(&self, key: &str) -> Result<String> {
        self.opt_string(key)?
            .ok_or_else(|| Error::MissingKey(key.to_owned()))
    }

    pub fn opt_string(&self, key: &str) -> Result<Option<String>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(Error::invalid(key, "value is empty"))
            }
            Some(Value::String(s)) => Ok(Some(s.trim().to_owned())),
            Some(other) => Err(Error::invalid(
                key,
                format!("expected a string, found {}", other.type_str()),
            )),
        }
    }

    pub fn path_value(&self, key: &str) -> Result<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    pub fn opt_path(&self, key: &str) -> Result<Option<PathBuf>> {
        Ok(self.opt_string(key)?.map(PathBuf::from))
    }

    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(Value::Boolean(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim() {
                "True" | "true" | "1" => Ok(Some(true)),
                "False" | "false" | "0" => Ok(Some(false)),
                other => Err(Error::invalid(key, format!("'{}' is not a boolean", other))),
            },
            Some(other) => Err(Error::invalid(
                key,
                format!("expected a boolean, found {}", other.type_str()),
            )),
        }
    }

    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(Value::Float(f)) => Ok(Some(*f)),
            Some(Value::Integer(i)) => Ok(Some(*i as f64)),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| Error::invalid(key, format!("'{}' is not a number", s))),
            Some(other) => Err(Error::invalid(
                key,
                format!("expected a number, found {}", other.type_str()),
            )),
        }
    }

    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(Value::Integer(i)) if *i >= 0 => Ok(Some(*i as u64)),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::invalid(key, format!("'{}' is not an unsigned integer", s))),
            Some(other) => Err(Error::invalid(
                key,
                format!("expected an unsigned integer, found {}", other),
            )),
        }
    }

    pub fn opt_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.opt_u64(key)? {
            None => Ok(None),
            Some(v) => u32::try_from(v)
                .map(Some)
                .map_err(|_| Error::invalid(key, format!("{} does not fit in 32 bits", v))),
        }
    }

    /// A list given either as a TOML array of strings or a comma-separated string.
    pub fn opt_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        let items: Vec<String> = match self.table.get(key) {
            None => return Ok(None),
            Some(Value::String(s)) => s.split(',').map(|s| s.trim().to_owned()).collect(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.trim().to_owned()),
                    Value::Float(f) => Ok(f.to_string()),
                    Value::Integer(i) => Ok(i.to_string()),
                    other => Err(Error::invalid(
                        key,
                        format!("unexpected list item {}", other.type_str()),
                    )),
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(Error::invalid(
                    key,
                    format!("expected a list, found {}", other.type_str()),
                ))
            }
        };

        if items.iter().any(|s| s.is_empty()) {
            return Err(Error::invalid(key, "list contains an empty entry"));
        }

        Ok(Some(items))
    }

    pub fn classes(&self) -> Result<Vec<String>> {
        let classes = self
            .opt_list("classes")?
            .ok_or_else(|| Error::MissingKey("classes".to_owned()))?;

        for (i, class) in classes.iter().enumerate() {
            if classes[..i].contains(class) {
                return Err(Error::invalid("classes", format!("'{}' is listed twice", class)));
            }
        }

        Ok(classes)
    }

    pub fn user_folders(&self) -> Result<bool> {
        Ok(self.opt_bool("user_folders")?.unwrap_or(true))
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingFile(path.to_path_buf()))
    }
}

fn require_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::MissingFile(path.to_path_buf()))
    }
}

/// Settings for the suggestion stage.
#[derive(Debug, Clone)]
pub struct SuggestionConfig {
    pub image_dir: PathBuf,
    pub untagged_output: PathBuf,
    pub tagged_output: PathBuf,
    /// Ledger of images that were already reviewed
    pub cur_tagged: PathBuf,
    /// Ledger of images currently being reviewed
    pub cur_tagging: PathBuf,
    pub classes: Vec<String>,
    pub inference_graph: PathBuf,
    pub filetype: String,
    pub min_confidence: f32,
    pub user_folders: bool,
    /// Resize target as (width, height)
    pub image_size: (u32, u32),
    pub minibatch_size: usize,
}

impl SuggestionConfig {
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let min_confidence = config
            .opt_f64("min_confidence")?
            .map_or(DEFAULT_MIN_CONFIDENCE, |v| v as f32);
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(Error::invalid(
                "min_confidence",
                format!("{} is outside [0, 1]", min_confidence),
            ));
        }

        let image_size = (
            config.opt_u32("image_width")?.unwrap_or(DEFAULT_IMAGE_SIZE.0),
            config.opt_u32("image_height")?.unwrap_or(DEFAULT_IMAGE_SIZE.1),
        );
        if image_size.0 == 0 || image_size.1 == 0 {
            return Err(Error::invalid("image_width", "resize target must be non-zero"));
        }

        let minibatch_size = config
            .opt_u32("minibatch_size")?
            .map_or(DEFAULT_MINIBATCH_SIZE, |n| n as usize);
        if minibatch_size == 0 {
            return Err(Error::invalid("minibatch_size", "must be at least 1"));
        }

        let filetype = config
            .opt_string("filetype")?
            .unwrap_or_else(|| DEFAULT_FILETYPE.to_owned());
        glob::Pattern::new(&filetype).map_err(|source| Error::Pattern {
            pattern: filetype.clone(),
            source,
        })?;

        let cfg = SuggestionConfig {
            image_dir: config.path_value("image_dir")?,
            untagged_output: config.path_value("untagged_output")?,
            tagged_output: config.path_value("tagged_predictions")?,
            cur_tagged: config.path_value("tagged_output")?,
            cur_tagging: config.path_value("tagging_output")?,
            classes: config.classes()?,
            inference_graph: config
                .path_value("inference_output_dir")?
                .join(INFERENCE_GRAPH_FILE),
            filetype,
            min_confidence,
            user_folders: config.user_folders()?,
            image_size,
            minibatch_size,
        };

        require_dir(&cfg.image_dir)?;
        require_file(&cfg.cur_tagged)?;
        require_file(&cfg.cur_tagging)?;

        Ok(cfg)
    }
}

/// Settings for the record stage.
#[derive(Debug, Clone)]
pub struct RecordConfig {
    pub tagged_ledger: PathBuf,
    pub record_location: PathBuf,
    pub image_dir: PathBuf,
    pub user_folders: bool,
    pub classes: Vec<String>,
    pub test_file: Option<PathBuf>,
    pub split: SplitPlan,
}

impl RecordConfig {
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let names = config
            .opt_list("split_names")?
            .unwrap_or_else(|| vec!["train".to_owned(), "val".to_owned()]);
        let fractions = match config.opt_list("split_percent")? {
            None => vec![0.7, 0.3],
            Some(values) => values
                .iter()
                .map(|v| {
                    v.parse::<f64>()
                        .map_err(|_| Error::invalid("split_percent", format!("'{}' is not a number", v)))
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let seed = config.opt_u64("split_seed")?.unwrap_or(DEFAULT_SPLIT_SEED);

        let cfg = RecordConfig {
            tagged_ledger: config.path_value("tagged_output")?,
            record_location: config.path_value("tf_record_location")?,
            image_dir: config.path_value("image_dir")?,
            user_folders: config.user_folders()?,
            classes: config.classes()?,
            test_file: config.opt_path("test_output")?,
            split: SplitPlan::new(names, fractions, seed)?,
        };

        require_file(&cfg.tagged_ledger)?;
        require_dir(&cfg.image_dir)?;
        if let Some(test_file) = &cfg.test_file {
            require_file(test_file)?;
        }

        Ok(cfg)
    }
}
