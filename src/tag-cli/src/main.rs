use std::error::Error;
use std::path::PathBuf;
use structopt::StructOpt;
use tag_pipeline::{ConfigFile, RecordConfig, SuggestionConfig};

use log::info;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tagging",
    about = "Suggest bounding boxes for unlabeled images and build TFRecord training shards"
)]
enum Command {
    /// Run the detector over the image directory and write suggestion CSVs
    Suggest {
        #[structopt(parse(from_os_str), help = "Pipeline config file")]
        config: PathBuf,

        #[structopt(
            long,
            parse(try_from_str = parse_batch_size),
            help = "Images per detector call, overrides minibatch_size"
        )]
        batch_size: Option<usize>,
    },

    /// Split the tagged ledger and write one TFRecord file per split
    Record {
        #[structopt(parse(from_os_str), help = "Pipeline config file")]
        config: PathBuf,

        #[structopt(long, help = "Shuffle seed, overrides split_seed")]
        seed: Option<u64>,
    },
}

fn parse_batch_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("batch size must be at least 1".to_owned()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("'{}' is not a batch size: {}", value, e)),
    }
}

#[cfg(feature = "tensorflow")]
fn suggest(config: &SuggestionConfig) -> Result<(), Box<dyn Error>> {
    let detector = tag_pipeline::TfDetector::load(&config.inference_graph, &config.classes)?;
    let summary = tag_pipeline::get_suggestions(&detector, config)?;

    for folder in &summary.folders {
        info!(
            "{}: {} images, mean confidence {:.3}",
            folder.folder, folder.images, folder.mean_confidence
        );
    }
    info!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

#[cfg(not(feature = "tensorflow"))]
fn suggest(_config: &SuggestionConfig) -> Result<(), Box<dyn Error>> {
    Err("this build has no detector; rebuild with `--features tensorflow`".into())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Command::from_args() {
        Command::Suggest { config, batch_size } => {
            let file = ConfigFile::load(&config)?;
            let mut cfg = SuggestionConfig::from_config(&file)?;
            if let Some(n) = batch_size {
                cfg.minibatch_size = n;
            }

            suggest(&cfg)?;
        }
        Command::Record { config, seed } => {
            let file = ConfigFile::load(&config)?;
            let mut cfg = RecordConfig::from_config(&file)?;
            if let Some(seed) = seed {
                cfg.split = cfg.split.with_seed(seed);
            }

            let summaries = tag_pipeline::create_tf_records(&cfg)?;
            for split in &summaries {
                info!(
                    "{}: {} examples in {}",
                    split.name,
                    split.examples,
                    split.path.display()
                );
            }
            info!("{}", serde_json::to_string(&summaries)?);
        }
    }

    Ok(())
}
