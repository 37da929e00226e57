#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::BTreeMap;
use std::path::PathBuf;

use abstutil::{prettyprint_usize, Timer};
use anyhow::Result;
use structopt::StructOpt;

use dataset::{
    BatchIter, DatasetConfig, GeoJsonDump, PhysicalContext, ProcessedData, Provenance, Split,
    TrajectoryDataset,
};
use forecast::{save_ranking, ConstantVelocity};

#[derive(StructOpt)]
struct Args {
    /// A TOML file with dataset settings. Missing fields keep their defaults.
    #[structopt(long)]
    config: Option<PathBuf>,
    /// The directory holding `train/`, `val/`, and `test/`
    #[structopt(long)]
    root: Option<PathBuf>,
    #[structopt(long)]
    split: Option<Split>,
    #[structopt(long)]
    split_percentage: Option<f64>,
    #[structopt(long)]
    seed: Option<u64>,
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Windows the raw logs of a split and caches the result
    Preprocess,
    /// Summarizes a cached split
    Inspect {
        /// Write the first few batches as GeoJSON files here
        #[structopt(long)]
        geojson: Option<PathBuf>,
        #[structopt(long, default_value = "1")]
        batches: usize,
        #[structopt(long)]
        physical_context: Option<PhysicalContext>,
    },
    /// Draws batches like training would and reports what was sampled
    Sample {
        #[structopt(long, default_value = "1")]
        epochs: usize,
    },
    /// Scores a constant-velocity forecast
    Evaluate {
        #[structopt(long, default_value = "6")]
        modes: usize,
        /// Write the per-scene error ranking used for hard mining here
        #[structopt(long)]
        ranking: Option<PathBuf>,
    },
}

impl Args {
    fn dataset_config(&self) -> Result<DatasetConfig> {
        let mut cfg = match self.config {
            Some(ref path) => DatasetConfig::load(path)?,
            None => DatasetConfig::default(),
        };
        if let Some(ref root) = self.root {
            cfg.root = root.clone();
        }
        if let Some(split) = self.split {
            cfg.split = split;
        }
        if let Some(x) = self.split_percentage {
            cfg.split_percentage = x;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    abstutil::logger::setup();
    let args = Args::from_iter(abstutil::cli_args());
    let mut cfg = args.dataset_config()?;
    let mut timer = Timer::new("argoverse-prep");

    match args.cmd {
        Command::Preprocess => {
            let data = ProcessedData::build(&cfg, &mut timer)?;
            dataset::cache::save(&data, &cfg)?;
            info!(
                "Cached {} scenes with {} agents in {}",
                prettyprint_usize(data.num_scenes()),
                prettyprint_usize(data.total_agents()),
                cfg.cache_dir().display()
            );
        }
        Command::Inspect {
            geojson,
            batches,
            physical_context,
        } => {
            if let Some(x) = physical_context {
                cfg.physical_context = x;
            }
            let mut ds = TrajectoryDataset::new(cfg, &mut timer)?;
            summarize(&ds);
            if let Some(dir) = geojson {
                let dump = GeoJsonDump::new(&dir)?;
                let mut iter = BatchIter::new(&mut ds).with_inspector(Box::new(dump));
                for _ in 0..batches {
                    if iter.next_batch()?.is_none() {
                        break;
                    }
                }
                info!("Dumped scenes to {}", dir.display());
            }
        }
        Command::Sample { epochs } => {
            let mut ds = TrajectoryDataset::new(cfg, &mut timer)?;
            sample(&mut ds, epochs, &mut timer)?;
        }
        Command::Evaluate { modes, ranking } => {
            if cfg.split == Split::Test {
                bail!("The test split has no future to evaluate against");
            }
            let decoder = ConstantVelocity::new(modes, cfg.pred_len);
            let mut ds = TrajectoryDataset::new(cfg, &mut timer)?;
            let mut iter = BatchIter::new(&mut ds);
            let result = forecast::evaluate(&decoder, &mut iter, &mut timer)?;
            println!("{}", serde_json::to_string_pretty(&result.metrics)?);
            if let Some(path) = ranking {
                save_ranking(&result.scenes, path)?;
            }
        }
    }
    Ok(())
}

fn summarize(ds: &TrajectoryDataset) {
    let data = ds.data();
    let (straight, curved) = data.scenes_by_linearity();
    println!(
        "{} split: {} scenes, {} agents, {} timesteps per track",
        ds.config().split.name(),
        prettyprint_usize(data.num_scenes()),
        prettyprint_usize(data.total_agents()),
        data.track_len()
    );
    println!(
        "AGENT tracks: {} straight, {} curved",
        prettyprint_usize(straight.len()),
        prettyprint_usize(curved.len())
    );
    println!("Bounds: {:?}", data.norm);
}

fn sample(ds: &mut TrajectoryDataset, epochs: usize, timer: &mut Timer) -> Result<()> {
    let mut draws: BTreeMap<usize, usize> = BTreeMap::new();
    let mut curved = 0;
    let mut hard = 0;
    let mut total = 0;

    let mut iter = BatchIter::new(ds);
    for epoch in 0..epochs {
        iter.reset();
        timer.start_iter(&format!("epoch {}", epoch + 1), iter.num_batches());
        while let Some(batch) = iter.next_batch()? {
            timer.next();
            for (scene, row) in batch.reference_rows().into_iter().enumerate() {
                *draws.entry(batch.scene_index[scene]).or_insert(0) += 1;
                if batch.non_linear[row] > 0.5 {
                    curved += 1;
                }
                if batch.provenance[scene] == Provenance::HardMining {
                    hard += 1;
                }
                total += 1;
            }
        }
    }
    if total == 0 {
        bail!("Nothing was sampled");
    }

    println!(
        "{} draws over {} distinct scenes",
        prettyprint_usize(total),
        prettyprint_usize(draws.len())
    );
    println!(
        "{:.1}% curved, {:.1}% from hard mining",
        100.0 * curved as f64 / total as f64,
        100.0 * hard as f64 / total as f64
    );
    if let Some((scene, count)) = draws.iter().max_by_key(|(_, count)| **count) {
        println!("Most drawn: scene {scene}, {count} times");
    }
    Ok(())
}
