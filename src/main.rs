use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stimplan::cli::{blocks, design, generate, plan, sanity, segments};
use stimplan::config::Config;
use stimplan::planner::{Layout, PlanMode, Planner};
use stimplan::probe::ProbeChain;
use stimplan::segment::{GenerateOptions, SegmentPolicy};
use stimplan::trial::Trace;

#[derive(Parser)]
#[command(name = "stimplan")]
#[command(about = "Trial condition generation and music session planning for stimulus experiments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ./stimplan.yaml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate 1-back trials covering distinct location/object pairs
    Oneback {
        /// Number of distinct ordered pairs (5..=64)
        #[arg(long)]
        ntcs: usize,
        /// Positions per trial
        #[arg(long, default_value_t = 6)]
        seq_len: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_enum, default_value_t = Trace::Pairs)]
        trace: Trace,
        /// Output CSV
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Generate balanced unique multi-object task conditions
    Conditions {
        #[arg(long)]
        ntcs: usize,
        /// Objects per condition
        #[arg(long)]
        nobjs: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, value_enum, default_value_t = Trace::Nodes)]
        trace: Trace,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Split a trial table into disjoint block files
    Partition {
        input: PathBuf,
        #[arg(short = 'n', long)]
        blocks: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(short, long)]
        out_dir: PathBuf,
        /// Block file stem (default: input file stem)
        #[arg(long)]
        stem: Option<String>,
    },

    /// Draw rows from a trial table without replacement
    Sample {
        input: PathBuf,
        #[arg(short = 'n', long)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Order a session's block files into the subject design
    Design {
        block_dir: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: u32,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Check a trial table for repeated pairs and broken adjacency
    Sanity {
        input: PathBuf,
        /// Also check condition uniqueness and object balance
        #[arg(long)]
        conditions: bool,
        #[arg(long)]
        json: bool,
    },

    /// Write segment configs for every song of a catalog
    Segments {
        /// Subject music root holding shared/ and favorite/
        root: PathBuf,
        #[arg(long)]
        out_shared: Option<PathBuf>,
        #[arg(long)]
        out_favorite: Option<PathBuf>,
        #[arg(long, default_value_t = 1234)]
        seed: u64,
        #[arg(long, default_value_t = 30.0)]
        shared_len: f64,
        #[arg(long, default_value_t = 30.0)]
        favorite_len: f64,
        #[arg(long, default_value_t = 60.0)]
        shared_max_start: f64,
        #[arg(long, default_value_t = 120.0)]
        favorite_max_start: f64,
        /// Start every shared segment at the minimum start
        #[arg(long)]
        fixed_shared: bool,
        /// Start every favorite segment at the minimum start
        #[arg(long)]
        fixed_favorite: bool,
        #[arg(long)]
        no_clamp: bool,
        #[arg(long)]
        subset_shared: Option<usize>,
        #[arg(long)]
        subset_favorite: Option<usize>,
    },

    /// Plan sessions/episodes into per-block plan and playlist files
    Plan {
        /// Subject music root holding shared/ and favorite/
        root: PathBuf,
        #[arg(long)]
        subject: String,
        /// Number of sessions/episodes to plan
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Number of the first session/episode
        #[arg(long, default_value_t = 1)]
        first: u32,
        /// Explicit ids, overriding --count/--first
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, value_enum, default_value_t = PlanMode::New)]
        mode: PlanMode,
        /// Session date written into every row (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        blocks: Option<usize>,
        #[arg(long)]
        blocks_per_session: Option<usize>,
        #[arg(long, value_enum)]
        layout: Option<Layout>,
        /// Fail unless every song has a configured segment
        #[arg(long)]
        config_only: bool,
        /// Print the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Oneback {
            ntcs,
            seq_len,
            seed,
            trace,
            out,
        } => {
            generate::oneback(ntcs, seq_len, seed, trace, &out)?;
        }
        Commands::Conditions {
            ntcs,
            nobjs,
            seed,
            trace,
            out,
        } => {
            generate::conditions(ntcs, nobjs, seed, trace, &out)?;
        }
        Commands::Partition {
            input,
            blocks: n_blocks,
            seed,
            out_dir,
            stem,
        } => {
            blocks::partition(&input, n_blocks, seed, &out_dir, stem)?;
        }
        Commands::Sample {
            input,
            count,
            seed,
            out,
        } => {
            blocks::sample(&input, count, seed, out)?;
        }
        Commands::Design {
            block_dir,
            subject,
            session,
            seed,
            out_dir,
        } => {
            design::run(&block_dir, &subject, session, seed, &out_dir)?;
        }
        Commands::Sanity {
            input,
            conditions,
            json,
        } => {
            sanity::run(&input, conditions, json)?;
        }
        Commands::Segments {
            root,
            out_shared,
            out_favorite,
            seed,
            shared_len,
            favorite_len,
            shared_max_start,
            favorite_max_start,
            fixed_shared,
            fixed_favorite,
            no_clamp,
            subset_shared,
            subset_favorite,
        } => {
            let mut opts = GenerateOptions {
                seed,
                min_start: config.segments.min_start,
                clamp_to_duration: !no_clamp,
                ..GenerateOptions::default()
            };
            opts.shared.len = shared_len;
            opts.shared.max_start = shared_max_start;
            opts.shared.randomize = !fixed_shared;
            opts.shared.subset = subset_shared;
            opts.favorite.len = favorite_len;
            opts.favorite.max_start = favorite_max_start;
            opts.favorite.randomize = !fixed_favorite;
            opts.favorite.subset = subset_favorite;

            let out_shared = out_shared.unwrap_or_else(|| root.join("segments_shared.json"));
            let out_favorite = out_favorite.unwrap_or_else(|| root.join("segments_favorite.json"));
            segments::run(&config, &root, &out_shared, &out_favorite, &opts)?;
        }
        Commands::Plan {
            root,
            subject,
            count,
            first,
            ids,
            mode,
            date,
            blocks: n_blocks,
            blocks_per_session,
            layout,
            config_only,
            dry_run,
        } => {
            let layout = layout.unwrap_or(config.planner.layout);
            let ids = if ids.is_empty() { layout.ids(first, count) } else { ids };
            let date = date.unwrap_or_else(|| Local::now().date_naive());

            let mut req = config.plan_request(&root, &subject, ids, date);
            req.layout = layout;
            req.mode = mode;
            if let Some(n) = n_blocks {
                req.n_blocks = n;
            }
            if blocks_per_session.is_some() {
                req.blocks_per_session = blocks_per_session;
            }
            if config_only {
                req.segments.policy = SegmentPolicy::ConfigOnly;
            }

            let planner = Planner::new(ProbeChain::new(&config));
            plan::run(&planner, &req, dry_run)?;
        }
    }

    Ok(())
}
