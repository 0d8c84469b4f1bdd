//! `hhhscan` command-line front end.
//!
//! Report lines go to stdout, diagnostics to stderr through `log`.

use clap::{Args, Parser, Subcommand};
use hhhscan_core::driver::{extract, run_hashpipe, Driver, DriverOptions, InjectOptions};
use hhhscan_core::trace::{TraceFormat, TraceReader, TraceWriter};
use hhhscan_core::{telemetry, CollisionStrategy, Config, CountMode, Engine, EngineKind, LineSink, Result};
use log::{error, info};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "hhhscan")]
#[command(about = "Hierarchical heavy-hitter detection over IPv4 packet traces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an HHH engine over one or more pdat traces
    Analyze(AnalyzeArgs),

    /// Estimate the heaviest sources of a trace interval with HashPipe
    Hashpipe {
        /// Input pdat trace
        file: PathBuf,
        /// Number of stages
        stages: usize,
        /// Total number of slots
        slots: usize,
        /// Interval start after the first packet (usec)
        offset: u64,
        /// Interval length (usec), 0 for the rest of the trace
        time: u64,
    },

    /// Copy one time interval of a trace into a new file
    Extract {
        /// Write `src,0.0.0.0,0,0,0` CSV lines instead of pdat records
        #[arg(short = 'c', long)]
        csv: bool,
        /// Interval start after the first packet (usec)
        #[arg(short = 'o', long, default_value_t = 0)]
        offset: u64,
        /// Interval length (usec), 0 for the rest of the trace
        #[arg(short = 't', long, default_value_t = 0)]
        time: u64,
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// TOML configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// online, hashed or offline (a memory budget alone selects hashed)
    #[arg(long)]
    engine: Option<EngineKind>,

    /// Root prefix length
    #[arg(short = 'x', long)]
    first_len: Option<u8>,

    /// Leaf prefix length
    #[arg(long)]
    last_len: Option<u8>,

    /// Active timeout (usec)
    #[arg(short = 'a', long)]
    active_timeout: Option<u64>,

    /// Inactive timeout (usec)
    #[arg(short = 'i', long)]
    inactive_timeout: Option<u64>,

    /// Occupancy report period (usec)
    #[arg(short = 'R', long)]
    report_granularity: Option<u64>,

    #[arg(short = 't', long)]
    threshold: Option<u64>,

    /// Threshold from a rate per second
    #[arg(short = 's', long)]
    speed: Option<u64>,

    /// Threshold as a fraction of the window total (offline)
    #[arg(short = 'q', long)]
    quotient: Option<f64>,

    /// Per-depth window divider
    #[arg(short = 'd', long)]
    divider: Option<u64>,

    /// ignore, skip, adapt-bit, adapt-full (or 0..3)
    #[arg(short = 'c', long)]
    collision_strategy: Option<CollisionStrategy>,

    /// Slots shared by all hashed layers
    #[arg(short = 'm', long = "memory")]
    memory_budget: Option<u64>,

    /// bytes, packets or flows
    #[arg(long)]
    mode: Option<CountMode>,

    /// Also print pure heavy hitters
    #[arg(short = 'H', long)]
    pure_heavy: bool,

    /// Report every change of the tree
    #[arg(short = 'r', long)]
    reports: bool,

    /// Stop after the first window (offline)
    #[arg(short = 'S', long)]
    first_shot: bool,

    /// Do not seed the parent with the packet that collapsed a node
    #[arg(long)]
    no_collapse_accumulate: bool,

    /// Check staleness during lookup instead of on the found node
    #[arg(short = 'v', long)]
    legacy_invalidation: bool,

    /// Bloom filter size limit (bits per filter)
    #[arg(short = 'b', long)]
    bloom_max_bits: Option<u64>,

    /// Bloom filter false positive probability
    #[arg(short = 'B', long)]
    bloom_false_positive: Option<f64>,

    /// Bloom filter projected elements
    #[arg(short = 'e', long)]
    bloom_projected_elements: Option<u64>,

    /// Start offset after the first packet (usec)
    #[arg(short = 'O', long, default_value_t = 0)]
    offset: u64,

    /// pdat trace injected into the input
    #[arg(short = 'I', long)]
    inject: Option<PathBuf>,

    /// Where the injected trace starts (usec after the input start)
    #[arg(short = 'T', long, default_value_t = 0)]
    inject_time: u64,

    /// Injection sampling numerator
    #[arg(short = 'N', long, default_value_t = 1)]
    inject_num: u32,

    /// Injection sampling denominator
    #[arg(short = 'D', long, default_value_t = 1)]
    inject_den: u32,

    /// Input pdat traces, read in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl AnalyzeArgs {
    fn config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        match self.engine {
            Some(kind) => cfg.engine = kind,
            None if self.memory_budget.is_some() && cfg.engine == EngineKind::Online => {
                cfg.engine = EngineKind::Hashed
            }
            None => {}
        }

        macro_rules! set {
            ($($field:ident),*) => {$(
                if let Some(v) = self.$field {
                    cfg.$field = v;
                }
            )*};
        }
        set!(first_len, last_len, active_timeout, inactive_timeout, report_granularity, divider, collision_strategy, mode);

        // a CLI threshold source replaces whatever the file chose
        if self.threshold.is_some() || self.speed.is_some() || self.quotient.is_some() {
            cfg.threshold = self.threshold;
            cfg.speed = self.speed;
            cfg.quotient = self.quotient;
        }
        if self.memory_budget.is_some() {
            cfg.memory_budget = self.memory_budget;
        }

        cfg.pure_heavy |= self.pure_heavy;
        cfg.reports |= self.reports;
        cfg.first_shot |= self.first_shot;
        if self.no_collapse_accumulate {
            cfg.collapse_accumulate = false;
        }
        if self.legacy_invalidation {
            cfg.new_invalidation = false;
        }

        if let Some(v) = self.bloom_max_bits {
            cfg.bloom.max_bits = v;
        }
        if let Some(v) = self.bloom_false_positive {
            cfg.bloom.false_positive = v;
        }
        if let Some(v) = self.bloom_projected_elements {
            cfg.bloom.projected_elements = v;
        }
        Ok(cfg)
    }

    fn inject_options(&self) -> InjectOptions {
        InjectOptions {
            time: self.inject_time,
            num: self.inject_num,
            den: self.inject_den,
        }
    }
}

fn analyze(args: &AnalyzeArgs) -> Result<()> {
    let engine = Engine::from_config(args.config()?)?;
    let mut driver = Driver::new(engine, DriverOptions { offset: args.offset });
    if let Some(path) = &args.inject {
        driver.inject(TraceReader::open(path)?, args.inject_options())?;
    }

    let mut sink = LineSink::new(BufWriter::new(io::stdout().lock()));
    for file in &args.files {
        info!("reading {}", file.display());
        if !driver.run(TraceReader::open(file)?, &mut sink)? {
            info!("engine stopped, remaining input ignored");
            break;
        }
    }
    driver.finish(&mut sink);
    sink.finish()?;
    Ok(())
}

fn hashpipe(file: &Path, stages: usize, slots: usize, offset: u64, time: u64) -> Result<()> {
    let (pipe, _) = run_hashpipe(TraceReader::open(file)?, stages, slots, offset, time)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for (addr, count) in pipe.get_flows() {
        writeln!(out, "{addr},{count}")?;
    }
    out.flush()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Analyze(args) => analyze(&args),
        Commands::Hashpipe { file, stages, slots, offset, time } => hashpipe(&file, stages, slots, offset, time),
        Commands::Extract { csv, offset, time, input, output } => {
            let format = if csv { TraceFormat::Csv } else { TraceFormat::Binary };
            let mut writer = TraceWriter::create(&output, format)?;
            extract(TraceReader::open(&input)?, &mut writer, offset, time)?;
            writer.finish()?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    hhhscan_core::init();

    let cli = Cli::parse();
    let status = match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    };

    for (name, value) in telemetry::snapshot() {
        info!("{name} = {}", value.as_f64());
    }
    status
}
