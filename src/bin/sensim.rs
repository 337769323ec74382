//! Liquid-crystal sensor simulator CLI
//!
//! Shoots a beam through the cell (or replays a recorded step trace) and
//! writes per-event electrometer records plus a run report.
//!
//! # Example
//!
//! ```bash
//! # 1000 protons at 500 MeV, fixed seed, records in ./out
//! sensim -p proton -e "500 MeV" -n 1000 --seed 42 -o out
//!
//! # Replay recorded steps with a custom detector and 150 V bias
//! sensim --trace steps.txt --detector cell.toml --bias 150
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sensim::config::{parse_energy, BeamConfig, DetectorFile, SensorConfig};
use sensim::gen::{SyntheticBeam, Transport};
use sensim::run::{Run, RunSummary};
use sensim::trace::StepTrace;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uom::si::f64::{Energy, Frequency};
use uom::si::frequency::hertz;

/// Liquid-crystal sensor simulator
///
/// Results are reproducible for a given seed, whatever the number of
/// threads.
#[derive(Parser, Debug)]
#[command(name = "sensim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Beam particle (proton, gamma, e-, e+, neutron, alpha, ...)
    #[arg(short = 'p', long, default_value = "proton")]
    particle: String,

    /// Beam energy with its unit, e.g. "500 MeV"
    #[arg(short = 'e', long, default_value = "500 MeV", value_parser = parse_energy)]
    energy: Energy,

    /// Bias voltage across the cell in volts. Overrides the field of the detector file.
    #[arg(short = 'b', long)]
    bias: Option<f64>,

    /// Number of beam events. Ignored when replaying a trace.
    #[arg(short = 'n', long, default_value = "100")]
    events: u64,

    /// Worker threads. Defaults to the available parallelism.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// TOML detector description. Defaults to a 100 um cell at 3 V/um.
    #[arg(short = 'd', long)]
    detector: Option<PathBuf>,

    /// Replay recorded steps from this file instead of shooting the beam
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Directory for the output artifacts
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,

    /// Also write the decimated current series of every event
    #[arg(long)]
    series: bool,

    /// Put the glass filter in front of the beam
    #[arg(long)]
    glass_filter: bool,

    /// Mean beam rate in Hz. Events get Poisson-distributed start times.
    #[arg(long)]
    beam_rate: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,sensim=info")),
        )
        .init();

    let args = Args::parse();
    let seed = args.seed.unwrap_or_else(rand::random);
    let threads = args
        .threads
        .unwrap_or_else(|| thread::available_parallelism().map_or(1, NonZeroUsize::get));

    let mut detector = match &args.detector {
        Some(path) => DetectorFile::load(path)?,
        None => DetectorFile::lc_cell(),
    };
    if let Some(bias) = args.bias {
        detector.set_bias(bias);
    }
    let config = SensorConfig::try_from(detector).context("invalid detector description")?;
    let beam = BeamConfig::new(args.particle.as_str(), args.energy);

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let summary = match &args.trace {
        Some(path) => {
            let trace = StepTrace::load(path)?;
            info!(path = %path.display(), events = trace.num_events(), "replaying step trace");
            simulate(&args, &config, beam, &trace, threads, seed)?
        }
        None => {
            let source = SyntheticBeam::builder()
                .particle(&args.particle)
                .energy(args.energy)
                .events(args.events)
                .cell_thickness(config.cell_thickness())
                .glass_filter(args.glass_filter)
                .build()
                .context("invalid beam")?;
            simulate(&args, &config, beam, &source, threads, seed)?
        }
    };

    info!(
        events = summary.events,
        with_signal = summary.events_with_signal,
        seed,
        "done"
    );

    Ok(())
}

fn simulate<T: Transport + Sync>(
    args: &Args,
    config: &SensorConfig,
    beam: BeamConfig,
    transport: &T,
    threads: usize,
    seed: u64,
) -> Result<RunSummary> {
    let run = Run::builder()
        .config(config)
        .beam(beam)
        .transport(transport)
        .threads(threads)
        .seed(seed)
        .maybe_beam_rate(args.beam_rate.map(Frequency::new::<hertz>))
        .output_dir(args.output_dir.clone())
        .series(args.series)
        .setup()
        .context("invalid run settings")?;

    Ok(run.run())
}
