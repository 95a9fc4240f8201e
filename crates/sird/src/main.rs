//! sird - working-memory training daemon.
//!
//! Drives the Train/Test loop stacks over the Store-Ignore-Recall task,
//! logging per-trial and per-epoch statistics. Press Enter while a
//! session is running to stop it cooperatively at the next tick boundary.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use simloop::prelude::*;
use sir_task::{ActionSource, FixedCycle, SeededRandom, SirAction};
use tracing::info;

mod net;
mod sim;

use sim::{Sim, LRATE_TARGETS};

const USAGE: &str = "\
sird - working-memory training daemon

USAGE:
    sird [OPTIONS]

OPTIONS:
    --config <PATH>          JSON run configuration
    --runs <N>               override number of runs
    --epochs <N>             override epochs per run
    --trials <N>             override trials per epoch
    --nzero <N>              zero-error epochs before a run stops early
    --test-interval <N>      test every N training epochs (<=0 disables)
    --random-schedule        draw trial actions at random instead of the fixed cycle
    --modulate <sum|shannon> entropy source for learning-rate modulation
    --gate-noise <F>         probability a store action fails to gate (0..1)
    --seed <N>               base random seed
    -h, --help               print this help";

#[derive(Debug, Default)]
struct Opts {
    help: bool,
    config: Option<PathBuf>,
    n_runs: Option<i64>,
    n_epochs: Option<i64>,
    n_trials: Option<i64>,
    n_zero: Option<i64>,
    test_interval: Option<i64>,
    random_schedule: bool,
    modulate: Option<String>,
    gate_noise: f32,
    seed: u64,
}

impl Opts {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut opts = Opts {
            seed: 42,
            ..Opts::default()
        };
        let mut it = args;
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "-h" | "--help" => opts.help = true,
                "--config" => opts.config = Some(PathBuf::from(value(&mut it, &arg)?)),
                "--runs" => opts.n_runs = Some(int(&mut it, &arg)?),
                "--epochs" => opts.n_epochs = Some(int(&mut it, &arg)?),
                "--trials" => opts.n_trials = Some(int(&mut it, &arg)?),
                "--nzero" => opts.n_zero = Some(int(&mut it, &arg)?),
                "--test-interval" => opts.test_interval = Some(int(&mut it, &arg)?),
                "--random-schedule" => opts.random_schedule = true,
                "--modulate" => {
                    let v = value(&mut it, &arg)?;
                    if v != "sum" && v != "shannon" {
                        return Err(format!("--modulate expects sum or shannon, got {v}"));
                    }
                    opts.modulate = Some(v);
                }
                "--gate-noise" => {
                    let v = value(&mut it, &arg)?;
                    opts.gate_noise = v
                        .parse::<f32>()
                        .map_err(|_| format!("--gate-noise expects a number, got {v}"))?;
                }
                "--seed" => {
                    let v = value(&mut it, &arg)?;
                    opts.seed = v
                        .parse::<u64>()
                        .map_err(|_| format!("--seed expects an integer, got {v}"))?;
                }
                other => return Err(format!("unknown option: {other}")),
            }
        }
        Ok(opts)
    }
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next().ok_or_else(|| format!("{flag} needs a value"))
}

fn int(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<i64, String> {
    let v = value(it, flag)?;
    v.parse::<i64>()
        .map_err(|_| format!("{flag} expects an integer, got {v}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let opts = match Opts::parse(std::env::args().skip(1)) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };
    if opts.help {
        println!("{USAGE}");
        return Ok(());
    }

    let mut config = match &opts.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(v) = opts.n_runs {
        config.n_runs = v;
    }
    if let Some(v) = opts.n_epochs {
        config.n_epochs = v;
    }
    if let Some(v) = opts.n_trials {
        config.n_trials = v;
    }
    if let Some(v) = opts.n_zero {
        config.n_zero = v;
    }
    if let Some(v) = opts.test_interval {
        config.test_interval = v;
    }
    config.validate()?;

    let mod_cfg = match opts.modulate.as_deref() {
        Some("sum") => RewardModConfig {
            modulate: true,
            source: EntropySource::PopulationSum {
                layer: "Hidden".to_string(),
            },
            targets: LRATE_TARGETS.iter().map(|s| s.to_string()).collect(),
            burst_gain: 1.0,
            dip_gain: 1.0,
        },
        Some(_) => RewardModConfig {
            modulate: true,
            source: EntropySource::Shannon {
                layer: "Gate".to_string(),
            },
            targets: LRATE_TARGETS.iter().map(|s| s.to_string()).collect(),
            burst_gain: 1.0,
            dip_gain: 1.0,
        },
        None => RewardModConfig::default(),
    };

    let seed = opts.seed;
    let random = opts.random_schedule;
    let make_schedule = move || -> Box<dyn ActionSource> {
        if random {
            Box::new(SeededRandom::new(seed))
        } else {
            Box::new(FixedCycle::new(vec![
                SirAction::Store1,
                SirAction::Ignore,
                SirAction::Recall1,
                SirAction::Store2,
                SirAction::Ignore,
                SirAction::Recall2,
            ]))
        }
    };

    let mut sim = Sim::new(config, mod_cfg, opts.gate_noise, seed, make_schedule)?;
    info!(
        runs = config.n_runs,
        epochs = config.n_epochs,
        trials = config.n_trials,
        "training session start (press Enter to stop)"
    );

    let stop = sim.stop_handle();
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            stop.store(true, Ordering::Relaxed);
        }
    });

    let outcome = sim.run()?;
    info!(?outcome, "training session finished");

    let firsts = sim
        .ctx
        .logs
        .column_floats(Mode::Train, TimeScale::Run, "FirstZero")?;
    let solved = firsts.iter().filter(|&&f| f >= 0.0).count();
    let mean_first = if solved > 0 {
        firsts.iter().filter(|&&f| f >= 0.0).sum::<f64>() / solved as f64
    } else {
        -1.0
    };
    println!(
        "runs: {} solved: {} mean epochs to criterion: {:.1}",
        firsts.len(),
        solved,
        mean_first
    );
    println!(
        "{}",
        sim.ctx
            .stats
            .print(&["Run", "Epoch", "PctCor", "FirstZero", "LastZero"])
    );
    Ok(())
}
