//! Loop wiring for the working-memory training daemon.
//!
//! Builds the Train and Test stacks, registers every named hook, and owns
//! the shared context the hooks mutate. The ordering contracts live here:
//! reward is applied at the minus-phase boundary before the phase
//! statistics are taken, and periodic testing interrupts training between
//! epochs without touching the training counters.

use simloop::prelude::*;
use sir_task::{ActionSource, SirEnv};
use thiserror::Error;
use tracing::{debug, info};

use crate::net::ScriptedNet;

/// Settling cycles per trial.
pub const CYCLES_PER_TRIAL: usize = 100;
/// Cycle tick at which the minus phase ends and the target is clamped.
pub const MINUS_PHASE_END: usize = 75;
/// A unit within this distance of its target contributes no error.
const SSE_TOLERANCE: f64 = 0.5;
/// Width of the stimulus alphabet.
const N_STIM: usize = 4;

/// Learning layers the reward modulator scales.
pub const LRATE_TARGETS: [&str; 3] = ["GateGo", "GateNoGo", "RewPred"];

/// Columns snapshotted into every log row.
const LOG_COLUMNS: [&str; 13] = [
    "Run", "Epoch", "Trial", "TrialName", "SSE", "TrlErr", "AvgSSE", "PctErr", "PctCor", "NZero",
    "FirstZero", "Reward", "LrateMult",
];

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Everything the hooks read and write.
pub struct SimCtx {
    pub config: RunConfig,
    pub net: ScriptedNet,
    pub train_env: SirEnv,
    pub test_env: SirEnv,
    pub stats: Stats,
    pub logs: LogBook,
    pub reward: RewardModulator,
    pub view: Box<dyn Viewer>,
}

impl SimCtx {
    fn env(&self, mode: Mode) -> &SirEnv {
        match mode {
            Mode::Train => &self.train_env,
            Mode::Test => &self.test_env,
        }
    }

    fn env_mut(&mut self, mode: Mode) -> &mut SirEnv {
        match mode {
            Mode::Train => &mut self.train_env,
            Mode::Test => &mut self.test_env,
        }
    }
}

/// Every key a hook or predicate reads, primed at run start so a missing
/// key can only mean a wiring defect.
fn init_run_stats(stats: &mut Stats) {
    stats.set_int("Run", 0);
    stats.set_int("Epoch", 0);
    stats.set_int("Trial", 0);
    stats.set_str("TrialName", "");
    stats.set_float("SSE", 0.0);
    stats.set_float("TrlErr", 0.0);
    stats.set_float("SumSSE", 0.0);
    stats.set_float("SumErr", 0.0);
    stats.set_float("NTrials", 0.0);
    stats.set_float("AvgSSE", 0.0);
    stats.set_float("PctErr", 0.0);
    stats.set_float("PctCor", 0.0);
    stats.set_int("NZero", 0);
    stats.set_int("FirstZero", -1);
    stats.set_int("LastZero", -1);
    stats.set_float("Reward", 0.0);
    stats.set_float("LrateMult", 1.0);
}

pub struct Sim {
    pub ctx: SimCtx,
    pub loops: Stacks<SimCtx>,
}

impl Sim {
    pub fn new(
        config: RunConfig,
        mod_cfg: RewardModConfig,
        gate_noise: f32,
        seed: u64,
        make_schedule: impl Fn() -> Box<dyn ActionSource>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let net = ScriptedNet::sir_default(gate_noise, seed)?;
        let n_trials = config.n_trials as usize;
        let train_env = SirEnv::new("Train", N_STIM, n_trials, make_schedule(), seed);
        let test_env = SirEnv::new("Test", N_STIM, n_trials, make_schedule(), seed.wrapping_add(1));

        let mut logs = LogBook::new();
        for col in LOG_COLUMNS {
            logs.add_column(col);
        }

        let mut loops: Stacks<SimCtx> = Stacks::new();
        loops
            .add_stack(Mode::Train)?
            .add_scale(TimeScale::Run, config.n_runs as usize)?
            .add_scale(TimeScale::Epoch, config.n_epochs as usize)?
            .add_scale(TimeScale::Trial, n_trials)?
            .add_scale(TimeScale::Cycle, CYCLES_PER_TRIAL)?;
        loops
            .add_stack(Mode::Test)?
            .add_scale(TimeScale::Epoch, 1)?
            .add_scale(TimeScale::Trial, n_trials)?
            .add_scale(TimeScale::Cycle, CYCLES_PER_TRIAL)?;

        wire_cycle(&mut loops)?;
        wire_trial(&mut loops)?;
        wire_epoch(&mut loops)?;
        wire_run(&mut loops)?;

        loops.add_on_end_to_all("UpdateView", |_mode, _scale| {
            Box::new(|ctx: &mut SimCtx, ctl: &mut Ctl| {
                if ctx.view.is_visible() {
                    ctx.view.refresh(&ctl.snapshot());
                }
                Ok(())
            })
        })?;

        let mut stats = Stats::new();
        init_run_stats(&mut stats);

        Ok(Self {
            ctx: SimCtx {
                config,
                net,
                train_env,
                test_env,
                stats,
                logs,
                reward: RewardModulator::new(mod_cfg),
                view: Box::new(NullView),
            },
            loops,
        })
    }

    /// Train to completion (or early stop).
    pub fn run(&mut self) -> Result<Outcome, RunError> {
        self.loops.run(Mode::Train, &mut self.ctx)
    }

    pub fn stop_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.loops.stop_handle()
    }
}

fn wire_cycle(loops: &mut Stacks<SimCtx>) -> Result<(), ConfigError> {
    for mode in [Mode::Train, Mode::Test] {
        let cyc = loops.loop_mut(mode, TimeScale::Cycle)?;
        cyc.main.add("Cycle", |ctx: &mut SimCtx, _ctl: &mut Ctl| {
            ctx.net.step_cycle();
            Ok(())
        })?;

        let ev = cyc.add_event("PhaseShift", MINUS_PHASE_END)?;
        // Minus-phase statistics read the free response before the target
        // is clamped for the plus phase.
        ev.hooks.add("MinusPhaseStats", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let target = ctx.env(ctl.mode()).output_target();
            let acts = ctx.net.read_activation("Output")?;
            let mut sse = 0.0f64;
            for (i, &t) in target.iter().enumerate() {
                let a = acts.get(i).copied().unwrap_or(0.0) as f64;
                let d = (f64::from(t) - a).abs();
                if d > SSE_TOLERANCE {
                    sse += d * d;
                }
            }
            ctx.stats.set_float("SSE", sse);
            ctx.stats.set_float("TrlErr", if sse > 0.0 { 1.0 } else { 0.0 });
            Ok(())
        })?;
        ev.hooks.add("PlusPhaseClamp", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let target = ctx.env(ctl.mode()).output_target();
            ctx.net.apply_external_input("Output", &target)?;
            Ok(())
        })?;
    }

    // Reward precedes the phase statistics, and only during training:
    // recall trials score the minus-phase response, drive the reward
    // input, and set the learning-rate multiplier for the plus phase.
    loops
        .loop_mut(Mode::Train, TimeScale::Cycle)?
        .event_mut("PhaseShift")?
        .hooks
        .insert_before(
            "MinusPhaseStats",
            "ApplyReward",
            |ctx: &mut SimCtx, _ctl: &mut Ctl| {
                if ctx.train_env.act.recall_slot().is_none() {
                    return Ok(());
                }
                let resp = ctx.net.arg_max_output("Output")?;
                if let Some(r) = ctx.train_env.set_reward(resp) {
                    let pat = ctx.train_env.reward_pattern();
                    ctx.net.apply_external_input("Rew", &pat)?;
                    let mult = ctx.reward.apply(&mut ctx.net)?;
                    ctx.stats.set_float("Reward", f64::from(r));
                    ctx.stats.set_float("LrateMult", f64::from(mult));
                }
                Ok(())
            },
        )?;
    Ok(())
}

fn wire_trial(loops: &mut Stacks<SimCtx>) -> Result<(), ConfigError> {
    for mode in [Mode::Train, Mode::Test] {
        let tr = loops.loop_mut(mode, TimeScale::Trial)?;
        tr.on_start.add("ApplyInputs", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let (label, input, cue) = {
                let env = ctx.env_mut(ctl.mode());
                env.step();
                (env.trial_label(), env.input_pattern(), env.ctrl_pattern())
            };
            ctx.stats.set_int("Trial", ctl.cur(TimeScale::Trial) as i64);
            ctx.stats.set_str("TrialName", label);
            ctx.net.begin_trial();
            ctx.net.apply_external_input("Input", &input)?;
            ctx.net.apply_external_input("CtrlInput", &cue)?;
            ctx.net.apply_external_input("Output", &[0.0; N_STIM])?;
            Ok(())
        })?;
        tr.on_end.add("TrialStats", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let sse = ctx.stats.float("SSE")?;
            let err = ctx.stats.float("TrlErr")?;
            let sum_sse = ctx.stats.float("SumSSE")? + sse;
            let sum_err = ctx.stats.float("SumErr")? + err;
            let n = ctx.stats.float("NTrials")? + 1.0;
            ctx.stats.set_float("SumSSE", sum_sse);
            ctx.stats.set_float("SumErr", sum_err);
            ctx.stats.set_float("NTrials", n);
            ctx.logs.commit_row(ctl.mode(), TimeScale::Trial, &ctx.stats)?;
            Ok(())
        })?;
    }
    Ok(())
}

fn wire_epoch(loops: &mut Stacks<SimCtx>) -> Result<(), ConfigError> {
    // Periodic testing fires before the epoch's own init so the test
    // sub-run cannot disturb the accumulators of the epoch about to run.
    loops
        .loop_mut(Mode::Train, TimeScale::Epoch)?
        .on_start
        .add("TestAtInterval", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let interval = ctx.config.test_interval;
            if interval > 0 && (ctl.cur(TimeScale::Epoch) as i64 + 1) % interval == 0 {
                let run = ctx.stats.int("Run")? as usize;
                ctx.test_env.init(run);
                ctl.request_run(Mode::Test);
            }
            Ok(())
        })?;

    for mode in [Mode::Train, Mode::Test] {
        let ep = loops.loop_mut(mode, TimeScale::Epoch)?;
        ep.on_start.add("EpochInit", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            ctx.stats.set_int("Epoch", ctl.cur(TimeScale::Epoch) as i64);
            ctx.stats.set_float("SumSSE", 0.0);
            ctx.stats.set_float("SumErr", 0.0);
            ctx.stats.set_float("NTrials", 0.0);
            Ok(())
        })?;
        ep.on_end.add("EpochStats", |ctx: &mut SimCtx, ctl: &mut Ctl| {
            let mode = ctl.mode();
            let n = ctx.stats.float("NTrials")?;
            let (avg_sse, pct_err) = if n > 0.0 {
                (
                    ctx.stats.float("SumSSE")? / n,
                    ctx.stats.float("SumErr")? / n,
                )
            } else {
                (0.0, 0.0)
            };
            ctx.stats.set_float("AvgSSE", avg_sse);
            ctx.stats.set_float("PctErr", pct_err);
            ctx.stats.set_float("PctCor", 1.0 - pct_err);
            if mode == Mode::Train {
                let epoch = ctl.cur(TimeScale::Epoch) as i64;
                if pct_err == 0.0 {
                    let nz = ctx.stats.int("NZero")? + 1;
                    ctx.stats.set_int("NZero", nz);
                    if ctx.stats.int("FirstZero")? < 0 {
                        ctx.stats.set_int("FirstZero", epoch);
                    }
                    ctx.stats.set_int("LastZero", epoch);
                } else {
                    ctx.stats.set_int("NZero", 0);
                }
            }
            ctx.logs.commit_row(mode, TimeScale::Epoch, &ctx.stats)?;
            debug!(
                %mode,
                "{}",
                ctx.stats.print(&["Epoch", "PctErr", "PctCor", "NZero", "LrateMult"])
            );
            Ok(())
        })?;
    }

    loops
        .loop_mut(Mode::Train, TimeScale::Epoch)?
        .add_done("NZeroStop", |ctx: &SimCtx| {
            Ok(ctx.stats.int("NZero")? >= ctx.config.n_zero_stop())
        })?;
    Ok(())
}

fn wire_run(loops: &mut Stacks<SimCtx>) -> Result<(), ConfigError> {
    let run_loop = loops.loop_mut(Mode::Train, TimeScale::Run)?;
    run_loop.on_start.add("NewRun", |ctx: &mut SimCtx, ctl: &mut Ctl| {
        let run = ctl.cur(TimeScale::Run);
        init_run_stats(&mut ctx.stats);
        ctx.stats.set_int("Run", run as i64);
        ctx.train_env.init(run);
        ctx.test_env.init(run);
        ctx.net.init_weights();
        ctx.reward.lrate_mult = 1.0;
        for mode in [Mode::Train, Mode::Test] {
            for scale in [TimeScale::Epoch, TimeScale::Trial] {
                ctx.logs.reset(mode, scale);
            }
        }
        info!(run, "run start");
        Ok(())
    })?;
    run_loop.on_end.add("RunStats", |ctx: &mut SimCtx, ctl: &mut Ctl| {
        ctx.logs.commit_row(Mode::Train, TimeScale::Run, &ctx.stats)?;
        info!(
            run = ctl.cur(TimeScale::Run),
            "{}",
            ctx.stats.print(&["FirstZero", "LastZero", "PctCor"])
        );
        Ok(())
    })?;
    Ok(())
}
