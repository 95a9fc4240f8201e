//! The stack manager and the recursive-descent scheduler.
//!
//! A [`Stack`] is an ordered sequence of loops, one per time scale,
//! coarsest first, owned by one [`Mode`]. [`Stacks`] maps modes to stacks
//! and drives execution: for each tick of a loop, the next-finer loop runs
//! to completion, with named hooks and events fired in a total,
//! deterministic order.
//!
//! Execution is single-threaded and cooperative. The only suspension
//! points are the stop-flag checks performed at tick boundaries; a stop
//! finishes the in-flight hooks for the current tick, starts no new ticks,
//! and unwinds outward without firing the enclosing loops' end hooks.
//! Counters stay at the last committed tick, so a later `run()` resumes
//! where the stopped one left off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{ConfigError, RunError};
use crate::looper::{HookFn, Loop};
use crate::times::{Mode, TimeScale};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every scale ran its full range (or an `is_done` predicate cut it
    /// short); end hooks fired normally.
    Completed,
    /// The stop flag was observed; counters are resumable.
    Stopped,
}

/// A read-only snapshot of the running stack's counters, for viewers and
/// status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterView {
    pub mode: Mode,
    pub cur: [usize; TimeScale::N],
}

impl core::fmt::Display for CounterView {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.mode)?;
        for scale in TimeScale::ALL {
            write!(f, " {}: {}", scale, self.cur[scale.index()])?;
        }
        Ok(())
    }
}

/// The control surface handed to every hook.
///
/// Hooks read the current counters from here and may request a nested
/// mode switch or a cooperative stop; both requests are serviced by the
/// scheduler immediately after the requesting hook returns, before the
/// next hook fires.
#[derive(Debug)]
pub struct Ctl {
    mode: Mode,
    cur: [usize; TimeScale::N],
    run_request: Option<Mode>,
    stop_request: bool,
}

impl Ctl {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            cur: [0; TimeScale::N],
            run_request: None,
            stop_request: false,
        }
    }

    /// Mode of the stack this hook is firing under.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current tick of the given scale in the running stack. Scales above
    /// the stack's coarsest loop read as 0.
    pub fn cur(&self, scale: TimeScale) -> usize {
        self.cur[scale.index()]
    }

    /// Request a synchronous nested run of another mode's stack. The
    /// interrupted stack's counters are untouched; nesting is bounded to
    /// one level and a deeper request fails the run.
    pub fn request_run(&mut self, mode: Mode) {
        self.run_request = Some(mode);
    }

    /// Request a cooperative stop of the whole hierarchy.
    pub fn request_stop(&mut self) {
        self.stop_request = true;
    }

    pub fn snapshot(&self) -> CounterView {
        CounterView {
            mode: self.mode,
            cur: self.cur,
        }
    }
}

/// One mode's ordered sequence of loops, coarsest first.
pub struct Stack<C: 'static> {
    mode: Mode,
    loops: Vec<Loop<C>>,
}

impl<C: 'static> Stack<C> {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            loops: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Append a scale with the given counter max. Scales must be added
    /// coarsest to finest; the stack may start below [`TimeScale::Run`]
    /// (e.g. a Test stack with a single Epoch), but relative order must
    /// match the [`TimeScale`] ordering.
    pub fn add_scale(&mut self, scale: TimeScale, max: usize) -> Result<&mut Self, ConfigError> {
        if let Some(last) = self.loops.last() {
            if last.scale.index() >= scale.index() {
                return Err(ConfigError::ScaleOrder { scale });
            }
        }
        self.loops.push(Loop::new(scale, max));
        Ok(self)
    }

    pub fn loop_mut(&mut self, scale: TimeScale) -> Result<&mut Loop<C>, ConfigError> {
        let mode = self.mode;
        self.loops
            .iter_mut()
            .find(|l| l.scale == scale)
            .ok_or(ConfigError::MissingLoop { mode, scale })
    }

    pub fn loops(&self) -> &[Loop<C>] {
        &self.loops
    }

    fn reset(&mut self) {
        for lp in &mut self.loops {
            lp.counter.init(None);
            lp.active = false;
            lp.in_tick = false;
        }
    }
}

struct StackSlot<C: 'static> {
    mode: Mode,
    stack: Option<Stack<C>>,
}

/// Maximum number of simultaneously active run frames: one outer run plus
/// one nested mode switch.
const MAX_RUN_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy)]
enum Registry {
    OnStart,
    Main,
    OnEnd,
}

/// The mode-to-stack map plus the scheduler that executes it.
pub struct Stacks<C: 'static> {
    slots: Vec<StackSlot<C>>,
    mode: Mode,
    sealed: bool,
    depth: usize,
    stop: Arc<AtomicBool>,
}

impl<C: 'static> Default for Stacks<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Stacks<C> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            mode: Mode::Train,
            sealed: false,
            depth: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The currently selected mode. Mutated only by the scheduler around a
    /// mode-switching call and restored before that call returns.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Shared cooperative-cancellation flag; set it from anywhere to stop
    /// the hierarchy at the next tick boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Re-arm after a cooperative stop so the next `run()` can proceed.
    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    pub fn add_stack(&mut self, mode: Mode) -> Result<&mut Stack<C>, ConfigError> {
        self.check_open()?;
        if self.slots.iter().any(|s| s.mode == mode) {
            return Err(ConfigError::DuplicateStack { mode });
        }
        self.slots.push(StackSlot {
            mode,
            stack: Some(Stack::new(mode)),
        });
        Ok(self.slots.last_mut().unwrap().stack.as_mut().unwrap())
    }

    /// Mutable access for configuration. Fails once sealed: no hook or
    /// event registration is permitted after a run has begun.
    pub fn stack_mut(&mut self, mode: Mode) -> Result<&mut Stack<C>, ConfigError> {
        self.check_open()?;
        self.slots
            .iter_mut()
            .find(|s| s.mode == mode)
            .and_then(|s| s.stack.as_mut())
            .ok_or(ConfigError::MissingStack { mode })
    }

    pub fn loop_mut(&mut self, mode: Mode, scale: TimeScale) -> Result<&mut Loop<C>, ConfigError> {
        self.stack_mut(mode)?.loop_mut(scale)
    }

    /// Read a counter without touching seal state. `None` while that
    /// stack is mid-run or undefined.
    pub fn counter(&self, mode: Mode, scale: TimeScale) -> Option<crate::looper::Counter> {
        self.slots
            .iter()
            .find(|s| s.mode == mode)
            .and_then(|s| s.stack.as_ref())
            .and_then(|st| st.loops.iter().find(|l| l.scale == scale))
            .map(|l| l.counter)
    }

    /// Register one end hook per (mode, scale), built by `factory`.
    /// Bulk wiring for logging and view refresh.
    pub fn add_on_end_to_all(
        &mut self,
        name: &str,
        mut factory: impl FnMut(Mode, TimeScale) -> HookFn<C>,
    ) -> Result<(), ConfigError> {
        self.check_open()?;
        for slot in &mut self.slots {
            let stack = slot.stack.as_mut().ok_or(ConfigError::MissingStack {
                mode: slot.mode,
            })?;
            for lp in &mut stack.loops {
                let f = factory(slot.mode, lp.scale);
                lp.on_end.add(name.to_string(), f)?;
            }
        }
        Ok(())
    }

    /// Reset every stack's counters and progress flags.
    pub fn reset_counters(&mut self) {
        for slot in &mut self.slots {
            if let Some(stack) = slot.stack.as_mut() {
                stack.reset();
            }
        }
    }

    pub fn reset_counters_mode(&mut self, mode: Mode) {
        if let Some(stack) = self
            .slots
            .iter_mut()
            .find(|s| s.mode == mode)
            .and_then(|s| s.stack.as_mut())
        {
            stack.reset();
        }
    }

    fn check_open(&self) -> Result<(), ConfigError> {
        if self.sealed {
            return Err(ConfigError::Sealed);
        }
        Ok(())
    }

    /// Run one mode's stack from its coarsest loop.
    ///
    /// Seals all registries on first use, sets the current mode for the
    /// duration, and restores the prior mode before returning. A stack
    /// whose counters were left mid-run by a cooperative stop resumes at
    /// its last committed tick; a completed or reset stack starts fresh.
    pub fn run(&mut self, mode: Mode, ctx: &mut C) -> Result<Outcome, RunError> {
        self.sealed = true;
        if self.depth >= MAX_RUN_DEPTH {
            return Err(RunError::NestingTooDeep {
                mode,
                depth: self.depth,
            });
        }
        let mut stack = self.take_stack(mode)?;
        let prev_mode = self.mode;
        self.mode = mode;
        self.depth += 1;
        debug!(%mode, depth = self.depth, "run begin");

        let mut ctl = Ctl::new(mode);
        let res = self.run_level(&mut stack, 0, ctx, &mut ctl);

        debug!(%mode, outcome = ?res.as_ref().ok(), "run end");
        self.depth -= 1;
        self.mode = prev_mode;
        self.put_back(stack);
        res
    }

    fn take_stack(&mut self, mode: Mode) -> Result<Stack<C>, RunError> {
        self.slots
            .iter_mut()
            .find(|s| s.mode == mode)
            .and_then(|s| s.stack.take())
            .ok_or(RunError::StackUnavailable { mode })
    }

    fn put_back(&mut self, stack: Stack<C>) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.mode == stack.mode) {
            slot.stack = Some(stack);
        }
    }

    fn run_level(
        &mut self,
        stack: &mut Stack<C>,
        level: usize,
        ctx: &mut C,
        ctl: &mut Ctl,
    ) -> Result<Outcome, RunError> {
        let scale = stack.loops[level].scale;
        if !stack.loops[level].active {
            stack.loops[level].counter.init(None);
            stack.loops[level].in_tick = false;
            stack.loops[level].active = true;
        }
        let max = stack.loops[level].counter.max;

        if max == 0 {
            // Single-shot scope: boundary hooks only, zero ticks.
            self.fire(stack, level, Registry::OnStart, ctx, ctl)?;
            self.fire(stack, level, Registry::OnEnd, ctx, ctl)?;
            stack.loops[level].active = false;
            return Ok(Outcome::Completed);
        }

        let last = level + 1 == stack.loops.len();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                warn!(%scale, cur = stack.loops[level].counter.cur, "cooperative stop");
                return Ok(Outcome::Stopped);
            }
            let cur = stack.loops[level].counter.cur;
            ctl.cur[scale.index()] = cur;
            trace!(%scale, cur, "tick");

            if !stack.loops[level].in_tick {
                self.fire(stack, level, Registry::OnStart, ctx, ctl)?;
                self.fire_events(stack, level, cur, ctx, ctl)?;
                stack.loops[level].in_tick = true;
            }

            if last {
                self.fire(stack, level, Registry::Main, ctx, ctl)?;
            } else if self.run_level(stack, level + 1, ctx, ctl)? == Outcome::Stopped {
                return Ok(Outcome::Stopped);
            }

            self.fire(stack, level, Registry::OnEnd, ctx, ctl)?;
            stack.loops[level].in_tick = false;

            if self.check_done(&stack.loops[level], ctx)? {
                break;
            }
            if cur + 1 >= max {
                break;
            }
            if !stack.loops[level].counter.advance() {
                return Err(RunError::CounterOverflow { scale, max });
            }
        }

        stack.loops[level].active = false;
        Ok(Outcome::Completed)
    }

    fn fire(
        &mut self,
        stack: &mut Stack<C>,
        level: usize,
        registry: Registry,
        ctx: &mut C,
        ctl: &mut Ctl,
    ) -> Result<(), RunError> {
        let n = {
            let lp = &stack.loops[level];
            match registry {
                Registry::OnStart => lp.on_start.len(),
                Registry::Main => lp.main.len(),
                Registry::OnEnd => lp.on_end.len(),
            }
        };
        for i in 0..n {
            {
                let lp = &mut stack.loops[level];
                let hooks = match registry {
                    Registry::OnStart => &mut lp.on_start,
                    Registry::Main => &mut lp.main,
                    Registry::OnEnd => &mut lp.on_end,
                };
                let hook = hooks.item_mut(i);
                (hook.f)(ctx, ctl)?;
            }
            self.service(ctx, ctl)?;
        }
        Ok(())
    }

    fn fire_events(
        &mut self,
        stack: &mut Stack<C>,
        level: usize,
        cur: usize,
        ctx: &mut C,
        ctl: &mut Ctl,
    ) -> Result<(), RunError> {
        let n_events = stack.loops[level].events.len();
        for e in 0..n_events {
            if stack.loops[level].events[e].at != cur {
                continue;
            }
            trace!(
                scale = %stack.loops[level].scale,
                event = %stack.loops[level].events[e].name,
                cur,
                "event"
            );
            let n = stack.loops[level].events[e].hooks.len();
            for i in 0..n {
                {
                    let ev = &mut stack.loops[level].events[e];
                    (ev.hooks.item_mut(i).f)(ctx, ctl)?;
                }
                self.service(ctx, ctl)?;
            }
        }
        Ok(())
    }

    /// Apply requests the last hook left on the control surface. A nested
    /// run executes synchronously here, before the next hook fires, so
    /// later hooks in the same tick observe its effects.
    fn service(&mut self, ctx: &mut C, ctl: &mut Ctl) -> Result<(), RunError> {
        if ctl.stop_request {
            ctl.stop_request = false;
            self.stop.store(true, Ordering::Relaxed);
        }
        if let Some(mode) = ctl.run_request.take() {
            debug!(%mode, depth = self.depth, "nested mode switch");
            self.run(mode, ctx)?;
        }
        Ok(())
    }

    fn check_done(&self, lp: &Loop<C>, ctx: &C) -> Result<bool, RunError> {
        for p in &lp.is_done {
            if (p.f)(ctx)? {
                debug!(scale = %lp.scale, predicate = %p.name, "early termination");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatError;

    #[derive(Default)]
    struct Ctx {
        cycles: usize,
        trace: Vec<String>,
        epoch_err: Vec<f64>,
        n_zero: i64,
        test_cycles: usize,
    }

    fn four_scale(stacks: &mut Stacks<Ctx>, mode: Mode, dims: [usize; 4]) {
        let st = stacks.add_stack(mode).unwrap();
        st.add_scale(TimeScale::Run, dims[0]).unwrap();
        st.add_scale(TimeScale::Epoch, dims[1]).unwrap();
        st.add_scale(TimeScale::Trial, dims[2]).unwrap();
        st.add_scale(TimeScale::Cycle, dims[3]).unwrap();
    }

    #[test]
    fn full_run_executes_product_of_maxima_cycles() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        four_scale(&mut stacks, Mode::Train, [2, 3, 4, 5]);
        stacks
            .loop_mut(Mode::Train, TimeScale::Cycle)
            .unwrap()
            .main
            .add("Cycle", |ctx: &mut Ctx, _| {
                ctx.cycles += 1;
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let out = stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(out, Outcome::Completed);
        assert_eq!(ctx.cycles, 2 * 3 * 4 * 5);
    }

    #[test]
    fn hooks_fire_per_tick_in_registration_order() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Epoch, 2).unwrap();
        st.add_scale(TimeScale::Trial, 2).unwrap();

        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        ep.on_start
            .add("ES", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace.push(format!("ES{}", ctl.cur(TimeScale::Epoch)));
                Ok(())
            })
            .unwrap();
        ep.on_end
            .add("EE", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace.push(format!("EE{}", ctl.cur(TimeScale::Epoch)));
                Ok(())
            })
            .unwrap();
        let tr = stacks.loop_mut(Mode::Train, TimeScale::Trial).unwrap();
        tr.main
            .add("T", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace.push(format!("T{}", ctl.cur(TimeScale::Trial)));
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(
            ctx.trace,
            ["ES0", "T0", "T1", "EE0", "ES1", "T0", "T1", "EE1"]
        );
    }

    #[test]
    fn events_fire_at_anchored_ticks_before_the_body() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Cycle, 4).unwrap();

        let cyc = stacks.loop_mut(Mode::Train, TimeScale::Cycle).unwrap();
        cyc.add_event("Phase", 2)
            .unwrap()
            .hooks
            .add("PhaseHook", |ctx: &mut Ctx, _| {
                ctx.trace.push("P".into());
                Ok(())
            })
            .unwrap();
        cyc.event_mut("Phase")
            .unwrap()
            .hooks
            .insert_before("PhaseHook", "Before", |ctx: &mut Ctx, _| {
                ctx.trace.push("B".into());
                Ok(())
            })
            .unwrap();
        cyc.main
            .add("C", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace.push(format!("C{}", ctl.cur(TimeScale::Cycle)));
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(ctx.trace, ["C0", "C1", "B", "P", "C2", "C3"]);
    }

    #[test]
    fn is_done_checked_after_own_ticks_only() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Epoch, 10).unwrap();
        st.add_scale(TimeScale::Trial, 3).unwrap();

        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        // True after the second epoch tick; epoch 2 must never start.
        ep.add_done("TwoEpochs", |ctx: &Ctx| Ok(ctx.trace.len() >= 2 * 3))
            .unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Trial)
            .unwrap()
            .main
            .add("T", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace
                    .push(format!("e{}t{}", ctl.cur(TimeScale::Epoch), ctl.cur(TimeScale::Trial)));
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();
        // The predicate became true mid-epoch-1 (after trial ticks), but it
        // is only evaluated at epoch boundaries: epoch 1 runs all 3 trials,
        // epoch 2 never starts.
        assert_eq!(ctx.trace.len(), 6);
        assert!(ctx.trace.last().unwrap().starts_with("e1"));
    }

    #[test]
    fn predicate_errors_abort_the_run() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Epoch, 2).unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Epoch)
            .unwrap()
            .add_done("Broken", |_| {
                Err(StatError::Missing("NZero".into()).into())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let err = stacks.run(Mode::Train, &mut ctx).unwrap_err();
        assert!(matches!(err, RunError::Stat(StatError::Missing(_))));
    }

    #[test]
    fn zero_max_loop_is_a_single_shot_scope() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Test).unwrap();
        st.add_scale(TimeScale::Epoch, 0).unwrap();

        let ep = stacks.loop_mut(Mode::Test, TimeScale::Epoch).unwrap();
        ep.on_start
            .add("S", |ctx: &mut Ctx, _| {
                ctx.trace.push("S".into());
                Ok(())
            })
            .unwrap();
        ep.on_end
            .add("E", |ctx: &mut Ctx, _| {
                ctx.trace.push("E".into());
                Ok(())
            })
            .unwrap();
        ep.main
            .add("M", |ctx: &mut Ctx, _| {
                ctx.trace.push("M".into());
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Test, &mut ctx).unwrap();
        assert_eq!(ctx.trace, ["S", "E"]);
    }

    #[test]
    fn registration_is_sealed_after_first_run() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Cycle, 1).unwrap();
        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();

        assert!(matches!(
            stacks.loop_mut(Mode::Train, TimeScale::Cycle),
            Err(ConfigError::Sealed)
        ));
        assert!(matches!(
            stacks.add_stack(Mode::Test),
            Err(ConfigError::Sealed)
        ));
    }

    #[test]
    fn scales_must_be_added_in_order() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Trial, 2).unwrap();
        assert!(matches!(
            st.add_scale(TimeScale::Epoch, 2),
            Err(ConfigError::ScaleOrder { .. })
        ));
        assert!(matches!(
            st.add_scale(TimeScale::Trial, 2),
            Err(ConfigError::ScaleOrder { .. })
        ));
    }

    #[test]
    fn mode_switch_preserves_interrupted_counters() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        four_scale(&mut stacks, Mode::Train, [2, 3, 2, 2]);
        let tst = stacks.add_stack(Mode::Test).unwrap();
        tst.add_scale(TimeScale::Epoch, 1).unwrap();
        tst.add_scale(TimeScale::Trial, 2).unwrap();
        tst.add_scale(TimeScale::Cycle, 2).unwrap();

        stacks
            .loop_mut(Mode::Test, TimeScale::Cycle)
            .unwrap()
            .main
            .add("TestCycle", |ctx: &mut Ctx, _| {
                ctx.test_cycles += 1;
                Ok(())
            })
            .unwrap();

        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        ep.on_start
            .add("TestEveryEpoch", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.trace.push(format!(
                    "pre r{}e{}",
                    ctl.cur(TimeScale::Run),
                    ctl.cur(TimeScale::Epoch)
                ));
                ctl.request_run(Mode::Test);
                Ok(())
            })
            .unwrap();
        ep.on_start
            .add("AfterSwitch", |ctx: &mut Ctx, ctl: &mut Ctl| {
                // The nested Test run completed between these two hooks and
                // the Train counters are bit-identical.
                ctx.trace.push(format!(
                    "post r{}e{} mode{}",
                    ctl.cur(TimeScale::Run),
                    ctl.cur(TimeScale::Epoch),
                    ctl.mode()
                ));
                Ok(())
            })
            .unwrap();

        stacks
            .loop_mut(Mode::Train, TimeScale::Cycle)
            .unwrap()
            .main
            .add("Cycle", |ctx: &mut Ctx, _| {
                ctx.cycles += 1;
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();

        // Train ran in full, Test ran once per Train epoch.
        assert_eq!(ctx.cycles, 2 * 3 * 2 * 2);
        assert_eq!(ctx.test_cycles, 2 * 3 * (2 * 2));
        for (pre, post) in ctx
            .trace
            .iter()
            .filter(|s| s.starts_with("pre"))
            .zip(ctx.trace.iter().filter(|s| s.starts_with("post")))
        {
            let pre_ctrs = pre.trim_start_matches("pre ");
            assert!(post.contains(pre_ctrs), "{post} vs {pre}");
            assert!(post.contains("modeTrain"));
        }
        assert_eq!(stacks.mode(), Mode::Train);
    }

    #[test]
    fn nested_runs_deeper_than_one_level_fail() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let trn = stacks.add_stack(Mode::Train).unwrap();
        trn.add_scale(TimeScale::Epoch, 1).unwrap();
        let tst = stacks.add_stack(Mode::Test).unwrap();
        tst.add_scale(TimeScale::Epoch, 1).unwrap();

        stacks
            .loop_mut(Mode::Train, TimeScale::Epoch)
            .unwrap()
            .on_start
            .add("GoTest", |_ctx: &mut Ctx, ctl: &mut Ctl| {
                ctl.request_run(Mode::Test);
                Ok(())
            })
            .unwrap();
        // The Test stack tries to switch again: depth 2 is rejected.
        stacks
            .loop_mut(Mode::Test, TimeScale::Epoch)
            .unwrap()
            .on_start
            .add("GoDeeper", |_ctx: &mut Ctx, ctl: &mut Ctl| {
                ctl.request_run(Mode::Train);
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let err = stacks.run(Mode::Train, &mut ctx).unwrap_err();
        assert!(matches!(err, RunError::NestingTooDeep { depth: 2, .. }));
    }

    #[test]
    fn switching_to_the_running_mode_fails() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let trn = stacks.add_stack(Mode::Train).unwrap();
        trn.add_scale(TimeScale::Epoch, 1).unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Epoch)
            .unwrap()
            .on_start
            .add("SelfSwitch", |_ctx: &mut Ctx, ctl: &mut Ctl| {
                ctl.request_run(Mode::Train);
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let err = stacks.run(Mode::Train, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            RunError::StackUnavailable { mode: Mode::Train }
        ));
    }

    #[test]
    fn stop_unwinds_cleanly_and_resumes() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let st = stacks.add_stack(Mode::Train).unwrap();
        st.add_scale(TimeScale::Epoch, 2).unwrap();
        st.add_scale(TimeScale::Trial, 5).unwrap();

        let tr = stacks.loop_mut(Mode::Train, TimeScale::Trial).unwrap();
        tr.main
            .add("T", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.cycles += 1;
                if ctx.cycles == 3 {
                    ctl.request_stop();
                }
                Ok(())
            })
            .unwrap();
        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        ep.on_end
            .add("EE", |ctx: &mut Ctx, _| {
                ctx.trace.push("EE".into());
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let out = stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(out, Outcome::Stopped);
        // Tick 2 (the third trial) finished its in-flight hooks; tick 3
        // never started and the enclosing epoch end hook did not fire.
        assert_eq!(ctx.cycles, 3);
        assert!(ctx.trace.is_empty());
        assert_eq!(stacks.counter(Mode::Train, TimeScale::Trial).unwrap().cur, 3);

        stacks.clear_stop();
        let out = stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(out, Outcome::Completed);
        // The remaining 2 + 5 trials ran exactly once each.
        assert_eq!(ctx.cycles, 10);
        assert_eq!(ctx.trace, ["EE", "EE"]);
    }

    #[test]
    fn stop_inside_nested_test_propagates_to_the_outer_run() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        let trn = stacks.add_stack(Mode::Train).unwrap();
        trn.add_scale(TimeScale::Epoch, 4).unwrap();
        trn.add_scale(TimeScale::Trial, 2).unwrap();
        let tst = stacks.add_stack(Mode::Test).unwrap();
        tst.add_scale(TimeScale::Trial, 3).unwrap();

        stacks
            .loop_mut(Mode::Test, TimeScale::Trial)
            .unwrap()
            .main
            .add("TestT", |ctx: &mut Ctx, ctl: &mut Ctl| {
                ctx.test_cycles += 1;
                if ctx.test_cycles == 2 {
                    ctl.request_stop();
                }
                Ok(())
            })
            .unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Epoch)
            .unwrap()
            .on_start
            .add("GoTest", |_ctx: &mut Ctx, ctl: &mut Ctl| {
                ctl.request_run(Mode::Test);
                Ok(())
            })
            .unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Trial)
            .unwrap()
            .main
            .add("T", |ctx: &mut Ctx, _| {
                ctx.cycles += 1;
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        let out = stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(out, Outcome::Stopped);
        // The stop inside the Test sub-run halted Train before any Train
        // trial of epoch 0 ran.
        assert_eq!(ctx.test_cycles, 2);
        assert_eq!(ctx.cycles, 0);
        assert_eq!(stacks.mode(), Mode::Train);
    }

    // Scenario from the driver: 1 run, 3 epochs, 4 trials, stop after 2
    // consecutive zero-error epochs, periodic testing disabled. Errors
    // alternate zero/nonzero, so the streak never reaches 2 and all 3
    // epochs run.
    #[test]
    fn alternating_errors_never_trip_a_two_epoch_zero_streak() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        four_scale(&mut stacks, Mode::Train, [1, 3, 4, 1]);

        let test_interval: i64 = -1;
        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        ep.on_start
            .add("TestAtInterval", move |_ctx: &mut Ctx, ctl: &mut Ctl| {
                if test_interval > 0
                    && (ctl.cur(TimeScale::Epoch) as i64 + 1) % test_interval == 0
                {
                    ctl.request_run(Mode::Test);
                }
                Ok(())
            })
            .unwrap();
        ep.on_end
            .add("EpochStats", |ctx: &mut Ctx, ctl: &mut Ctl| {
                // Injected: epochs 0 and 2 are error-free, epoch 1 is not.
                let err = (ctl.cur(TimeScale::Epoch) % 2) as f64;
                ctx.epoch_err.push(err);
                if err == 0.0 {
                    ctx.n_zero += 1;
                } else {
                    ctx.n_zero = 0;
                }
                Ok(())
            })
            .unwrap();
        ep.add_done("NZeroStop", |ctx: &Ctx| Ok(ctx.n_zero >= 2)).unwrap();

        stacks
            .loop_mut(Mode::Train, TimeScale::Cycle)
            .unwrap()
            .main
            .add("Cycle", |ctx: &mut Ctx, _| {
                ctx.cycles += 1;
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(ctx.epoch_err, [0.0, 1.0, 0.0]);
        assert_eq!(ctx.cycles, 3 * 4);
    }

    #[test]
    fn zero_streak_of_two_stops_the_epoch_loop_early() {
        let mut stacks: Stacks<Ctx> = Stacks::new();
        four_scale(&mut stacks, Mode::Train, [1, 10, 2, 1]);
        let ep = stacks.loop_mut(Mode::Train, TimeScale::Epoch).unwrap();
        ep.on_end
            .add("EpochStats", |ctx: &mut Ctx, _| {
                ctx.n_zero += 1;
                Ok(())
            })
            .unwrap();
        ep.add_done("NZeroStop", |ctx: &Ctx| Ok(ctx.n_zero >= 2)).unwrap();
        stacks
            .loop_mut(Mode::Train, TimeScale::Cycle)
            .unwrap()
            .main
            .add("Cycle", |ctx: &mut Ctx, _| {
                ctx.cycles += 1;
                Ok(())
            })
            .unwrap();

        let mut ctx = Ctx::default();
        stacks.run(Mode::Train, &mut ctx).unwrap();
        assert_eq!(ctx.cycles, 2 * 2);
    }
}
