//! Counters, named hook registries, events, and per-scale loops.
//!
//! Hook names are stable identifiers: registering a duplicate name is
//! rejected, never silently overwritten, so a previously registered
//! behavior cannot be shadowed. `before`/`after` insertion is resolved at
//! registration time, so ordering is fixed once the stack is configured.

use crate::error::{ConfigError, RunError};
use crate::stack::Ctl;
use crate::times::TimeScale;

/// A bounded progress counter for one time scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Current tick, `0..max`.
    pub cur: usize,
    /// Number of ticks in a full sweep.
    pub max: usize,
}

impl Counter {
    pub fn new(max: usize) -> Self {
        Self { cur: 0, max }
    }

    /// Reset to zero, optionally replacing `max`.
    pub fn init(&mut self, max_override: Option<usize>) {
        self.cur = 0;
        if let Some(m) = max_override {
            self.max = m;
        }
    }

    /// Advance one tick. Returns `false` (an overflow signal) when called
    /// with `cur >= max - 1`; callers must check termination first.
    #[must_use]
    pub fn advance(&mut self) -> bool {
        if self.max == 0 || self.cur >= self.max - 1 {
            return false;
        }
        self.cur += 1;
        true
    }
}

/// A boxed side-effecting hook.
pub type HookFn<C> = Box<dyn FnMut(&mut C, &mut Ctl) -> Result<(), RunError>>;

/// A boxed termination predicate.
pub type DoneFn<C> = Box<dyn Fn(&C) -> Result<bool, RunError>>;

pub struct Hook<C: 'static> {
    pub name: String,
    pub f: HookFn<C>,
}

/// An ordered, name-keyed hook registry.
pub struct Hooks<C: 'static> {
    label: String,
    items: Vec<Hook<C>>,
}

impl<C: 'static> Hooks<C> {
    pub(crate) fn new(label: String) -> Self {
        Self {
            label,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Registered names, in firing order.
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|h| h.name.as_str()).collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|h| h.name == name)
    }

    fn check_free(&self, name: &str) -> Result<(), ConfigError> {
        if self.index_of(name).is_some() {
            return Err(ConfigError::DuplicateName {
                registry: self.label.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Append a hook at the tail.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        f: impl FnMut(&mut C, &mut Ctl) -> Result<(), RunError> + 'static,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        self.check_free(&name)?;
        self.items.push(Hook {
            name,
            f: Box::new(f),
        });
        Ok(())
    }

    /// Insert a hook immediately before the named anchor.
    pub fn insert_before(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        f: impl FnMut(&mut C, &mut Ctl) -> Result<(), RunError> + 'static,
    ) -> Result<(), ConfigError> {
        self.insert_at(anchor, name.into(), Box::new(f), 0)
    }

    /// Insert a hook immediately after the named anchor.
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        f: impl FnMut(&mut C, &mut Ctl) -> Result<(), RunError> + 'static,
    ) -> Result<(), ConfigError> {
        self.insert_at(anchor, name.into(), Box::new(f), 1)
    }

    fn insert_at(
        &mut self,
        anchor: &str,
        name: String,
        f: HookFn<C>,
        offset: usize,
    ) -> Result<(), ConfigError> {
        self.check_free(&name)?;
        let at = self
            .index_of(anchor)
            .ok_or_else(|| ConfigError::MissingAnchor {
                registry: self.label.clone(),
                anchor: anchor.to_string(),
                name: name.clone(),
            })?;
        self.items.insert(at + offset, Hook { name, f });
        Ok(())
    }

    pub(crate) fn item_mut(&mut self, idx: usize) -> &mut Hook<C> {
        &mut self.items[idx]
    }
}

impl<C: 'static> core::fmt::Debug for Hooks<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hooks")
            .field("label", &self.label)
            .field("names", &self.names())
            .finish()
    }
}

/// A named mid-loop event, fired when the owning loop's counter reaches
/// `at`, before that tick's body.
pub struct Event<C: 'static> {
    pub name: String,
    pub at: usize,
    pub hooks: Hooks<C>,
}

impl<C: 'static> core::fmt::Debug for Event<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("at", &self.at)
            .field("hooks", &self.hooks)
            .finish()
    }
}

pub struct Predicate<C: 'static> {
    pub name: String,
    pub f: DoneFn<C>,
}

/// One loop of the hierarchy: a counter plus its hook registries.
///
/// `on_start` and `on_end` wrap each tick of this loop's own counter.
/// `main` is the terminal action of the finest loop, run once per tick
/// when no finer loop exists. A loop with `max == 0` is a single-shot
/// scope: its boundary hooks fire exactly once, with zero ticks.
pub struct Loop<C: 'static> {
    pub scale: TimeScale,
    pub counter: Counter,
    pub on_start: Hooks<C>,
    pub main: Hooks<C>,
    pub on_end: Hooks<C>,
    pub(crate) events: Vec<Event<C>>,
    pub(crate) is_done: Vec<Predicate<C>>,
    /// A sweep of this counter is underway (set while running, kept across
    /// a cooperative stop so a later run resumes instead of resetting).
    pub(crate) active: bool,
    /// The current tick's start hooks and events have fired.
    pub(crate) in_tick: bool,
}

impl<C: 'static> Loop<C> {
    pub(crate) fn new(scale: TimeScale, max: usize) -> Self {
        Self {
            scale,
            counter: Counter::new(max),
            on_start: Hooks::new(format!("{scale}:on_start")),
            main: Hooks::new(format!("{scale}:main")),
            on_end: Hooks::new(format!("{scale}:on_end")),
            events: Vec::new(),
            is_done: Vec::new(),
            active: false,
            in_tick: false,
        }
    }

    /// Define a named event at tick `at` of this loop's counter.
    pub fn add_event(&mut self, name: impl Into<String>, at: usize) -> Result<&mut Event<C>, ConfigError> {
        let name = name.into();
        if self.events.iter().any(|e| e.name == name) {
            return Err(ConfigError::DuplicateEvent {
                scale: self.scale,
                name,
            });
        }
        let hooks = Hooks::new(format!("{}:event:{}", self.scale, name));
        self.events.push(Event { name, at, hooks });
        Ok(self.events.last_mut().unwrap())
    }

    pub fn event_mut(&mut self, name: &str) -> Result<&mut Event<C>, ConfigError> {
        let scale = self.scale;
        self.events
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or(ConfigError::MissingEvent {
                scale,
                name: name.to_string(),
            })
    }

    pub fn events(&self) -> &[Event<C>] {
        &self.events
    }

    /// Register a named termination predicate, checked after each tick of
    /// this loop only. The first `true` halts the loop early.
    pub fn add_done(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&C) -> Result<bool, RunError> + 'static,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.is_done.iter().any(|p| p.name == name) {
            return Err(ConfigError::DuplicatePredicate {
                scale: self.scale,
                name,
            });
        }
        self.is_done.push(Predicate {
            name,
            f: Box::new(f),
        });
        Ok(())
    }
}

impl<C: 'static> core::fmt::Debug for Loop<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Loop")
            .field("scale", &self.scale)
            .field("counter", &self.counter)
            .field("events", &self.events)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ctx = Vec<&'static str>;

    fn mark(tag: &'static str) -> impl FnMut(&mut Ctx, &mut Ctl) -> Result<(), RunError> {
        move |ctx, _ctl| {
            ctx.push(tag);
            Ok(())
        }
    }

    #[test]
    fn counter_advance_overflows_at_max() {
        let mut c = Counter::new(3);
        assert!(c.advance());
        assert!(c.advance());
        assert_eq!(c.cur, 2);
        assert!(!c.advance());
        assert_eq!(c.cur, 2);

        c.init(Some(1));
        assert_eq!(c.cur, 0);
        assert!(!c.advance());

        let mut z = Counter::new(0);
        assert!(!z.advance());
    }

    #[test]
    fn duplicate_hook_name_is_rejected() {
        let mut hooks: Hooks<Ctx> = Hooks::new("test".into());
        hooks.add("A", mark("a")).unwrap();
        let err = hooks.add("A", mark("a2")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { .. }));
        // The original registration is untouched.
        assert_eq!(hooks.names(), ["A"]);
    }

    #[test]
    fn insert_before_and_after_anchor() {
        let mut hooks: Hooks<Ctx> = Hooks::new("test".into());
        hooks.add("First", mark("f")).unwrap();
        hooks.add("Last", mark("l")).unwrap();
        hooks.insert_before("Last", "Mid", mark("m")).unwrap();
        hooks.insert_after("First", "Second", mark("s")).unwrap();
        assert_eq!(hooks.names(), ["First", "Second", "Mid", "Last"]);
    }

    #[test]
    fn missing_anchor_is_rejected() {
        let mut hooks: Hooks<Ctx> = Hooks::new("test".into());
        hooks.add("A", mark("a")).unwrap();
        let err = hooks.insert_before("Nope", "B", mark("b")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAnchor { .. }));
        assert_eq!(hooks.names(), ["A"]);
    }

    #[test]
    fn duplicate_event_and_predicate_names_rejected() {
        let mut lp: Loop<Ctx> = Loop::new(TimeScale::Cycle, 10);
        lp.add_event("Phase", 5).unwrap();
        assert!(matches!(
            lp.add_event("Phase", 7),
            Err(ConfigError::DuplicateEvent { .. })
        ));
        lp.add_done("Stop", |_| Ok(false)).unwrap();
        assert!(matches!(
            lp.add_done("Stop", |_| Ok(true)),
            Err(ConfigError::DuplicatePredicate { .. })
        ));
    }
}
