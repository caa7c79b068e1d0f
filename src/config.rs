// src/config.rs
use std::time::Duration;

use crate::tick::TickKind;

/// Scheduler knobs. Built once at process start and handed to [`Scheduler::new`].
///
/// [`Scheduler::new`]: crate::Scheduler::new
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick sources `lazy` may use, best first. Empty means "probe".
    pub tick_sources: Vec<TickKind>,
    /// Bound on queued microtasks (`None` = unbounded).
    pub microtask_capacity: Option<usize>,
    /// Bound on queued immediates (`None` = unbounded).
    pub immediate_capacity: Option<usize>,

    pub observe_default_delay: Duration,
    pub observe_max_interval: Duration,

    pub till_initial_interval: Duration,
    pub till_min_interval: Duration,
    pub till_max_interval: Duration,

    /// Delay before an unhandled failure is re-reported.
    pub unhandled_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_sources: Vec::new(),
            microtask_capacity: None,
            immediate_capacity: None,

            observe_default_delay: Duration::from_millis(13),
            observe_max_interval: Duration::from_millis(1500),

            till_initial_interval: Duration::from_millis(13),
            till_min_interval: Duration::from_millis(1),
            till_max_interval: Duration::from_millis(1000),

            unhandled_delay: Duration::ZERO,
        }
    }
}

impl SchedulerConfig {
    /// Defaults, overridden by `LAZY_TICK_SOURCES`, `LAZY_MICROTASK_CAPACITY`
    /// and `LAZY_IMMEDIATE_CAPACITY` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(list) = get("LAZY_TICK_SOURCES") {
            let kinds: Vec<TickKind> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match TickKind::parse(s) {
                    Some(k) => Some(k),
                    None => {
                        log::warn!("LAZY_TICK_SOURCES: ignoring unknown tick source {s:?}");
                        None
                    }
                })
                .collect();
            cfg.tick_sources = kinds;
        }

        cfg.microtask_capacity = parse_capacity(get("LAZY_MICROTASK_CAPACITY"), "LAZY_MICROTASK_CAPACITY");
        cfg.immediate_capacity = parse_capacity(get("LAZY_IMMEDIATE_CAPACITY"), "LAZY_IMMEDIATE_CAPACITY");
        cfg
    }

    pub fn with_tick_sources(mut self, kinds: impl IntoIterator<Item = TickKind>) -> Self {
        self.tick_sources = kinds.into_iter().collect();
        self
    }

    pub fn with_microtask_capacity(mut self, cap: usize) -> Self {
        self.microtask_capacity = Some(cap);
        self
    }

    pub fn with_immediate_capacity(mut self, cap: usize) -> Self {
        self.immediate_capacity = Some(cap);
        self
    }

    pub fn with_observe_default_delay(mut self, d: Duration) -> Self {
        self.observe_default_delay = d;
        self
    }

    pub fn with_unhandled_delay(mut self, d: Duration) -> Self {
        self.unhandled_delay = d;
        self
    }

    /// Sources `lazy` will walk through, best first. Always ends with `Timer`;
    /// anything listed after it is unreachable and dropped.
    pub(crate) fn resolved_tick_sources(&self) -> Vec<TickKind> {
        let mut kinds = if self.tick_sources.is_empty() {
            TickKind::probe()
        } else {
            let mut v = Vec::with_capacity(self.tick_sources.len());
            for k in &self.tick_sources {
                if !v.contains(k) {
                    v.push(*k);
                }
            }
            v
        };
        match kinds.iter().position(|k| *k == TickKind::Timer) {
            Some(at) => kinds.truncate(at + 1),
            None => kinds.push(TickKind::Timer),
        }
        kinds
    }
}

fn parse_capacity(raw: Option<String>, key: &str) -> Option<usize> {
    let raw = raw?;
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(e) => {
            log::warn!("{key}: ignoring {raw:?} ({e})");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_poll_constants() {
        let c = SchedulerConfig::default();
        assert_eq!(c.observe_default_delay, Duration::from_millis(13));
        assert_eq!(c.observe_max_interval, Duration::from_millis(1500));
        assert_eq!(c.till_min_interval, Duration::from_millis(1));
        assert_eq!(c.till_max_interval, Duration::from_millis(1000));
        assert_eq!(c.resolved_tick_sources(), TickKind::probe());
    }

    #[test]
    fn env_overrides_sources_and_capacities() {
        let c = SchedulerConfig::from_lookup(lookup(&[
            ("LAZY_TICK_SOURCES", "message, bogus ,immediate"),
            ("LAZY_MICROTASK_CAPACITY", "4"),
            ("LAZY_IMMEDIATE_CAPACITY", "lots"),
        ]));
        assert_eq!(c.tick_sources, vec![TickKind::Message, TickKind::Immediate]);
        assert_eq!(c.microtask_capacity, Some(4));
        assert_eq!(c.immediate_capacity, None);
        assert_eq!(
            c.resolved_tick_sources(),
            vec![TickKind::Message, TickKind::Immediate, TickKind::Timer]
        );
    }

    #[test]
    fn duplicate_sources_collapse() {
        let c = SchedulerConfig::default()
            .with_tick_sources([TickKind::Timer, TickKind::Microtask, TickKind::Timer]);
        assert_eq!(c.resolved_tick_sources(), vec![TickKind::Timer]);
    }

    #[test]
    fn sources_after_timer_are_dropped() {
        let c = SchedulerConfig::from_lookup(|k| (k == "LAZY_TICK_SOURCES").then(|| "immediate,timer,microtask".to_string()));
        assert_eq!(c.resolved_tick_sources(), vec![TickKind::Immediate, TickKind::Timer]);
        // builds without tripping the selector's ordering check
        let s = crate::Scheduler::with_clock(c, crate::ManualClock::new());
        assert_eq!(s.tick_kind(), TickKind::Immediate);
    }
}
