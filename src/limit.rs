//! Resource and structural limits
//!
//! A [`Limit`] bounds one [`Metric`] of a task, message, thread or whole
//! path. Either bound may be `-1`, meaning unbounded. Time metrics are
//! expressed in seconds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurable quantity a limit can bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[serde(alias = "wall_time", alias = "real")]
    RealTime,
    #[serde(alias = "utime")]
    UserTime,
    #[serde(alias = "stime")]
    SystemTime,
    CpuTime,
    BusyFraction,
    MajorFaults,
    MinorFaults,
    #[serde(alias = "vol_cs")]
    VoluntaryCs,
    #[serde(alias = "invol_cs")]
    InvoluntaryCs,
    Latency,
    Size,
    Messages,
    Depth,
    Threads,
    Hosts,
}

/// What kind of node a limit is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Task,
    Message,
    Thread,
    Path,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Task => "task",
            Scope::Message => "message",
            Scope::Thread => "thread",
            Scope::Path => "path",
        };
        f.write_str(name)
    }
}

impl Metric {
    pub const ALL: [Metric; 15] = [
        Metric::RealTime,
        Metric::UserTime,
        Metric::SystemTime,
        Metric::CpuTime,
        Metric::BusyFraction,
        Metric::MajorFaults,
        Metric::MinorFaults,
        Metric::VoluntaryCs,
        Metric::InvoluntaryCs,
        Metric::Latency,
        Metric::Size,
        Metric::Messages,
        Metric::Depth,
        Metric::Threads,
        Metric::Hosts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::RealTime => "real_time",
            Metric::UserTime => "user_time",
            Metric::SystemTime => "system_time",
            Metric::CpuTime => "cpu_time",
            Metric::BusyFraction => "busy_fraction",
            Metric::MajorFaults => "major_faults",
            Metric::MinorFaults => "minor_faults",
            Metric::VoluntaryCs => "voluntary_cs",
            Metric::InvoluntaryCs => "involuntary_cs",
            Metric::Latency => "latency",
            Metric::Size => "size",
            Metric::Messages => "messages",
            Metric::Depth => "depth",
            Metric::Threads => "threads",
            Metric::Hosts => "hosts",
        }
    }

    fn is_cpu_metric(self) -> bool {
        matches!(
            self,
            Metric::RealTime
                | Metric::UserTime
                | Metric::SystemTime
                | Metric::CpuTime
                | Metric::BusyFraction
                | Metric::MajorFaults
                | Metric::MinorFaults
                | Metric::VoluntaryCs
                | Metric::InvoluntaryCs
        )
    }

    /// Whether this metric has a value for nodes of `scope`
    pub fn supported_by(self, scope: Scope) -> bool {
        match scope {
            Scope::Task => self.is_cpu_metric(),
            Scope::Message => matches!(self, Metric::Size | Metric::Latency),
            Scope::Thread => self.is_cpu_metric() || matches!(self, Metric::Size | Metric::Messages),
            Scope::Path => true,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything that can report metric values for limit checks
pub trait MetricSource {
    /// Value of `metric`, or `None` when it is not known for this node
    fn metric(&self, metric: Metric) -> Option<f64>;
}

fn unbounded() -> f64 {
    Limit::UNBOUNDED
}

/// `[min, max]` bound on one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub metric: Metric,
    #[serde(default = "unbounded")]
    pub min: f64,
    #[serde(default = "unbounded")]
    pub max: f64,
}

impl Limit {
    /// Bound value meaning "no bound on this side"
    pub const UNBOUNDED: f64 = -1.0;

    pub fn new(metric: Metric, min: f64, max: f64) -> Self {
        Limit { metric, min, max }
    }

    pub fn at_most(metric: Metric, max: f64) -> Self {
        Limit::new(metric, Limit::UNBOUNDED, max)
    }

    pub fn at_least(metric: Metric, min: f64) -> Self {
        Limit::new(metric, min, Limit::UNBOUNDED)
    }

    /// Check a concrete value against both bounds
    pub fn check(&self, value: f64) -> bool {
        (self.min == Limit::UNBOUNDED || value >= self.min)
            && (self.max == Limit::UNBOUNDED || value <= self.max)
    }

    /// Check against a node; an unknown value fails the limit
    pub fn check_source(&self, source: &dyn MetricSource) -> bool {
        source
            .metric(self.metric)
            .is_some_and(|value| self.check(value))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "limit({}", self.metric)?;
        if self.min != Limit::UNBOUNDED {
            write!(f, ", >={}", self.min)?;
        }
        if self.max != Limit::UNBOUNDED {
            write!(f, ", <={}", self.max)?;
        }
        f.write_str(")")
    }
}

/// True when every limit holds for `source`
pub fn all_hold(limits: &[Limit], source: &dyn MetricSource) -> bool {
    limits.iter().all(|limit| limit.check_source(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl MetricSource for Fixed {
        fn metric(&self, metric: Metric) -> Option<f64> {
            (metric == Metric::Size).then_some(self.0)
        }
    }

    #[test]
    fn test_unbounded_sides() {
        let limit = Limit::new(Metric::Size, Limit::UNBOUNDED, Limit::UNBOUNDED);
        assert!(limit.check(0.0));
        assert!(limit.check(1e12));
    }

    #[test]
    fn test_inclusive_bounds() {
        let limit = Limit::new(Metric::Size, 10.0, 20.0);
        assert!(limit.check(10.0));
        assert!(limit.check(20.0));
        assert!(!limit.check(9.9));
        assert!(!limit.check(20.1));
    }

    #[test]
    fn test_unknown_value_fails() {
        let limit = Limit::at_most(Metric::Latency, 1.0);
        assert!(!limit.check_source(&Fixed(0.5)));
        assert!(Limit::at_most(Metric::Size, 1.0).check_source(&Fixed(0.5)));
    }

    #[test]
    fn test_scope_support() {
        assert!(Metric::UserTime.supported_by(Scope::Task));
        assert!(!Metric::Size.supported_by(Scope::Task));
        assert!(Metric::Latency.supported_by(Scope::Message));
        assert!(!Metric::Depth.supported_by(Scope::Thread));
        for metric in Metric::ALL {
            assert!(metric.supported_by(Scope::Path));
        }
    }

    #[test]
    fn test_limit_deserialize_defaults() {
        let limit: Limit = serde_json::from_str(r#"{"metric":"real_time","max":0.5}"#).unwrap();
        assert_eq!(limit.metric, Metric::RealTime);
        assert_eq!(limit.min, Limit::UNBOUNDED);
        assert_eq!(limit.max, 0.5);
    }

    #[test]
    fn test_metric_aliases() {
        let metric: Metric = serde_json::from_str("\"utime\"").unwrap();
        assert_eq!(metric, Metric::UserTime);
    }
}
