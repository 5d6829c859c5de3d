//! Condition sets: a fixed list of dependency conditions plus one aggregate
//! condition derived from them.

use std::fmt;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Aggregate type for long-running sources.
pub const READY: &str = "Ready";
/// Aggregate type for run-to-completion sources.
pub const SUCCEEDED: &str = "Succeeded";
/// Dependency shared by every source kind: the sink resolved to a URI.
pub const SINK_PROVIDED: &str = "SinkProvided";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    pub fn new(type_: &str, status: ConditionStatus) -> Self {
        Self { type_: type_.to_string(), status, reason: None, message: None, last_transition_time: None }
    }

    pub fn with_reason(mut self, reason: &str, message: &str) -> Self {
        self.reason = non_empty(reason);
        self.message = non_empty(message);
        self
    }

    pub fn is_true(&self) -> bool { self.status == ConditionStatus::True }
    pub fn is_false(&self) -> bool { self.status == ConditionStatus::False }
    pub fn is_unknown(&self) -> bool { self.status == ConditionStatus::Unknown }

    pub fn reason(&self) -> &str { self.reason.as_deref().unwrap_or("") }
    pub fn message(&self) -> &str { self.message.as_deref().unwrap_or("") }

    /// Same status, reason and message; the transition time is ignored.
    pub fn same_observation(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

/// Look up a condition by type in a plain slice.
pub fn find<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Immutable description of one kind's conditions: the aggregate ("happy")
/// type and the dependency types it is derived from, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionSet {
    happy: &'static str,
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(happy: &'static str, dependents: &'static [&'static str]) -> Self {
        Self { happy, dependents }
    }

    pub fn happy(&self) -> &'static str { self.happy }
    pub fn dependents(&self) -> &'static [&'static str] { self.dependents }

    pub fn is_dependent(&self, type_: &str) -> bool {
        self.dependents.iter().any(|d| *d == type_)
    }

    /// Borrow a condition list for mutation under this set's rules.
    pub fn manage<'a>(&self, conditions: &'a mut Vec<Condition>) -> ConditionTracker<'a> {
        ConditionTracker { set: *self, conditions }
    }

    /// True iff every dependency is present and True.
    pub fn is_happy(&self, conditions: &[Condition]) -> bool {
        self.dependents
            .iter()
            .all(|d| find(conditions, d).map(Condition::is_true).unwrap_or(false))
    }
}

/// Mutable view over a condition list. The aggregate condition is never set
/// directly; it is recomputed from the dependencies after every mark.
pub struct ConditionTracker<'a> {
    set: ConditionSet,
    conditions: &'a mut Vec<Condition>,
}

impl<'a> ConditionTracker<'a> {
    pub fn initialize_conditions(&mut self) {
        let happy_true = self.get_condition(self.set.happy).map(Condition::is_true).unwrap_or(false);
        let status = if happy_true { ConditionStatus::True } else { ConditionStatus::Unknown };
        for dep in self.set.dependents {
            if self.get_condition(dep).is_none() {
                self.set_condition(Condition::new(dep, status));
            }
        }
        self.recompute();
    }

    pub fn mark_true(&mut self, type_: &str) {
        self.mark(Condition::new(type_, ConditionStatus::True));
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.mark(Condition::new(type_, ConditionStatus::False).with_reason(reason, message));
    }

    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.mark(Condition::new(type_, ConditionStatus::Unknown).with_reason(reason, message));
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        find(self.conditions.as_slice(), type_)
    }

    pub fn is_happy(&self) -> bool {
        self.set.is_happy(self.conditions.as_slice())
    }

    fn mark(&mut self, cond: Condition) {
        if cond.type_ == self.set.happy {
            debug!(condition = %cond.type_, "ignoring direct mark of aggregate condition");
            return;
        }
        let dependent = self.set.is_dependent(&cond.type_);
        self.set_condition(cond);
        if dependent {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let mut first_false: Option<&Condition> = None;
        let mut first_unknown: Option<Option<&Condition>> = None;
        for dep in self.set.dependents {
            match find(self.conditions.as_slice(), dep) {
                Some(c) if c.is_true() => {}
                Some(c) if c.is_false() => {
                    if first_false.is_none() {
                        first_false = Some(c);
                    }
                }
                other => {
                    if first_unknown.is_none() {
                        first_unknown = Some(other);
                    }
                }
            }
        }
        let aggregate = match (first_false, first_unknown) {
            (Some(c), _) => Condition::new(self.set.happy, ConditionStatus::False)
                .with_reason(c.reason(), c.message()),
            (None, Some(Some(c))) => Condition::new(self.set.happy, ConditionStatus::Unknown)
                .with_reason(c.reason(), c.message()),
            (None, Some(None)) => Condition::new(self.set.happy, ConditionStatus::Unknown),
            (None, None) => Condition::new(self.set.happy, ConditionStatus::True),
        };
        self.set_condition(aggregate);
    }

    fn set_condition(&mut self, mut cond: Condition) {
        let pos = self.conditions.iter().position(|c| c.type_ == cond.type_);
        if let Some(i) = pos {
            if self.conditions[i].same_observation(&cond) {
                return;
            }
        }
        cond.last_transition_time = Some(Time(Utc::now()));
        match pos {
            Some(i) => self.conditions[i] = cond,
            None => self.conditions.push(cond),
        }
        self.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
    }
}
