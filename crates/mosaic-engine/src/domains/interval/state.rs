//! Interval lattice and its payload encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use mosaic_ir::{Cmp, DeserializationError, Payload};

pub const ABSTRACTION_KEY: &str = "ABSTRACTION";
pub const ABSTRACTION_VALUE: &str = "interval";
pub const BOTTOM_KEY: &str = "BOTTOM";
pub const VARIABLE_PREFIX: &str = "var.";

/// Closed integer interval; `None` bounds are infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    lo: Option<i64>,
    hi: Option<i64>,
}

impl Interval {
    pub const TOP: Self = Self { lo: None, hi: None };

    pub const fn new(lo: Option<i64>, hi: Option<i64>) -> Self {
        Self { lo, hi }
    }

    pub const fn constant(value: i64) -> Self {
        Self::new(Some(value), Some(value))
    }

    pub const fn at_least(value: i64) -> Self {
        Self::new(Some(value), None)
    }

    pub const fn at_most(value: i64) -> Self {
        Self::new(None, Some(value))
    }

    /// Values satisfying `x cmp value`.
    pub fn from_comparison(cmp: Cmp, value: i64) -> Self {
        match cmp {
            Cmp::Lt => value.checked_sub(1).map_or(Self::EMPTY, Self::at_most),
            Cmp::Le => Self::at_most(value),
            Cmp::Eq => Self::constant(value),
            Cmp::Ge => Self::at_least(value),
            Cmp::Gt => value.checked_add(1).map_or(Self::EMPTY, Self::at_least),
        }
    }

    const EMPTY: Self = Self::new(Some(1), Some(0));

    pub fn lo(&self) -> Option<i64> {
        self.lo
    }

    pub fn hi(&self) -> Option<i64> {
        self.hi
    }

    pub fn is_top(&self) -> bool {
        self.lo.is_none() && self.hi.is_none()
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.lo, self.hi), (Some(lo), Some(hi)) if lo > hi)
    }

    pub fn contains_value(&self, value: i64) -> bool {
        self.lo.map_or(true, |lo| lo <= value) && self.hi.map_or(true, |hi| value <= hi)
    }

    /// `self ⊇ other`.
    pub fn contains(&self, other: &Interval) -> bool {
        if other.is_empty() {
            return true;
        }
        let lo_ok = match (self.lo, other.lo) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a <= b,
        };
        let hi_ok = match (self.hi, other.hi) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => b <= a,
        };
        lo_ok && hi_ok
    }

    pub fn meet(&self, other: &Interval) -> Interval {
        let lo = match (self.lo, other.lo) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let hi = match (self.hi, other.hi) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Interval { lo, hi }
    }

    pub fn hull(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let lo = match (self.lo, other.lo) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        let hi = match (self.hi, other.hi) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Interval { lo, hi }
    }

    /// Drop every bound that `newer` moved outwards.
    pub fn widen(&self, newer: &Interval) -> Interval {
        if self.is_empty() {
            return *newer;
        }
        let lo = match (self.lo, newer.lo) {
            (Some(a), Some(b)) if b >= a => Some(a),
            _ => None,
        };
        let hi = match (self.hi, newer.hi) {
            (Some(a), Some(b)) if b <= a => Some(a),
            _ => None,
        };
        Interval { lo, hi }
    }

    /// Add `offset` to both bounds. Overflowing bounds become infinite.
    pub fn shift(&self, offset: i64) -> Interval {
        Interval {
            lo: self.lo.and_then(|lo| lo.checked_add(offset)),
            hi: self.hi.and_then(|hi| hi.checked_add(offset)),
        }
    }

    /// Values `v` with `v + offset` in `self`, exact over `i64`.
    ///
    /// A bound pushed below `i64::MIN` or above `i64::MAX` on its own side
    /// becomes infinite. A bound pushed past the opposite end leaves no value.
    pub fn unshift(&self, offset: i64) -> Interval {
        if self.is_empty() {
            return *self;
        }
        let lo = match self.lo.map(|lo| lo.checked_sub(offset)) {
            None => None,
            Some(Some(lo)) => Some(lo),
            Some(None) if offset > 0 => None,
            Some(None) => return Self::EMPTY,
        };
        let hi = match self.hi.map(|hi| hi.checked_sub(offset)) {
            None => None,
            Some(Some(hi)) => Some(hi),
            Some(None) if offset < 0 => None,
            Some(None) => return Self::EMPTY,
        };
        Interval { lo, hi }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lo {
            Some(lo) => write!(f, "[{lo},")?,
            None => f.write_str("[-inf,")?,
        }
        match self.hi {
            Some(hi) => write!(f, "{hi}]"),
            None => f.write_str("+inf]"),
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| format!("interval '{s}' is not bracketed"))?;
        let (lo, hi) = inner
            .split_once(',')
            .ok_or_else(|| format!("interval '{s}' has no separator"))?;
        let bound = |raw: &str, infinite: &str| -> Result<Option<i64>, String> {
            let raw = raw.trim();
            if raw == infinite {
                Ok(None)
            } else {
                raw.parse::<i64>()
                    .map(Some)
                    .map_err(|e| format!("bad bound '{raw}': {e}"))
            }
        };
        Ok(Interval {
            lo: bound(lo, "-inf")?,
            hi: bound(hi, "+inf")?,
        })
    }
}

/// Conjunction of per-variable intervals.
///
/// Absent variables are unconstrained. Top intervals are never stored and an
/// empty interval collapses the whole state to bottom, so structural
/// equality coincides with semantic equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalState {
    vars: BTreeMap<String, Interval>,
    bottom: bool,
    condition: Option<Box<IntervalState>>,
}

impl IntervalState {
    pub fn top() -> Self {
        Self::default()
    }

    pub fn bottom() -> Self {
        Self {
            bottom: true,
            ..Self::default()
        }
    }

    /// Build a state from `(variable, interval)` constraints.
    pub fn from_constraints<'a>(constraints: impl IntoIterator<Item = (&'a str, Interval)>) -> Self {
        let mut state = Self::top();
        for (var, interval) in constraints {
            state.constrain(var, interval);
        }
        state
    }

    pub fn is_bottom(&self) -> bool {
        self.bottom
    }

    pub fn is_top(&self) -> bool {
        !self.bottom && self.vars.is_empty()
    }

    pub fn get(&self, var: &str) -> Interval {
        self.vars.get(var).copied().unwrap_or(Interval::TOP)
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&str, &Interval)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Replace the interval of `var`.
    pub fn set(&mut self, var: &str, interval: Interval) {
        if self.bottom {
            return;
        }
        if interval.is_empty() {
            self.make_bottom();
        } else if interval.is_top() {
            self.vars.remove(var);
        } else {
            self.vars.insert(var.to_string(), interval);
        }
    }

    /// Intersect the interval of `var` with `interval`.
    pub fn constrain(&mut self, var: &str, interval: Interval) {
        let met = self.get(var).meet(&interval);
        self.set(var, met);
    }

    pub fn forget(&mut self, var: &str) {
        self.vars.remove(var);
    }

    fn make_bottom(&mut self) {
        self.vars.clear();
        self.bottom = true;
    }

    pub fn meet(&self, other: &IntervalState) -> IntervalState {
        if self.bottom || other.bottom {
            return Self::bottom();
        }
        let mut out = self.without_condition();
        for (var, interval) in &other.vars {
            out.constrain(var, *interval);
        }
        out
    }

    /// Least upper bound; only variables constrained on both sides stay
    /// constrained. Keeps an attached condition.
    pub fn join(&self, other: &IntervalState) -> IntervalState {
        let condition = self.condition.clone().or_else(|| other.condition.clone());
        let mut out = if self.bottom {
            other.without_condition()
        } else if other.bottom {
            self.without_condition()
        } else {
            let mut out = Self::top();
            for (var, a) in &self.vars {
                if let Some(b) = other.vars.get(var) {
                    out.set(var, a.hull(b));
                }
            }
            out
        };
        out.condition = condition;
        out
    }

    /// Join that gives up on every bound `newer` moved.
    pub fn widen(&self, newer: &IntervalState) -> IntervalState {
        let condition = self.condition.clone().or_else(|| newer.condition.clone());
        let mut out = if self.bottom {
            newer.without_condition()
        } else if newer.bottom {
            self.without_condition()
        } else {
            let mut out = Self::top();
            for (var, a) in &self.vars {
                if let Some(b) = newer.vars.get(var) {
                    out.set(var, a.widen(b));
                }
            }
            out
        };
        out.condition = condition;
        out
    }

    /// `self ⊑ other`, ignoring attached conditions.
    pub fn is_covered_by(&self, other: &IntervalState) -> bool {
        if self.bottom {
            return true;
        }
        if other.bottom {
            return false;
        }
        other
            .vars
            .iter()
            .all(|(var, bound)| bound.contains(&self.get(var)))
    }

    pub fn condition(&self) -> Option<&IntervalState> {
        self.condition.as_deref()
    }

    pub fn set_condition(&mut self, condition: IntervalState) {
        self.condition = Some(Box::new(condition.without_condition()));
    }

    pub fn without_condition(&self) -> IntervalState {
        IntervalState {
            vars: self.vars.clone(),
            bottom: self.bottom,
            condition: None,
        }
    }

    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(ABSTRACTION_KEY, ABSTRACTION_VALUE);
        if self.bottom {
            payload.insert(BOTTOM_KEY, "true");
            return payload;
        }
        for (var, interval) in &self.vars {
            payload.insert(format!("{VARIABLE_PREFIX}{var}"), interval.to_string());
        }
        payload
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, DeserializationError> {
        match payload.get(ABSTRACTION_KEY) {
            Some(ABSTRACTION_VALUE) => {}
            Some(other) => {
                return Err(DeserializationError::InvalidValue {
                    key: ABSTRACTION_KEY.to_string(),
                    value: other.to_string(),
                })
            }
            None => return Err(DeserializationError::MissingKey(ABSTRACTION_KEY.to_string())),
        }
        let mut state = Self::top();
        for (key, value) in payload.state_entries() {
            if key == ABSTRACTION_KEY {
                continue;
            }
            if key == BOTTOM_KEY {
                match value {
                    "true" => state.make_bottom(),
                    "false" => {}
                    other => {
                        return Err(DeserializationError::InvalidValue {
                            key: key.to_string(),
                            value: other.to_string(),
                        })
                    }
                }
                continue;
            }
            let var = key.strip_prefix(VARIABLE_PREFIX).ok_or_else(|| {
                DeserializationError::MalformedState(format!("unexpected payload key '{key}'"))
            })?;
            let interval: Interval = value
                .parse()
                .map_err(DeserializationError::MalformedState)?;
            state.constrain(var, interval);
        }
        if state.bottom {
            state.vars.clear();
        }
        Ok(state)
    }
}

impl fmt::Display for IntervalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bottom {
            return f.write_str("bottom");
        }
        if self.vars.is_empty() {
            return f.write_str("top");
        }
        let parts: Vec<String> = self
            .vars
            .iter()
            .map(|(var, interval)| format!("{var} in {interval}"))
            .collect();
        f.write_str(&parts.join(", "))
    }
}
