//! Time Samples
//!
//! The stored form of the reserved `timeSamples` field is a pair of
//! parallel vectors: sorted sample times (shared, copy-on-write) and
//! their values (which may still be lazy references into the file).
//! The public exchange form is an ordered time-to-value map. The store
//! converts internal to public on read and public to internal on
//! write; neither form exists redundantly.

use crate::shared::Shared;
use strata_core::{Value, ValueItem};

/// Internal two-vector storage for a spec's time samples.
///
/// Invariant: `times` is strictly increasing and `values` is the same
/// length, `values[i]` sampled at `times[i]`.
#[derive(Clone, Debug, Default)]
pub struct TimeSamples {
    pub(crate) times: Shared<Vec<f64>>,
    pub(crate) values: Vec<Value>,
}

impl TimeSamples {
    pub fn len(&self) -> usize {
        self.times.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.get().is_empty()
    }

    pub fn times(&self) -> &[f64] {
        self.times.get()
    }

    /// Index of `time` in the sample vector, or the insertion point.
    pub(crate) fn lower_bound(&self, time: f64) -> Result<usize, usize> {
        self.times
            .get()
            .binary_search_by(|t| t.partial_cmp(&time).expect("sample times are finite"))
    }

    /// Insert a sample, replacing any existing sample at `time`.
    pub(crate) fn insert(&mut self, time: f64, value: Value) {
        match self.lower_bound(time) {
            Ok(i) => self.values[i] = value,
            Err(i) => {
                self.times.get_mut().insert(i, time);
                self.values.insert(i, value);
            }
        }
    }

    /// Remove the sample at exactly `time`, if present.
    pub(crate) fn remove(&mut self, time: f64) -> bool {
        match self.lower_bound(time) {
            Ok(i) => {
                self.times.get_mut().remove(i);
                self.values.remove(i);
                true
            }
            Err(_) => false,
        }
    }
}

impl PartialEq for TimeSamples {
    fn eq(&self, other: &Self) -> bool {
        self.times == other.times && self.values == other.values
    }
}

impl ValueItem for TimeSamples {}

/// Public exchange form: samples as an ordered (time, value) map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSampleMap(Vec<(f64, Value)>);

impl TimeSampleMap {
    pub fn new() -> TimeSampleMap {
        TimeSampleMap(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set the value at `time`, replacing any existing entry.
    pub fn set(&mut self, time: f64, value: Value) {
        match self
            .0
            .binary_search_by(|(t, _)| t.partial_cmp(&time).expect("sample times are finite"))
        {
            Ok(i) => self.0[i].1 = value,
            Err(i) => self.0.insert(i, (time, value)),
        }
    }

    pub fn get(&self, time: f64) -> Option<&Value> {
        self.0
            .binary_search_by(|(t, _)| t.partial_cmp(&time).expect("sample times are finite"))
            .ok()
            .map(|i| &self.0[i].1)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (f64, Value)> {
        self.0.iter()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|(t, _)| *t)
    }
}

impl FromIterator<(f64, Value)> for TimeSampleMap {
    fn from_iter<I: IntoIterator<Item = (f64, Value)>>(iter: I) -> Self {
        let mut map = TimeSampleMap::new();
        for (t, v) in iter {
            map.set(t, v);
        }
        map
    }
}

impl ValueItem for TimeSampleMap {}

/// Internal-to-public conversion, applied on read. Sample values may
/// still be lazy; the caller resolves them first when materializing.
pub(crate) fn make_time_sample_map(ts: &TimeSamples, resolve: impl Fn(&Value) -> Value) -> TimeSampleMap {
    ts.times
        .get()
        .iter()
        .zip(ts.values.iter())
        .map(|(t, v)| (*t, resolve(v)))
        .collect()
}

/// Public-to-internal conversion, applied on write.
pub(crate) fn make_time_samples(map: &TimeSampleMap) -> TimeSamples {
    let mut ts = TimeSamples::default();
    {
        let times = ts.times.get_mut();
        times.reserve(map.len());
        ts.values.reserve(map.len());
        for (t, v) in map.iter() {
            times.push(*t);
            ts.values.push(v.clone());
        }
    }
    ts
}

/// Bracketing times within a sorted time vector: the closest sample at
/// or below `time` and the closest at or above. Outside the range both
/// clamp to the nearest end. Empty input has no bracket.
pub(crate) fn bracketing_times(times: &[f64], time: f64) -> Option<(f64, f64)> {
    let (first, last) = (*times.first()?, *times.last()?);
    if time <= first {
        return Some((first, first));
    }
    if time >= last {
        return Some((last, last));
    }
    match times.binary_search_by(|t| t.partial_cmp(&time).expect("sample times are finite")) {
        Ok(i) => Some((times[i], times[i])),
        Err(i) => Some((times[i - 1], times[i])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_sorted_and_replaces() {
        let mut ts = TimeSamples::default();
        ts.insert(1.0, Value::new(10i64));
        ts.insert(0.0, Value::new(0i64));
        ts.insert(2.0, Value::new(20i64));
        assert_eq!(ts.times(), &[0.0, 1.0, 2.0]);

        // Duplicate time replaces, never grows.
        ts.insert(1.0, Value::new(11i64));
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.values[1].get::<i64>(), Some(&11));
    }

    #[test]
    fn test_remove() {
        let mut ts = TimeSamples::default();
        ts.insert(0.0, Value::new(1i64));
        ts.insert(1.0, Value::new(2i64));
        assert!(ts.remove(0.0));
        assert!(!ts.remove(0.5));
        assert_eq!(ts.times(), &[1.0]);
    }

    #[test]
    fn test_shared_times_detach() {
        let mut ts = TimeSamples::default();
        ts.insert(0.0, Value::new(1i64));
        let copy = ts.clone();
        assert!(ts.times.ptr_eq(&copy.times));
        ts.insert(1.0, Value::new(2i64));
        assert!(!ts.times.ptr_eq(&copy.times));
        assert_eq!(copy.times(), &[0.0]);
    }

    #[test]
    fn test_map_conversions_round_trip() {
        let mut map = TimeSampleMap::new();
        map.set(1.0, Value::new(2.0f64));
        map.set(0.0, Value::new(1.0f64));
        let ts = make_time_samples(&map);
        assert_eq!(ts.times(), &[0.0, 1.0]);
        let back = make_time_sample_map(&ts, Clone::clone);
        assert_eq!(back, map);
    }

    #[test]
    fn test_bracketing_times() {
        let times = [0.0, 1.0, 4.0];
        assert_eq!(bracketing_times(&times, -1.0), Some((0.0, 0.0)));
        assert_eq!(bracketing_times(&times, 0.0), Some((0.0, 0.0)));
        assert_eq!(bracketing_times(&times, 0.5), Some((0.0, 1.0)));
        assert_eq!(bracketing_times(&times, 2.0), Some((1.0, 4.0)));
        assert_eq!(bracketing_times(&times, 9.0), Some((4.0, 4.0)));
        assert_eq!(bracketing_times(&[], 0.0), None);
    }
}
