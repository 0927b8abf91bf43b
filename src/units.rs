//! Runtime unit conversion.
//!
//! Field metadata declares a base unit; the user may retarget a field to a
//! compatible unit at runtime. Conversions are linear and stored as a
//! `(multiplier, pre_add, post_add)` triple applied as
//! `(value + pre_add) * multiplier + post_add`.
//!
//! A conversion that is not in the table is skipped and the value stays in
//! base units. That soft failure is deliberate: a stale unit selection must
//! never blank out a live data stream.

use lazy_static::lazy_static;
use log::warn;
use std::collections::HashMap;

type Triple = (f64, f64, f64);

lazy_static! {
    /// base unit -> target unit -> (multiplier, pre_add, post_add)
    static ref CONVERSION_MAP: HashMap<&'static str, HashMap<&'static str, Triple>> = {
        let mut map = HashMap::new();

        // Velocity
        map.insert("MPS", vec![
            ("MPS", (1.0, 0.0, 0.0)),
            ("MPH", (2.237, 0.0, 0.0)),
            ("KNOT", (1.944, 0.0, 0.0)),
        ].into_iter().collect());
        map.insert("MPH", vec![
            ("MPS", (0.447, 0.0, 0.0)),
            ("MPH", (1.0, 0.0, 0.0)),
            ("KNOT", (0.869, 0.0, 0.0)),
        ].into_iter().collect());
        map.insert("KNOT", vec![
            ("MPS", (0.5144, 0.0, 0.0)),
            ("MPH", (1.151, 0.0, 0.0)),
            ("KNOT", (1.0, 0.0, 0.0)),
        ].into_iter().collect());

        // Angle
        map.insert("RAD", vec![
            ("RAD", (1.0, 0.0, 0.0)),
            ("DEG", (57.3, 0.0, 0.0)),
        ].into_iter().collect());
        map.insert("DEG", vec![
            ("RAD", (0.0175, 0.0, 0.0)),
            ("DEG", (1.0, 0.0, 0.0)),
        ].into_iter().collect());

        // Temperature
        map.insert("K", vec![
            ("K", (1.0, 0.0, 0.0)),
            ("CEL", (1.0, -273.15, 0.0)),
            ("FAR", (1.8, -273.15, 32.0)),
        ].into_iter().collect());
        map.insert("FAR", vec![
            ("K", (0.556, -32.0, 273.15)),
            ("CEL", (0.556, -32.0, 0.0)),
            ("FAR", (1.0, 0.0, 0.0)),
        ].into_iter().collect());
        map.insert("CEL", vec![
            ("K", (1.0, 273.15, 0.0)),
            ("CEL", (1.0, 0.0, 0.0)),
            ("FAR", (1.8, 0.0, 32.0)),
        ].into_iter().collect());

        map
    };
}

/// Normalizes a metadata unit string to its canonical table key.
pub fn canonical_unit(raw: &str) -> String {
    if raw == "m/s" {
        "MPS".to_string()
    } else {
        raw.to_uppercase()
    }
}

/// Converts `value` from `base` to `target` units, returning the input
/// unchanged (and logging) when the pair is not in the table.
pub fn convert(value: f64, base: &str, target: &str) -> f64 {
    match CONVERSION_MAP.get(base).and_then(|m| m.get(target)) {
        Some(&(multiplier, pre_add, post_add)) => (value + pre_add) * multiplier + post_add,
        None => {
            warn!("no unit conversion from {} to {}, leaving value as-is", base, target);
            value
        }
    }
}

/// The target units a field with the given base unit may be displayed in.
/// Intended for populating a unit-selection control.
pub fn targets_for(base: &str) -> Vec<&'static str> {
    let mut targets: Vec<&'static str> = CONVERSION_MAP
        .get(base)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    targets.sort_unstable();
    targets
}
