// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Unit scaling for sample values.

struct Unit {
    names: &'static [&'static str],
    factor: f64,
}

struct UnitGroup {
    units: &'static [Unit],
}

const TIME: UnitGroup = UnitGroup {
    units: &[
        Unit { names: &["ns", "nanosecond", "nanoseconds"], factor: 1.0 },
        Unit { names: &["us", "microsecond", "microseconds"], factor: 1e3 },
        Unit { names: &["ms", "millisecond", "milliseconds"], factor: 1e6 },
        Unit { names: &["s", "sec", "second", "seconds"], factor: 1e9 },
        Unit { names: &["hrs", "hour", "hours"], factor: 3600e9 },
    ],
};

const MEMORY: UnitGroup = UnitGroup {
    units: &[
        Unit { names: &["B", "b", "byte", "bytes"], factor: 1.0 },
        Unit { names: &["kB", "kb", "kilobyte", "kilobytes"], factor: 1024.0 },
        Unit { names: &["MB", "mb", "megabyte", "megabytes"], factor: 1024.0 * 1024.0 },
        Unit { names: &["GB", "gb", "gigabyte", "gigabytes"], factor: 1024.0 * 1024.0 * 1024.0 },
        Unit { names: &["TB", "tb", "terabyte", "terabytes"], factor: 1024.0 * 1024.0 * 1024.0 * 1024.0 },
    ],
};

static GROUPS: [UnitGroup; 2] = [TIME, MEMORY];

/// Group index and unit for a unit name.
fn find(unit: &str) -> Option<(usize, &'static Unit)> {
    GROUPS.iter().enumerate().find_map(|(i, g)| {
        g.units
            .iter()
            .find(|u| u.names.iter().any(|n| *n == unit))
            .map(|u| (i, u))
    })
}

/// Whether `unit` names a known unit, or is one of the automatic modes.
pub fn is_known_output_unit(unit: &str) -> bool {
    matches!(unit, "" | "minimum" | "auto") || find(unit).is_some()
}

/// Converts `value` from `from_unit` into `to_unit`.
///
/// `to_unit` may be `auto`/`minimum` to pick the largest unit that keeps the
/// value at or above one. Unknown units, or units from different groups, are
/// passed through unscaled.
pub fn scale(value: i64, from_unit: &str, to_unit: &str) -> (f64, String) {
    let Some((group_index, from)) = find(from_unit) else {
        return (value as f64, from_unit.to_owned());
    };
    let base = value as f64 * from.factor;
    match to_unit {
        "" | "auto" | "minimum" => {
            let units = GROUPS[group_index].units;
            let unit = units
                .iter()
                .rev()
                .find(|u| base.abs() >= u.factor)
                .unwrap_or(&units[0]);
            (base / unit.factor, unit.names[0].to_owned())
        }
        to => match find(to) {
            Some((g, u)) if g == group_index => (base / u.factor, u.names[0].to_owned()),
            _ => (value as f64, from.names[0].to_owned()),
        },
    }
}

/// A short label like `1.50s` or `200ms`.
pub fn scaled_label(value: i64, from_unit: &str, to_unit: &str) -> String {
    let (v, unit) = scale(value, from_unit, to_unit);
    let unit = if unit == "count" { "" } else { unit.as_str() };
    let num = format!("{v:.2}");
    let num = num.strip_suffix(".00").unwrap_or(&num);
    format!("{num}{unit}")
}

/// `part` as a percentage of `total`, formatted with two decimals.
pub fn percentage(part: i64, total: i64) -> String {
    if total == 0 {
        return "0%".to_owned();
    }
    let ratio = part as f64 / total as f64 * 100.0;
    if ratio.abs() >= 99.995 && ratio.abs() <= 100.005 {
        "100%".to_owned()
    } else {
        format!("{ratio:.2}%")
    }
}
