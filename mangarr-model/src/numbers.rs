use std::cmp::Ordering;

/// Renders volume and chapter numbers the way file names and archive
/// metadata expect them: `3.0` becomes `3`, `3.5` stays `3.5`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Numeric identity used for volume lookup.
pub fn same_number(a: f64, b: f64) -> bool {
    a == b
}

/// Total order over reported numbers with NaN sorted last.
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}
