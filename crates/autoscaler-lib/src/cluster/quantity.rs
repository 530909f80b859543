//! Kubernetes resource quantity parsing
//!
//! Handles the forms the API server accepts:
//! - plain numbers: `2`, `0.5`
//! - decimal SI suffixes: `500m`, `1k`, `2G`
//! - binary suffixes: `512Mi`, `8Gi`
//! - decimal exponents: `1e3`, `12E6`

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity string into its numeric value
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))?;
            10.0_f64.powi(exponent.parse::<i32>().ok()?)
        }
    };

    let parsed = value * multiplier;
    parsed.is_finite().then_some(parsed)
}

/// CPU quantity as approximate cores
pub fn cpu_cores(quantity: &Quantity) -> Option<f64> {
    parse_quantity(&quantity.0)
}

/// Memory quantity in bytes, rounded up to a whole byte
pub fn memory_bytes(quantity: &Quantity) -> Option<i64> {
    parse_quantity(&quantity.0).map(|value| value.ceil() as i64)
}
