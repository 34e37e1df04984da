use std::time::Duration;

pub(crate) fn format_bytes(b: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    if b >= GIB {
        return format!("{:.2}GiB", (b as f64) / (GIB as f64));
    }
    if b >= MIB {
        return format!("{:.2}MiB", (b as f64) / (MIB as f64));
    }
    if b >= KIB {
        return format!("{:.2}KiB", (b as f64) / (KIB as f64));
    }

    format!("{b}B")
}

pub(crate) fn format_rate(v: f64) -> String {
    if !v.is_finite() {
        return "0".to_string();
    }
    if v < 10.0 {
        format!("{v:.1}")
    } else {
        format!("{v:.0}")
    }
}

/// Milliseconds with one decimal below 100ms, whole above; `-` when absent.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() && v < 100.0 => format!("{v:.1}ms"),
        Some(v) if v.is_finite() => format!("{v:.0}ms"),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

/// Rounded to a single unit: `850ms`, `12s`, `3m 20s`.
pub(crate) fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let secs = (ms + 500) / 1000;
    if secs < 60 {
        return format!("{secs}s");
    }
    let (m, s) = (secs / 60, secs % 60);
    if s == 0 {
        format!("{m}m")
    } else {
        format!("{m}m {s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.50KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MiB");
    }

    #[test]
    fn durations_round_to_one_unit() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_400)), "12s");
        assert_eq!(format_duration(Duration::from_secs(200)), "3m 20s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }

    #[test]
    fn latency_and_rates() {
        assert_eq!(format_ms(Some(12.34)), "12.3ms");
        assert_eq!(format_ms(Some(250.6)), "251ms");
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_rate(2.27), "2.3");
        assert_eq!(format_rate(f64::NAN), "0");
        assert_eq!(format_pct(0.125), "12.50%");
    }
}
