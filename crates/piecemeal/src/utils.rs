//! Utility functions

/// transform bytes into a human readable format, in binary units.
pub fn to_human_readable(mut n: f64) -> String {
    let units = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    let delimiter = 1024_f64;

    if n < delimiter {
        return format!("{} {}", trim(n), units[0]);
    }

    let mut u = 0;

    while (n * 100.0).round() / 100.0 >= delimiter && u < units.len() - 1 {
        n /= delimiter;
        u += 1;
    }

    format!("{} {}", trim(n), units[u])
}

// 2 decimal places, without trailing zeros
fn trim(n: f64) -> String {
    let formatted = format!("{:.2}", n);
    formatted.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// `part` as a percentage of `total`, 100 when `total` is zero.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    part as f64 / total as f64 * 100.0
}
