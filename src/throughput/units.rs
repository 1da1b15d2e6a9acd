//! Conversion from measured application-layer bytes to network-layer bits.

/// Framing and header overhead between HTTP payload bytes and bytes on the
/// wire. Fixed, not measured.
pub const DEFAULT_OVERHEAD_FACTOR: f64 = 1.0415;

/// Estimated network-layer bit rate for an application-layer byte rate.
pub fn application_bytes_to_network_bits(bytes_per_sec: f64, overhead_factor: f64) -> f64 {
    bytes_per_sec * 8.0 * overhead_factor
}

/// Display value in Mbps (binary mega), rounded to one decimal digit.
pub fn to_mbps(bytes_per_sec: f64, overhead_factor: f64) -> f64 {
    let mbps = application_bytes_to_network_bits(bytes_per_sec, overhead_factor) / 1024.0 / 1024.0;
    round_one_decimal(mbps)
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_include_overhead() {
        let bits = application_bytes_to_network_bits(1000.0, DEFAULT_OVERHEAD_FACTOR);
        assert!((bits - 8332.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_stays_zero() {
        assert_eq!(to_mbps(0.0, DEFAULT_OVERHEAD_FACTOR), 0.0);
    }

    #[test]
    fn test_one_mib_per_second() {
        // 1 MiB/s * 8 * 1.0415 = 8.332 Mbps
        assert_eq!(to_mbps(1024.0 * 1024.0, DEFAULT_OVERHEAD_FACTOR), 8.3);
    }

    #[test]
    fn test_three_streams_of_two_mib() {
        // 6 MiB/s * 8 * 1.0415 = 49.992 Mbps
        assert_eq!(to_mbps(6.0 * 1024.0 * 1024.0, DEFAULT_OVERHEAD_FACTOR), 50.0);
    }

    #[test]
    fn test_unit_overhead_is_plain_bits() {
        assert_eq!(to_mbps(1024.0 * 1024.0 / 8.0, 1.0), 1.0);
    }
}
