use std::cmp;

fn bits_helper(n: u64, i: u64) -> u64 {
    if n == 0 {
        i
    } else {
        bits_helper(n / 2, i + 1)
    }
}

/// Number of bits needed to represent a number.
pub fn bits_needed_for(n: u64) -> u64 {
    cmp::max(bits_helper(n - 1, 0), 1)
}

/// Ceiling of the base-2 logarithm. `clog2(1)` is 0.
pub fn clog2(v: u64) -> u64 {
    64 - u64::from(v.saturating_sub(1).leading_zeros())
}

/// Greatest common divisor. Used to derive the external bus width of a
/// resource from its required width and the platform maximum.
pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
