//! Destination normalization.
//!
//! Turns whatever a campaign operator typed into the canonical routable
//! address a gateway accepts. Deterministic and idempotent: feeding an
//! already-normalized address back through is a no-op.

/// Digits a local 10-digit mobile number may start with.
const MOBILE_RANGE: [char; 4] = ['6', '7', '8', '9'];

/// Normalize a recipient address into a routable form.
///
/// Rules, in order:
/// - an input already carrying the routing suffix is returned unchanged
/// - non-digit characters are stripped
/// - a leading `+` means the country code is already present
/// - a bare 10-digit number starting in the mobile range gets the default
///   country code prefixed
/// - the routing suffix is appended
pub fn normalize_destination(input: &str, default_country_code: &str, suffix: &str) -> String {
    let trimmed = input.trim();

    if trimmed.ends_with(suffix) {
        return trimmed.to_string();
    }

    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    let number = if !has_plus
        && digits.len() == 10
        && digits.chars().next().is_some_and(|c| MOBILE_RANGE.contains(&c))
    {
        format!("{default_country_code}{digits}")
    } else {
        digits
    };

    format!("{number}{suffix}")
}
