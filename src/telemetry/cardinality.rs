//! Cardinality control for metric and log labels.
//!
//! Raw email addresses produce one time series per user. Dashboards only
//! need the organisation, so identities are reduced to their domain before
//! they are used as a label.

/// Label used when no domain can be extracted.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Return the domain part of an email-like string.
///
/// Strings with exactly one `@` and a non-empty domain after it yield that
/// domain, even if the local part is empty. Everything else maps to
/// [`UNKNOWN_DOMAIN`].
pub fn domain_of(email: &str) -> &str {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(domain), None) if !domain.is_empty() => domain,
        _ => UNKNOWN_DOMAIN,
    }
}
