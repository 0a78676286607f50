//! Merchant transaction references embedded in field 62/05.

use chrono::{DateTime, Utc};
use rand::Rng;

pub const TXID_MAX_LEN: usize = 35;
const SUFFIX_LEN: usize = 8;
const MINUTE_STAMP_LEN: usize = 12;
/// Room left for the prefix once the minute stamp, the dash and the suffix fit.
pub const TXID_PREFIX_MAX: usize = TXID_MAX_LEN - MINUTE_STAMP_LEN - 1 - SUFFIX_LEN;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `PREFIX` + `yyyyMMddHHmm` + `-` + random base-36 suffix, restricted to
/// `[A-Z0-9-]`. An over-long prefix is cut so the suffix always survives.
pub fn generate_txid(prefix: &str, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    build_txid(prefix, now, &suffix)
}

fn build_txid(prefix: &str, now: DateTime<Utc>, suffix: &str) -> String {
    let prefix: String = sanitize(prefix).chars().take(TXID_PREFIX_MAX).collect();
    let raw = format!("{}{}-{}", prefix, now.format("%Y%m%d%H%M"), suffix);
    sanitize(&raw)
}

/// Upper-case and keep only `[A-Z0-9-]`, capped at the txid limit.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '-')
        .take(TXID_MAX_LEN)
        .collect()
}

pub fn is_valid_txid(txid: &str) -> bool {
    !txid.is_empty()
        && txid.len() <= TXID_MAX_LEN
        && txid
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 7, 59).unwrap()
    }

    #[test]
    fn layout_is_prefix_minute_suffix() {
        assert_eq!(build_txid("sub", at(), "a1b2"), "SUB202403091407-A1B2");
    }

    #[test]
    fn generated_txids_are_valid_and_distinct() {
        let a = generate_txid("SUB", at());
        let b = generate_txid("SUB", at());
        assert!(is_valid_txid(&a), "{}", a);
        assert!(a.starts_with("SUB202403091407-"));
        assert_ne!(a, b);
    }

    #[test]
    fn long_prefix_is_truncated_to_limit() {
        let txid = generate_txid("A_VERY_LONG_PREFIX_FOR_TESTING_ONLY", at());
        assert_eq!(txid.len(), TXID_MAX_LEN);
        assert!(is_valid_txid(&txid));
        assert!(txid.starts_with("AVERYLONGPREFI202403091407-"));
    }

    #[test]
    fn long_prefix_keeps_suffix_entropy() {
        let prefix = "SUBSCRIPTIONBILLINGPREFIX";
        assert_eq!(
            build_txid(prefix, at(), "ABCD1234"),
            "SUBSCRIPTIONBI202403091407-ABCD1234"
        );

        let a = generate_txid(prefix, at());
        let b = generate_txid(prefix, at());
        assert_eq!(a.len(), TXID_MAX_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_lowercase_and_symbols() {
        assert!(!is_valid_txid("abc"));
        assert!(!is_valid_txid("ABC_1"));
        assert!(!is_valid_txid(""));
    }
}
