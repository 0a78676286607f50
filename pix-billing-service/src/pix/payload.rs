//! BR Code "copy and paste" payload encoder.

use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::crc::checksum_hex;
use super::tlv::{encode_composite, encode_field, parse_fields};

pub const MERCHANT_NAME_MAX: usize = 25;
pub const MERCHANT_CITY_MAX: usize = 15;
/// Field 26 holds the GUI subfield (18 chars) plus `01`, a length and the key.
pub const PIX_KEY_MAX: usize = 77;

const GUI: &str = "BR.GOV.BCB.PIX";
const PAYLOAD_FORMAT: &str = "01";
const INITIATION_STATIC: &str = "11";
const INITIATION_DYNAMIC: &str = "12";
const MERCHANT_CATEGORY: &str = "0000";
const CURRENCY_BRL: &str = "986";
const COUNTRY: &str = "BR";
const STATIC_REFERENCE: &str = "***";
const CRC_HEADER: &str = "6304";

/// Whether the code may be paid once (dynamic) or reused (static).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Static,
    Dynamic,
}

impl CodeKind {
    fn initiation_method(self) -> &'static str {
        match self {
            CodeKind::Static => INITIATION_STATIC,
            CodeKind::Dynamic => INITIATION_DYNAMIC,
        }
    }
}

/// Everything that goes into one payload.
#[derive(Debug, Clone)]
pub struct PixPayload<'a> {
    pub key: &'a str,
    pub merchant_name: &'a str,
    pub merchant_city: &'a str,
    pub amount: Decimal,
    pub txid: &'a str,
    pub kind: CodeKind,
}

impl PixPayload<'_> {
    /// Encode to the final string, checksum included. Same input, same bytes.
    pub fn encode(&self) -> Result<String, AppError> {
        let key = self.key.trim();
        if key.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("PIX key is empty")));
        }

        let name = normalize_text(self.merchant_name, MERCHANT_NAME_MAX);
        let city = normalize_text(self.merchant_city, MERCHANT_CITY_MAX);
        if name.is_empty() || city.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Merchant name and city must keep at least one character after normalization"
            )));
        }

        let reference = match self.kind {
            CodeKind::Static => STATIC_REFERENCE,
            CodeKind::Dynamic => self.txid,
        };

        let mut payload = String::with_capacity(160);
        payload.push_str(&encode_field("00", PAYLOAD_FORMAT)?);
        payload.push_str(&encode_field("01", self.kind.initiation_method())?);
        payload.push_str(&encode_composite("26", &[("00", GUI), ("01", key)])?);
        payload.push_str(&encode_field("52", MERCHANT_CATEGORY)?);
        payload.push_str(&encode_field("53", CURRENCY_BRL)?);
        payload.push_str(&encode_field("54", &format_amount(self.amount)?)?);
        payload.push_str(&encode_field("58", COUNTRY)?);
        payload.push_str(&encode_field("59", &name)?);
        payload.push_str(&encode_field("60", &city)?);
        payload.push_str(&encode_composite("62", &[("05", reference)])?);
        payload.push_str(CRC_HEADER);

        let crc = checksum_hex(payload.as_bytes());
        payload.push_str(&crc);

        Ok(payload)
    }
}

/// Strip diacritics, upper-case, keep `[A-Z0-9 -.]`, then cut to `max` chars.
pub fn normalize_text(input: &str, max: usize) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, ' ' | '-' | '.'))
        .take(max)
        .collect()
}

/// Two fractional digits, no grouping, half-up rounding.
pub fn format_amount(amount: Decimal) -> Result<String, AppError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "PIX amount cannot be negative: {}",
            amount
        )));
    }

    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    Ok(rounded.to_string())
}

/// Recompute the trailing checksum of a payload and compare.
pub fn verify_checksum(payload: &str) -> bool {
    if payload.len() < CRC_HEADER.len() + 4 || !payload.is_char_boundary(payload.len() - 4) {
        return false;
    }

    let (body, crc) = payload.split_at(payload.len() - 4);
    body.ends_with(CRC_HEADER) && checksum_hex(body.as_bytes()) == crc
}

/// Top-level field lookup, used by status views and tests.
pub fn field_value<'a>(payload: &'a str, id: &str) -> Option<&'a str> {
    parse_fields(payload)
        .ok()?
        .into_iter()
        .find(|f| f.id == id)
        .map(|f| f.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pix::tlv::parse_fields;
    use std::str::FromStr;

    fn dynamic_payload(amount: &str) -> String {
        PixPayload {
            key: "pagamentos@exemplo.com.br",
            merchant_name: "Loja São João Ltda",
            merchant_city: "São Paulo",
            amount: Decimal::from_str(amount).unwrap(),
            txid: "SUB202401011200-ABC123",
            kind: CodeKind::Dynamic,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(dynamic_payload("49.90"), dynamic_payload("49.90"));
    }

    #[test]
    fn checksum_round_trips() {
        let payload = dynamic_payload("49.90");
        assert!(verify_checksum(&payload));

        let mut tampered = payload.clone();
        tampered.replace_range(20..21, "X");
        assert!(!verify_checksum(&tampered));
    }

    #[test]
    fn declared_lengths_match_value_bytes() {
        let payload = dynamic_payload("49.90");
        for field in parse_fields(&payload).unwrap() {
            assert_eq!(field.declared_len, field.value.len(), "field {}", field.id);
            if field.id == "26" || field.id == "62" {
                for inner in parse_fields(field.value).unwrap() {
                    assert_eq!(inner.declared_len, inner.value.len());
                }
            }
        }
    }

    #[test]
    fn fields_appear_in_order_with_expected_values() {
        let payload = dynamic_payload("49.90");
        let ids: Vec<_> = parse_fields(&payload)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(
            ids,
            vec!["00", "01", "26", "52", "53", "54", "58", "59", "60", "62", "63"]
        );
        assert_eq!(field_value(&payload, "01"), Some("12"));
        assert_eq!(field_value(&payload, "54"), Some("49.90"));
        assert_eq!(field_value(&payload, "59"), Some("LOJA SAO JOAO LTDA"));
        assert_eq!(field_value(&payload, "60"), Some("SAO PAULO"));
        assert_eq!(
            field_value(&payload, "62"),
            Some("0522SUB202401011200-ABC123")
        );
    }

    #[test]
    fn static_code_uses_placeholder_reference() {
        let payload = PixPayload {
            key: "12345678900",
            merchant_name: "Fulano",
            merchant_city: "Recife",
            amount: Decimal::from_str("10").unwrap(),
            txid: "IGNORED",
            kind: CodeKind::Static,
        }
        .encode()
        .unwrap();

        assert_eq!(field_value(&payload, "01"), Some("11"));
        assert_eq!(field_value(&payload, "62"), Some("0503***"));
        assert!(verify_checksum(&payload));
    }

    #[test]
    fn normalization_truncates_after_stripping() {
        // 26 visible characters once accents are gone: truncation must land on
        // the normalized form, not cut a multi-byte sequence.
        let name = normalize_text("ÁÉÍÓÚ ÇÃÕ Comércio & Cia. Ltda", MERCHANT_NAME_MAX);
        assert_eq!(name, "AEIOU CAO COMERCIO  CIA. ");
        assert_eq!(name.len(), MERCHANT_NAME_MAX);
    }

    #[test]
    fn normalization_drops_disallowed_characters() {
        assert_eq!(normalize_text("Brasília/DF!", 15), "BRASILIADF");
    }

    #[test]
    fn amount_rounds_half_up() {
        assert_eq!(format_amount(Decimal::from_str("10.005").unwrap()).unwrap(), "10.01");
        assert_eq!(format_amount(Decimal::from_str("10.004").unwrap()).unwrap(), "10.00");
        assert_eq!(format_amount(Decimal::from_str("1234567.5").unwrap()).unwrap(), "1234567.50");
        assert_eq!(format_amount(Decimal::from_str("7").unwrap()).unwrap(), "7.00");
    }

    #[test]
    fn negative_amount_rejected() {
        assert!(format_amount(Decimal::from_str("-1.00").unwrap()).is_err());
    }

    #[test]
    fn empty_key_rejected() {
        let result = PixPayload {
            key: "  ",
            merchant_name: "Loja",
            merchant_city: "Rio",
            amount: Decimal::ONE,
            txid: "T1",
            kind: CodeKind::Dynamic,
        }
        .encode();
        assert!(result.is_err());
    }
}
