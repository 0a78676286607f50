//! Tag-length-value fields: 2-digit id, 2-digit decimal byte length, value.

use service_core::error::AppError;

/// Longest value a two-digit length can describe.
pub const MAX_VALUE_LEN: usize = 99;

/// Encode one field. The length is the UTF-8 byte length of `value`.
pub fn encode_field(id: &str, value: &str) -> Result<String, AppError> {
    if id.len() != 2 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "TLV id must be two digits, got '{}'",
            id
        )));
    }

    let len = value.len();
    if len > MAX_VALUE_LEN {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "TLV field {} is {} bytes, limit is {}",
            id,
            len,
            MAX_VALUE_LEN
        )));
    }

    Ok(format!("{}{:02}{}", id, len, value))
}

/// Encode a composite field whose value is itself a sequence of TLV fields.
pub fn encode_composite(id: &str, children: &[(&str, &str)]) -> Result<String, AppError> {
    let mut inner = String::new();
    for (child_id, child_value) in children {
        inner.push_str(&encode_field(child_id, child_value)?);
    }
    encode_field(id, &inner)
}

/// A decoded field, borrowing from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<'a> {
    pub id: &'a str,
    pub declared_len: usize,
    pub value: &'a str,
}

/// Split a flat TLV string into its top-level fields.
///
/// Lengths count bytes; a declared length that runs past the end of the
/// input or splits a UTF-8 character is an error.
pub fn parse_fields(input: &str) -> Result<Vec<Field<'_>>, AppError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let header = input
            .as_bytes()
            .get(pos..pos + 4)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Truncated TLV header at {}", pos)))?;
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Non-numeric TLV header at {}",
                pos
            )));
        }
        // All four header bytes are ASCII, so both slices sit on char boundaries.
        let id = &input[pos..pos + 2];
        let declared_len = usize::from(header[2] - b'0') * 10 + usize::from(header[3] - b'0');

        let start = pos + 4;
        let end = start + declared_len;
        let value = input.get(start..end).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "TLV field {} declares {} bytes past end of input",
                id,
                declared_len
            ))
        })?;

        fields.push(Field {
            id,
            declared_len,
            value,
        });
        pos = end;
    }

    Ok(fields)
}
