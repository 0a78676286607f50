//! PIX "copia e cola" payloads: TLV encoding, CRC-16 checksum, txid generation.

pub mod crc;
pub mod payload;
pub mod tlv;
pub mod txid;

pub use payload::{format_amount, normalize_text, verify_checksum, CodeKind, PixPayload};
pub use txid::{generate_txid, is_valid_txid};
