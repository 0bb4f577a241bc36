//! Public identifier formats: `QR_<hex-hash>_<unix-millis>` and `BATCH_<unix-millis>`.

use serde::Serialize;

use crate::{
    constants::{BATCH_PREFIX, QR_PREFIX},
    hash::rolling_hash,
    Timestamp,
};

/// Mints a QR value for `payload`. The hash is the rolling hash of the
/// payload's compact JSON so codes match those already printed on labels.
pub fn qr_code<T: Serialize>(payload: &T, now_ms: Timestamp) -> serde_json::Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(format!("{QR_PREFIX}{}_{now_ms}", rolling_hash(&json)))
}

pub fn batch_code(now_ms: Timestamp) -> String {
    format!("{BATCH_PREFIX}{now_ms}")
}

/// The payload batch QR codes are minted from.
#[derive(Serialize)]
pub struct BatchQrPayload<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "batchId")]
    pub batch_id: &'a str,
    #[serde(rename = "herbId")]
    pub herb_id: &'a str,
}

impl<'a> BatchQrPayload<'a> {
    pub fn new(batch_id: &'a str, herb_id: &'a str) -> Self {
        Self {
            kind: "batch",
            batch_id,
            herb_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier<'a> {
    Qr { hash: &'a str, millis: Timestamp },
    Batch { millis: Timestamp },
    /// Anything else; still looked up verbatim.
    Opaque(&'a str),
}

pub fn parse_identifier(s: &str) -> Identifier<'_> {
    if let Some(rest) = s.strip_prefix(QR_PREFIX) {
        if let Some((hash, millis)) = rest.rsplit_once('_') {
            let hex_ok = !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit());
            if let (true, Ok(millis)) = (hex_ok, millis.parse()) {
                return Identifier::Qr { hash, millis };
            }
        }
    }
    if let Some(Ok(millis)) = s.strip_prefix(BATCH_PREFIX).map(str::parse) {
        return Identifier::Batch { millis };
    }
    Identifier::Opaque(s)
}
