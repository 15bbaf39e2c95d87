//! CBOR decoding for App Attest objects
//!
//! Attestation objects are `{fmt, attStmt: {x5c, receipt}, authData}` maps;
//! assertion objects are `{signature, authenticatorData}` maps. Both are read
//! by walking the generic `ciborium` value tree.

use ciborium::de::from_reader;
use ciborium::value::Value;

/// Attestation statement format used by App Attest
pub const APPLE_APPATTEST_FORMAT: &str = "apple-appattest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub fmt: String,
    /// DER certificates, leaf first
    pub x5c: Vec<Vec<u8>>,
    pub receipt: Vec<u8>,
    pub auth_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionObject {
    /// DER-encoded ECDSA signature
    pub signature: Vec<u8>,
    pub authenticator_data: Vec<u8>,
}

fn parse_map(bytes: &[u8]) -> Result<Vec<(Value, Value)>, String> {
    let value: Value = from_reader(bytes).map_err(|e| format!("invalid CBOR: {e}"))?;
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err("top-level CBOR item is not a map".to_string()),
    }
}

fn field<'a>(map: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}

fn bytes_field(map: &[(Value, Value)], name: &str) -> Result<Vec<u8>, String> {
    field(map, name)
        .ok_or_else(|| format!("missing {name}"))?
        .as_bytes()
        .cloned()
        .ok_or_else(|| format!("{name} is not a byte string"))
}

/// Decode an attestation object
///
/// # Errors
///
/// Returns a description of the first structural problem found
pub fn decode_attestation(bytes: &[u8]) -> Result<AttestationObject, String> {
    let map = parse_map(bytes)?;

    let fmt = field(&map, "fmt")
        .and_then(Value::as_text)
        .ok_or("missing fmt")?
        .to_string();

    let statement = field(&map, "attStmt")
        .and_then(Value::as_map)
        .ok_or("missing attStmt")?;

    let x5c = field(statement, "x5c")
        .and_then(Value::as_array)
        .ok_or("missing attStmt.x5c")?
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .cloned()
                .ok_or_else(|| "x5c entry is not a byte string".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let receipt = bytes_field(statement, "receipt")?;
    let auth_data = bytes_field(&map, "authData")?;

    Ok(AttestationObject {
        fmt,
        x5c,
        receipt,
        auth_data,
    })
}

/// Decode an assertion object
///
/// # Errors
///
/// Returns a description of the first structural problem found
pub fn decode_assertion(bytes: &[u8]) -> Result<AssertionObject, String> {
    let map = parse_map(bytes)?;
    Ok(AssertionObject {
        signature: bytes_field(&map, "signature")?,
        authenticator_data: bytes_field(&map, "authenticatorData")?,
    })
}
