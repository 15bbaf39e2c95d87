//! Authenticator data parsing
//!
//! Layout:
//! - 32 bytes: RP ID hash
//! - 1 byte: flags
//! - 4 bytes: signature counter (big-endian)
//! - when the AT flag (0x40) is set, attested credential data:
//!   - 16 bytes: AAGUID
//!   - 2 bytes: credential ID length (L, big-endian)
//!   - L bytes: credential ID
//!   - remaining bytes: COSE credential public key

use thiserror::Error;

/// Length of the fixed authenticator data header
pub const AUTH_DATA_HEADER_LEN: usize = 37;

/// Attested credential data included
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticatorDataError {
    #[error("authenticator data too short: need {needed} bytes, have {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("authenticator data has no attested credential data")]
    MissingAttestedCredential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub credential_public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub counter: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], AuthenticatorDataError> {
    bytes
        .get(at..at + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(AuthenticatorDataError::TooShort {
            needed: at + N,
            actual: bytes.len(),
        })
}

impl AuthenticatorData {
    /// Parse authenticator data, including attested credential data when flagged
    ///
    /// # Errors
    ///
    /// Returns `TooShort` if any declared field runs past the end of the buffer
    pub fn parse(bytes: &[u8]) -> Result<Self, AuthenticatorDataError> {
        let rp_id_hash = take::<32>(bytes, 0)?;
        let [flags] = take::<1>(bytes, 32)?;
        let counter = u32::from_be_bytes(take::<4>(bytes, 33)?);

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
            None
        } else {
            let mut pos = AUTH_DATA_HEADER_LEN;
            let aaguid = take::<16>(bytes, pos)?;
            pos += 16;
            let id_len = usize::from(u16::from_be_bytes(take::<2>(bytes, pos)?));
            pos += 2;
            let credential_id = bytes
                .get(pos..pos + id_len)
                .ok_or(AuthenticatorDataError::TooShort {
                    needed: pos + id_len,
                    actual: bytes.len(),
                })?
                .to_vec();
            pos += id_len;
            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_public_key: bytes[pos..].to_vec(),
            })
        };

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            attested_credential,
        })
    }

    /// Attested credential data, required for attestations
    ///
    /// # Errors
    ///
    /// Returns `MissingAttestedCredential` when the AT flag was not set
    pub fn require_attested(&self) -> Result<&AttestedCredentialData, AuthenticatorDataError> {
        self.attested_credential
            .as_ref()
            .ok_or(AuthenticatorDataError::MissingAttestedCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u8, counter: u32) -> Vec<u8> {
        let mut data = vec![0xAA; 32];
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }

    #[test]
    fn test_parse_assertion_style_data() {
        let parsed = AuthenticatorData::parse(&header(0x01, 7)).unwrap();
        assert_eq!(parsed.rp_id_hash, [0xAA; 32]);
        assert_eq!(parsed.counter, 7);
        assert!(parsed.attested_credential.is_none());
        assert_eq!(
            parsed.require_attested(),
            Err(AuthenticatorDataError::MissingAttestedCredential)
        );
    }

    #[test]
    fn test_parse_attested_credential() {
        let mut data = header(0x41, 0);
        data.extend_from_slice(b"appattestdevelop");
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        data.extend_from_slice(&[0xA5, 0x01]);

        let parsed = AuthenticatorData::parse(&data).unwrap();
        let attested = parsed.require_attested().unwrap();
        assert_eq!(&attested.aaguid, b"appattestdevelop");
        assert_eq!(attested.credential_id, vec![1, 2, 3]);
        assert_eq!(attested.credential_public_key, vec![0xA5, 0x01]);
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        assert_eq!(
            AuthenticatorData::parse(&[0u8; 36]),
            Err(AuthenticatorDataError::TooShort {
                needed: 37,
                actual: 36
            })
        );

        let mut data = header(0x40, 0);
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&32u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            AuthenticatorData::parse(&data),
            Err(AuthenticatorDataError::TooShort { needed: 87, .. })
        ));
    }
}
