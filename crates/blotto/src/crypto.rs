//! Validation of the ed25519 identities users authenticate with.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid public key length")]
    PublicKeyLength,
    #[error("invalid public key encoding")]
    PublicKeyEncoding,
    #[error("invalid signature encoding")]
    SignatureEncoding,
    #[error("invalid signature")]
    SignatureMismatch,
}

/// Returns an error if the provided public key is not a 64-character hex
/// encoding of 32 bytes.
pub fn validate_public_key(public_key: &str) -> Result<(), Error> {
    if public_key.len() != PUBLIC_KEY_LENGTH * 2 {
        return Err(Error::PublicKeyLength);
    }

    hex::decode(public_key).map_err(|_| Error::PublicKeyEncoding)?;

    Ok(())
}

/// Validates the signature with the public key.
///
/// The message signed is the raw public key bytes themselves, the scheme
/// wallets use to prove ownership of the withdrawing identity.
pub fn verify_signature(public_key: &str, signature: &str) -> Result<(), Error> {
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = hex::decode(public_key)
        .map_err(|_| Error::PublicKeyEncoding)?
        .try_into()
        .map_err(|_| Error::PublicKeyLength)?;

    let sig_bytes: [u8; SIGNATURE_LENGTH] = hex::decode(signature)
        .map_err(|_| Error::SignatureEncoding)?
        .try_into()
        .map_err(|_| Error::SignatureEncoding)?;

    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| Error::PublicKeyEncoding)?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify(&key_bytes, &signature)
        .map_err(|_| Error::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_validate_public_key() {
        let valid = "a".repeat(64);
        assert!(validate_public_key(&valid).is_ok());

        assert!(matches!(
            validate_public_key("too-short"),
            Err(Error::PublicKeyLength)
        ));

        let invalid_hex = "z".repeat(64);
        assert!(matches!(
            validate_public_key(&invalid_hex),
            Err(Error::PublicKeyEncoding)
        ));
    }

    #[test]
    fn test_verify_signature() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_key = hex::encode(signing_key.verifying_key().as_bytes());

        let signature = signing_key.sign(signing_key.verifying_key().as_bytes());
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(verify_signature(&public_key, &signature_hex).is_ok());
    }

    #[test]
    fn test_verify_signature_wrong_message() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_key = hex::encode(signing_key.verifying_key().as_bytes());

        // Signature over something other than the public key bytes
        let signature = signing_key.sign(b"withdraw 1000 sats");
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(matches!(
            verify_signature(&public_key, &signature_hex),
            Err(Error::SignatureMismatch)
        ));
    }

    #[test]
    fn test_verify_signature_wrong_key() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let other_key = SigningKey::from_bytes(&[8u8; 32]);
        let public_key = hex::encode(other_key.verifying_key().as_bytes());

        let signature = signing_key.sign(other_key.verifying_key().as_bytes());
        let signature_hex = hex::encode(signature.to_bytes());

        assert!(matches!(
            verify_signature(&public_key, &signature_hex),
            Err(Error::SignatureMismatch)
        ));
    }
}
