//! Root-block signing (spec.md §4.F step 7, §7): 65-byte `r ‖ s ‖ v`
//! secp256k1 signatures over a header's seal hash, recoverable to a
//! guardian public key, mirroring `go-ethereum/crypto`'s `Sign`/`Ecrecover`
//! as used by the upstream Go test suite.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::types::{Hash256, Signature65, ZERO_SIGNATURE};

pub struct Signer {
    secret_key: SecretKey,
}

impl Signer {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| e.to_string())?;
        Ok(Signer { secret_key })
    }

    pub fn public_key_compressed(&self) -> [u8; 33] {
        let secp = Secp256k1::signing_only();
        PublicKey::from_secret_key(&secp, &self.secret_key).serialize()
    }

    /// Signs `seal_hash`, returning a 65-byte `r ‖ s ‖ v` signature.
    pub fn sign(&self, seal_hash: &Hash256) -> Signature65 {
        let secp = Secp256k1::signing_only();
        let message = Message::from_slice(&seal_hash.0).expect("seal hash is 32 bytes");
        let recoverable = secp.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = recoverable.serialize_compact();
        let mut signature = ZERO_SIGNATURE;
        signature[..64].copy_from_slice(&compact);
        signature[64] = recovery_id.to_i32() as u8;
        signature
    }
}

/// Recovers the 33-byte compressed public key that produced `signature`
/// over `seal_hash`.
pub fn recover_public_key(seal_hash: &Hash256, signature: &Signature65) -> Result<[u8; 33], String> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_slice(&seal_hash.0).map_err(|e| e.to_string())?;
    let recovery_id = RecoveryId::from_i32(signature[64] as i32).map_err(|e| e.to_string())?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id).map_err(|e| e.to_string())?;
    let public_key = secp.recover_ecdsa(&message, &recoverable).map_err(|e| e.to_string())?;
    Ok(public_key.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover_round_trip() {
        let signer = Signer::from_bytes(&[7u8; 32]).unwrap();
        let seal_hash = Hash256([3u8; 32]);
        let signature = signer.sign(&seal_hash);
        assert_ne!(signature, ZERO_SIGNATURE);
        let recovered = recover_public_key(&seal_hash, &signature).unwrap();
        assert_eq!(recovered, signer.public_key_compressed());
    }
}
