//! The signature-recovery boundary (§1 Non-goals: "the cryptographic
//! primitives for signing/recovery ... we depend on a signing crate and
//! expose a narrow trait around it").
//!
//! [`SignatureVerifier`] is the only surface `intake.rs` touches; the
//! production implementation defers entirely to `alloy`'s ECDSA recovery.

use crate::error::{InvalidRequestReason, ServiceError};
use alloy::primitives::{keccak256, Address, Signature, B256};

pub trait SignatureVerifier: Send + Sync {
    /// Recovers the signer address from a 65-byte recoverable ECDSA
    /// signature over `message_hash`. Malformed signatures and recovery
    /// failures both surface as `ClosingSignatureInvalid`/
    /// `NonClosingSignatureInvalid` at the call site, not here — this
    /// function only reports who signed, or that nobody could be
    /// recovered.
    fn recover(&self, message_hash: B256, signature: &[u8]) -> Result<Address, ServiceError>;
}

/// Production verifier: raw ECDSA recovery over a pre-hashed message, no
/// EIP-191 prefixing — balance proofs are signed over their own packed
/// encoding, not arbitrary user-facing text.
pub struct EcdsaVerifier;

impl SignatureVerifier for EcdsaVerifier {
    fn recover(&self, message_hash: B256, signature: &[u8]) -> Result<Address, ServiceError> {
        let sig = Signature::try_from(signature)
            .map_err(|e| ServiceError::from(InvalidRequestReason::Structural(format!("malformed signature: {e}"))))?;
        sig.recover_address_from_prehash(&message_hash)
            .map_err(|e| ServiceError::from(InvalidRequestReason::Structural(format!("signature recovery failed: {e}"))))
    }
}

/// The exact packing the balance-proof signature is taken over: enough of
/// the request's fields to bind it to one channel, one nonce, and one
/// chain, matching the encoding the on-chain `monitor` call itself
/// verifies.
pub fn balance_proof_hash(
    token_network: Address,
    chain_id: u64,
    channel_id: alloy::primitives::U256,
    balance_hash: B256,
    nonce: alloy::primitives::U256,
    additional_hash: B256,
) -> B256 {
    let mut buf = Vec::with_capacity(20 + 8 + 32 + 32 + 32 + 32);
    buf.extend_from_slice(token_network.as_slice());
    buf.extend_from_slice(&chain_id.to_be_bytes());
    buf.extend_from_slice(&channel_id.to_be_bytes::<32>());
    buf.extend_from_slice(balance_hash.as_slice());
    buf.extend_from_slice(&nonce.to_be_bytes::<32>());
    buf.extend_from_slice(additional_hash.as_slice());
    keccak256(buf)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Test double: a fixed mapping from message hash to the address it
    /// should "recover" to, so intake tests don't need real signing keys.
    #[derive(Default)]
    pub struct StubVerifier {
        pub answers: Mutex<HashMap<(B256, Vec<u8>), Address>>,
    }

    impl StubVerifier {
        pub fn expect(&self, message_hash: B256, signature: &[u8], signer: Address) {
            self.answers.lock().unwrap().insert((message_hash, signature.to_vec()), signer);
        }
    }

    impl SignatureVerifier for StubVerifier {
        fn recover(&self, message_hash: B256, signature: &[u8]) -> Result<Address, ServiceError> {
            self.answers
                .lock()
                .unwrap()
                .get(&(message_hash, signature.to_vec()))
                .copied()
                .ok_or_else(|| ServiceError::from(InvalidRequestReason::Structural("no recovery stubbed".into())))
        }
    }
}
