//! L1 action signing.
//!
//! The venue authenticates batch mutations with an EIP-712 "phantom agent"
//! signature: the action is msgpack-serialized, hashed together with the
//! nonce into a `connectionId`, and the resulting `Agent{source,
//! connectionId}` struct is signed under the `Exchange` domain
//! (chain id 1337, zero verifying contract).

use anyhow::{anyhow, Context, Result};
use k256::ecdsa::SigningKey;
use serde::Serialize;
use tiny_keccak::{Hasher, Keccak};

/// Environment variable holding the hex-encoded secp256k1 private key.
pub const PRIVATE_KEY_ENV: &str = "HYPERLIQUID_PRIVATE_KEY";

fn keccak256(chunks: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SignatureWire {
    pub r: String,
    pub s: String,
    pub v: u64,
}

pub struct Signer {
    key: SigningKey,
    /// "a" on mainnet, "b" on testnet.
    agent_source: &'static str,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key", &"[REDACTED]")
            .field("agent_source", &self.agent_source)
            .finish()
    }
}

impl Signer {
    pub fn new(private_key_hex: &str, testnet: bool) -> Result<Self> {
        let stripped = private_key_hex.trim().trim_start_matches("0x");
        let bytes = hex::decode(stripped).context("private key is not valid hex")?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| anyhow!("invalid secp256k1 private key: {e}"))?;
        Ok(Self {
            key,
            agent_source: if testnet { "b" } else { "a" },
        })
    }

    pub fn from_env(testnet: bool) -> Result<Self> {
        let key = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("{PRIVATE_KEY_ENV} not set"))?;
        Self::new(&key, testnet)
    }

    /// Sign a batch action for the given nonce.
    pub fn sign_action<T: Serialize>(&self, action: &T, nonce: u64) -> Result<SignatureWire> {
        let connection_id = action_hash(action, nonce)?;
        let digest = self.agent_digest(&connection_id);
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| anyhow!("signing failed: {e}"))?;
        let bytes = sig.to_bytes();
        Ok(SignatureWire {
            r: format!("0x{}", hex::encode(&bytes[..32])),
            s: format!("0x{}", hex::encode(&bytes[32..])),
            v: 27 + recid.to_byte() as u64,
        })
    }

    /// EIP-712 digest of `Agent{source, connectionId}` under the `Exchange`
    /// domain.
    fn agent_digest(&self, connection_id: &[u8; 32]) -> [u8; 32] {
        let domain_typehash = keccak256(&[
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        ]);
        let mut chain_id = [0u8; 32];
        chain_id[31] = 0x39; // 1337
        chain_id[30] = 0x05;
        let verifying_contract = [0u8; 32];
        let domain_separator = keccak256(&[
            &domain_typehash,
            &keccak256(&[b"Exchange"]),
            &keccak256(&[b"1"]),
            &chain_id,
            &verifying_contract,
        ]);

        let agent_typehash = keccak256(&[b"Agent(string source,bytes32 connectionId)"]);
        let struct_hash = keccak256(&[
            &agent_typehash,
            &keccak256(&[self.agent_source.as_bytes()]),
            connection_id,
        ]);

        keccak256(&[b"\x19\x01", &domain_separator, &struct_hash])
    }
}

/// `keccak(msgpack(action) || nonce_be || 0x00)`; the trailing byte marks
/// the absent vault address.
fn action_hash<T: Serialize>(action: &T, nonce: u64) -> Result<[u8; 32]> {
    let mut bytes = rmp_serde::to_vec_named(action).context("msgpack-encoding action")?;
    bytes.extend_from_slice(&nonce.to_be_bytes());
    bytes.push(0x00);
    Ok(keccak256(&[&bytes]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::{CancelAction, CancelWire};

    const TEST_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn rejects_malformed_keys() {
        assert!(Signer::new("not-hex", false).is_err());
        assert!(Signer::new("0xdeadbeef", false).is_err());
        assert!(Signer::new(TEST_KEY, false).is_ok());
    }

    #[test]
    fn signature_is_deterministic_per_nonce() {
        let signer = Signer::new(TEST_KEY, false).unwrap();
        let action = CancelAction::new(vec![CancelWire { a: 10_107, o: 42 }]);
        let a = signer.sign_action(&action, 1_700_000_000_000).unwrap();
        let b = signer.sign_action(&action, 1_700_000_000_000).unwrap();
        assert_eq!(a, b);

        let c = signer.sign_action(&action, 1_700_000_000_001).unwrap();
        assert_ne!(a, c, "nonce must be part of the signed payload");
    }

    #[test]
    fn signature_shape() {
        let signer = Signer::new(TEST_KEY, false).unwrap();
        let action = CancelAction::new(vec![CancelWire { a: 10_107, o: 42 }]);
        let sig = signer.sign_action(&action, 1).unwrap();
        assert_eq!(sig.r.len(), 66);
        assert_eq!(sig.s.len(), 66);
        assert!(sig.v == 27 || sig.v == 28);
    }

    #[test]
    fn mainnet_and_testnet_sign_differently() {
        let main = Signer::new(TEST_KEY, false).unwrap();
        let test = Signer::new(TEST_KEY, true).unwrap();
        let action = CancelAction::new(vec![CancelWire { a: 10_107, o: 42 }]);
        assert_ne!(
            main.sign_action(&action, 1).unwrap(),
            test.sign_action(&action, 1).unwrap()
        );
    }
}
