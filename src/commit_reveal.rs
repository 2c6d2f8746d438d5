//! SHA-256 commit–reveal primitive.
//!
//! The casino commits to a random seed before the agent contributes theirs;
//! the round outcome is derived from both plus the channel nonce, so neither
//! party can bias the result once the other's contribution is fixed.

use alloy::primitives::U256;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Casino-side secret seed, lowercase hex. Binding once its commitment has
/// been transmitted; redacted from `Debug` and zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CasinoSeed(String);

impl CasinoSeed {
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl From<String> for CasinoSeed {
    fn from(seed: String) -> Self {
        Self(seed)
    }
}

impl From<&str> for CasinoSeed {
    fn from(seed: &str) -> Self {
        Self(seed.to_string())
    }
}

impl std::fmt::Debug for CasinoSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CasinoSeed(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub struct Commit {
    pub seed: CasinoSeed,
    pub commitment: String,
}

/// Draws a fresh 32-byte seed and its commitment `SHA256(seed_hex)`.
pub fn commit() -> Commit {
    commit_with_rng(&mut rand::rngs::OsRng)
}

pub fn commit_with_rng<R: RngCore>(rng: &mut R) -> Commit {
    let mut raw = [0u8; 32];
    rng.fill_bytes(&mut raw);
    let seed = hex::encode(raw);
    raw.zeroize();
    let commitment = hex::encode(Sha256::digest(seed.as_bytes()));
    Commit { seed: CasinoSeed(seed), commitment }
}

/// Inputs and digest of a resolved round, handed back to the agent so the
/// outcome can be re-derived offline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealProof {
    pub casino_seed: String,
    pub agent_seed: String,
    pub nonce: u64,
    pub hash: String,
}

#[derive(Clone, Debug)]
pub struct RoundResult {
    pub hash: [u8; 32],
    pub rng: U256,
    pub proof: RevealProof,
}

/// `SHA256(casino_seed ":" agent_seed ":" nonce)`. Including the nonce makes
/// the same seed pair yield distinct hashes at distinct nonces.
pub fn compute_result(casino_seed: &str, agent_seed: &str, nonce: u64) -> RoundResult {
    let mut hasher = Sha256::new();
    hasher.update(casino_seed.as_bytes());
    hasher.update(b":");
    hasher.update(agent_seed.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    RoundResult {
        hash,
        rng: U256::from_be_bytes(hash),
        proof: RevealProof {
            casino_seed: casino_seed.to_string(),
            agent_seed: agent_seed.to_string(),
            nonce,
            hash: hex::encode(hash),
        },
    }
}

/// Checks that a revealed seed matches the commitment published earlier.
pub fn verify(commitment: &str, casino_seed: &str) -> bool {
    hex::encode(Sha256::digest(casino_seed.as_bytes())) == commitment.to_ascii_lowercase()
}

/// Big-endian u32 read from `hash` starting at `offset`.
pub fn u32_at(hash: &[u8; 32], offset: usize) -> u32 {
    u32::from_be_bytes([hash[offset], hash[offset + 1], hash[offset + 2], hash[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn commitment_binds_the_seed() {
        let mut rng = StdRng::seed_from_u64(7);
        let commit = commit_with_rng(&mut rng);
        assert_eq!(commit.seed.reveal().len(), 64);
        assert_eq!(commit.commitment.len(), 64);
        assert!(verify(&commit.commitment, commit.seed.reveal()));
        assert!(!verify(&commit.commitment, "not-the-seed"));
    }

    #[test]
    fn result_is_deterministic() {
        let a = compute_result("casino", "agent", 3);
        let b = compute_result("casino", "agent", 3);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.rng, b.rng);
        assert_eq!(a.proof.hash, b.proof.hash);
    }

    #[test]
    fn nonce_changes_the_hash() {
        let a = compute_result("casino", "agent", 1);
        let b = compute_result("casino", "agent", 2);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn rng_is_big_endian_interpretation() {
        let result = compute_result("s", "a", 0);
        assert_eq!(result.rng, U256::from_be_bytes(result.hash));
        assert_eq!(u32_at(&result.hash, 0), u32::from_be_bytes(result.hash[0..4].try_into().unwrap()));
    }

    #[test]
    fn seed_debug_is_redacted() {
        let seed = CasinoSeed::from("deadbeef");
        assert_eq!(format!("{seed:?}"), "CasinoSeed(<redacted>)");
    }
}
