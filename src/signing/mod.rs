//! EIP-712 signing port for channel states.
//!
//! Every state-mutating channel operation produces a house-signed
//! `ChannelState`; the settlement layer accepts a state only if the signature
//! recovers to the configured house account over the exact same typed struct.

use std::sync::Arc;

use alloy::primitives::{Address, B256, PrimitiveSignature, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};
use async_trait::async_trait;
use thiserror::Error;

sol! {
    /// Typed struct the settlement layer verifies. Field order is normative;
    /// reordering changes the type hash and breaks verification.
    struct ChannelState {
        address agent;
        uint256 agentBalance;
        uint256 casinoBalance;
        uint256 nonce;
    }
}

pub const DOMAIN_NAME: &str = "AgentCasino";
pub const DOMAIN_VERSION: &str = "1";

pub fn casino_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    eip712_domain! {
        name: DOMAIN_NAME,
        version: DOMAIN_VERSION,
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    }
}

pub fn signing_digest(domain: &Eip712Domain, state: &ChannelState) -> B256 {
    state.eip712_signing_hash(domain)
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer backend: {0}")]
    Backend(String),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("recovered signer {recovered} does not match house {expected}")]
    RecoveryMismatch { recovered: Address, expected: Address },
}

/// Port to whatever holds the house key. The key may live out of process
/// (hardware or KMS backed), hence async.
#[async_trait]
pub trait StateSigner: Send + Sync {
    fn address(&self) -> Address;
    async fn sign_digest(&self, digest: B256) -> Result<PrimitiveSignature, SignerError>;
}

/// In-process signer over a raw secp256k1 key.
pub struct LocalStateSigner {
    inner: PrivateKeySigner,
}

impl LocalStateSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    pub fn random() -> Self {
        Self { inner: PrivateKeySigner::random() }
    }
}

#[async_trait]
impl StateSigner for LocalStateSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_digest(&self, digest: B256) -> Result<PrimitiveSignature, SignerError> {
        self.inner
            .sign_hash_sync(&digest)
            .map_err(|err| SignerError::Backend(err.to_string()))
    }
}

/// Domain plus signer handle: everything needed to produce and check
/// house-signed channel states.
#[derive(Clone)]
pub struct StateSigning {
    domain: Eip712Domain,
    signer: Arc<dyn StateSigner>,
}

impl StateSigning {
    pub fn new(chain_id: u64, verifying_contract: Address, signer: Arc<dyn StateSigner>) -> Self {
        Self { domain: casino_domain(chain_id, verifying_contract), signer }
    }

    pub fn house(&self) -> Address {
        self.signer.address()
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    pub async fn sign(&self, state: &ChannelState) -> Result<PrimitiveSignature, SignerError> {
        self.signer.sign_digest(signing_digest(&self.domain, state)).await
    }

    /// Recovers the signer and insists it is the house.
    pub fn verify(
        &self,
        state: &ChannelState,
        signature: &PrimitiveSignature,
    ) -> Result<(), SignerError> {
        let recovered = recover_signer(&self.domain, state, signature)?;
        if recovered != self.house() {
            return Err(SignerError::RecoveryMismatch { recovered, expected: self.house() });
        }
        Ok(())
    }
}

pub fn recover_signer(
    domain: &Eip712Domain,
    state: &ChannelState,
    signature: &PrimitiveSignature,
) -> Result<Address, SignerError> {
    signature
        .recover_address_from_prehash(&signing_digest(domain, state))
        .map_err(|err| SignerError::Malformed(err.to_string()))
}

pub fn signature_to_hex(signature: &PrimitiveSignature) -> String {
    format!("0x{}", hex::encode(signature.as_bytes()))
}

pub fn signature_from_hex(hex_sig: &str) -> Result<PrimitiveSignature, SignerError> {
    let stripped = hex_sig.strip_prefix("0x").unwrap_or(hex_sig);
    let bytes = hex::decode(stripped).map_err(|err| SignerError::Malformed(err.to_string()))?;
    PrimitiveSignature::try_from(bytes.as_slice())
        .map_err(|err| SignerError::Malformed(err.to_string()))
}
