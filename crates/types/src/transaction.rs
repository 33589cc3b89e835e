// Path: crates/types/src/transaction.rs

//! Transaction payloads and the payload-kind taxonomy the mempool firewall
//! keys its policy decisions on.

use crate::codec;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A fixed-size, 32-byte identifier of a pending resolution, derived from the
/// resolution kind and body so identical proposals deduplicate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct ResolutionId(pub [u8; 32]);

impl ResolutionId {
    /// Derives the content-addressed identifier for a resolution.
    pub fn derive(kind: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((kind.len() as u32).to_le_bytes());
        hasher.update(kind.as_bytes());
        hasher.update(body);
        Self(hasher.finalize().into())
    }
}

impl std::fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Every transaction kind the chain can carry, used by the mempool firewall
/// to decide what is admissible in each migration phase.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum PayloadKind {
    /// A candidate validator requests to join the set.
    ValidatorJoin,
    /// A validator announces its departure.
    ValidatorLeave,
    /// A validator approves a pending join request.
    ValidatorApprove,
    /// Validators vote to remove a misbehaving peer.
    ValidatorRemove,
    /// A validator attests to resolution IDs it has observed.
    ValidatorVoteIds,
    /// Full resolution bodies injected by the block proposer. Never enters
    /// the mempool.
    ValidatorVoteBodies,
    /// Ad-hoc DDL/DML against user datasets.
    RawStatement,
    /// A balance transfer between accounts.
    Transfer,
    /// Creation of a new resolution in the vote store.
    CreateResolution,
    /// Approval of a pending resolution.
    ApproveResolution,
    /// Deletion of a pending resolution by its creator.
    DeleteResolution,
    /// Invocation of a predefined action against a user dataset.
    Execute,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayloadKind::ValidatorJoin => "validator_join",
            PayloadKind::ValidatorLeave => "validator_leave",
            PayloadKind::ValidatorApprove => "validator_approve",
            PayloadKind::ValidatorRemove => "validator_remove",
            PayloadKind::ValidatorVoteIds => "validator_vote_ids",
            PayloadKind::ValidatorVoteBodies => "validator_vote_bodies",
            PayloadKind::RawStatement => "raw_statement",
            PayloadKind::Transfer => "transfer",
            PayloadKind::CreateResolution => "create_resolution",
            PayloadKind::ApproveResolution => "approve_resolution",
            PayloadKind::DeleteResolution => "delete_resolution",
            PayloadKind::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// A balance move between two accounts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transfer {
    /// Recipient account identifier.
    pub to: Vec<u8>,
    /// Amount to move. Signed so that a malformed negative amount can be
    /// detected and rejected rather than wrapping.
    pub amount: i128,
}

/// Creation of a new resolution of some registered kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CreateResolution {
    /// The registered resolution kind, e.g. `start_migration`.
    pub kind: String,
    /// The opaque voted payload. For `start_migration` this is a serialized
    /// `MigrationDeclaration`.
    pub body: Vec<u8>,
}

impl CreateResolution {
    /// The content-addressed ID this resolution will have in the vote store.
    pub fn resolution_id(&self) -> ResolutionId {
        ResolutionId::derive(&self.kind, &self.body)
    }
}

/// Approval of a pending resolution by a validator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ApproveResolution {
    /// The resolution being approved.
    pub resolution_id: ResolutionId,
}

/// A validator's attestation to resolution IDs it has observed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ValidatorVoteIds {
    /// The resolutions being attested to.
    pub resolution_ids: Vec<ResolutionId>,
}

/// The transaction payload union.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Payload {
    /// See [`PayloadKind::ValidatorJoin`].
    ValidatorJoin {
        /// Requested voting power.
        power: i64,
    },
    /// See [`PayloadKind::ValidatorLeave`].
    ValidatorLeave,
    /// See [`PayloadKind::ValidatorApprove`].
    ValidatorApprove {
        /// Public key of the joining candidate.
        candidate: Vec<u8>,
    },
    /// See [`PayloadKind::ValidatorRemove`].
    ValidatorRemove {
        /// Public key of the validator to remove.
        target: Vec<u8>,
    },
    /// See [`PayloadKind::ValidatorVoteIds`].
    ValidatorVoteIds(ValidatorVoteIds),
    /// See [`PayloadKind::ValidatorVoteBodies`].
    ValidatorVoteBodies {
        /// Serialized resolution bodies.
        events: Vec<Vec<u8>>,
    },
    /// See [`PayloadKind::RawStatement`].
    RawStatement {
        /// The SQL text.
        statement: String,
    },
    /// See [`PayloadKind::Transfer`].
    Transfer(Transfer),
    /// See [`PayloadKind::CreateResolution`].
    CreateResolution(CreateResolution),
    /// See [`PayloadKind::ApproveResolution`].
    ApproveResolution(ApproveResolution),
    /// See [`PayloadKind::DeleteResolution`].
    DeleteResolution {
        /// The resolution to delete.
        resolution_id: ResolutionId,
    },
    /// See [`PayloadKind::Execute`].
    Execute {
        /// Target dataset identifier.
        dataset: String,
        /// Action name within the dataset.
        action: String,
        /// Canonically encoded action arguments.
        args: Vec<Vec<u8>>,
    },
}

impl Payload {
    /// The kind tag the firewall dispatches on.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::ValidatorJoin { .. } => PayloadKind::ValidatorJoin,
            Payload::ValidatorLeave => PayloadKind::ValidatorLeave,
            Payload::ValidatorApprove { .. } => PayloadKind::ValidatorApprove,
            Payload::ValidatorRemove { .. } => PayloadKind::ValidatorRemove,
            Payload::ValidatorVoteIds(_) => PayloadKind::ValidatorVoteIds,
            Payload::ValidatorVoteBodies { .. } => PayloadKind::ValidatorVoteBodies,
            Payload::RawStatement { .. } => PayloadKind::RawStatement,
            Payload::Transfer(_) => PayloadKind::Transfer,
            Payload::CreateResolution(_) => PayloadKind::CreateResolution,
            Payload::ApproveResolution(_) => PayloadKind::ApproveResolution,
            Payload::DeleteResolution { .. } => PayloadKind::DeleteResolution,
            Payload::Execute { .. } => PayloadKind::Execute,
        }
    }
}

/// The signed body of a transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TxBody {
    /// The payload union.
    pub payload: Payload,
    /// Per-account sequence number for replay protection.
    pub nonce: u64,
    /// The target chain, preventing cross-chain replays.
    pub chain_id: String,
    /// The fee the sender commits to paying.
    pub fee: i128,
}

/// A transaction as received from the network.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    /// Compact identifier of the sending account.
    pub sender: Vec<u8>,
    /// The signed body.
    pub body: TxBody,
}

impl Transaction {
    /// Computes the canonical SHA-256 hash of the transaction.
    pub fn hash(&self) -> Result<[u8; 32], String> {
        let bytes = codec::to_bytes_canonical(self)?;
        Ok(Sha256::digest(&bytes).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_id_is_content_addressed() {
        let a = ResolutionId::derive("start_migration", b"abc");
        let b = ResolutionId::derive("start_migration", b"abc");
        let c = ResolutionId::derive("start_migration", b"abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // kind participates in the derivation
        assert_ne!(a, ResolutionId::derive("other", b"abc"));
    }

    #[test]
    fn resolution_id_has_no_length_ambiguity() {
        // (kind="ab", body="c") must not collide with (kind="a", body="bc").
        assert_ne!(
            ResolutionId::derive("ab", b"c"),
            ResolutionId::derive("a", b"bc")
        );
    }

    #[test]
    fn payload_kind_dispatch() {
        let p = Payload::Transfer(Transfer {
            to: vec![1],
            amount: 5,
        });
        assert_eq!(p.kind(), PayloadKind::Transfer);

        let p = Payload::CreateResolution(CreateResolution {
            kind: "start_migration".into(),
            body: vec![],
        });
        assert_eq!(p.kind(), PayloadKind::CreateResolution);
    }

    #[test]
    fn tx_hash_is_deterministic() {
        let tx = Transaction {
            sender: vec![7; 20],
            body: TxBody {
                payload: Payload::ValidatorLeave,
                nonce: 1,
                chain_id: "meridian-1".into(),
                fee: 0,
            },
        };
        assert_eq!(tx.hash().unwrap(), tx.hash().unwrap());
    }
}
