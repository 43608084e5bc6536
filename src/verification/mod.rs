//! Verification engine (C7): canonical hashing of typed packets with
//! domain separation, producing the 32-byte message to be threshold-signed.

use crate::crypto::{h4_msg, Point};
use crate::model::{Operation, TransactionProposal};
use web3::ethabi::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    EpochRollover,
    SafeTransaction,
}

#[derive(Debug)]
pub enum VerificationResult {
    Valid { packet_id: [u8; 32] },
    Invalid { reason: &'static str },
}

/// Domain separator shared by both packet kinds; chain/consensus addresses
/// bind the packet to a specific deployment.
fn domain_separator(chain_id: u64, consensus_address: &[u8; 20]) -> [u8; 32] {
    h4_msg(&[b"shieldnet-domain-v1", &chain_id.to_be_bytes(), consensus_address])
}

pub fn epoch_rollover_packet(
    chain_id: u64,
    consensus_address: &[u8; 20],
    active_epoch: u64,
    proposed_epoch: u64,
    rollover_block: u64,
    group_key: Point,
) -> VerificationResult {
    if proposed_epoch <= active_epoch && active_epoch != 0 {
        return VerificationResult::Invalid { reason: "proposed_epoch must exceed active_epoch" };
    }

    let domain = domain_separator(chain_id, consensus_address);
    let (x, y) = group_key.xy_coordinates();

    let packet_id = h4_msg(&[
        &domain,
        b"epoch_rollover",
        &active_epoch.to_be_bytes(),
        &proposed_epoch.to_be_bytes(),
        &rollover_block.to_be_bytes(),
        &x,
        &y,
    ]);

    VerificationResult::Valid { packet_id }
}

/// `keccak256("SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)")`.
pub fn safe_tx_typehash() -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    Keccak256::digest(
        b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)",
    )
    .into()
}

/// `keccak256(abi.encode(keccak256("EIP712Domain(uint256 chainId,address verifyingContract)"), chainId, safe))`.
pub fn safe_domain_separator(chain_id: u64, safe: &[u8; 20]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    let domain_typehash: [u8; 32] =
        Keccak256::digest(b"EIP712Domain(uint256 chainId,address verifyingContract)").into();
    let encoded = web3::ethabi::encode(&[
        Token::FixedBytes(domain_typehash.to_vec()),
        Token::Uint(web3::types::U256::from(chain_id)),
        Token::Address((*safe).into()),
    ]);
    Keccak256::digest(&encoded).into()
}

/// EIP-712 typed-data hash of a Gnosis-Safe-style transaction proposal,
/// grounded in the ABI-encoding idiom of
/// `eth_tx_encoding/set_agg_key_with_agg_key.rs`.
pub fn safe_transaction_packet(
    safe_tx_type_hash: &[u8; 32],
    domain_separator: &[u8; 32],
    proposal: &TransactionProposal,
) -> VerificationResult {
    let data_hash = {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update(&proposal.data);
        let out: [u8; 32] = hasher.finalize().into();
        out
    };

    let operation_value = match proposal.operation {
        Operation::Call => web3::types::U256::from(0u8),
        Operation::DelegateCall => web3::types::U256::from(1u8),
    };

    let encoded = web3::ethabi::encode(&[
        Token::FixedBytes(safe_tx_type_hash.to_vec()),
        Token::Address(proposal.to.into()),
        Token::Uint(web3::types::U256::from_big_endian(&proposal.value)),
        Token::FixedBytes(data_hash.to_vec()),
        Token::Uint(operation_value),
        Token::Uint(web3::types::U256::from(proposal.safe_tx_gas)),
        Token::Uint(web3::types::U256::from(proposal.base_gas)),
        Token::Uint(web3::types::U256::from_big_endian(&proposal.gas_price)),
        Token::Address(proposal.gas_token.into()),
        Token::Address(proposal.refund_receiver.into()),
        Token::Uint(web3::types::U256::from(proposal.nonce)),
    ]);

    let struct_hash = {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        let out: [u8; 32] = hasher.finalize().into();
        out
    };

    let packet_id = {
        use sha3::{Digest, Keccak256};
        let mut hasher = Keccak256::new();
        hasher.update([0x19, 0x01]);
        hasher.update(domain_separator);
        hasher.update(struct_hash);
        hasher.finalize().into()
    };

    VerificationResult::Valid { packet_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_rollover_packet_is_deterministic() {
        let consensus = [1u8; 20];
        let key = Point::generator();
        let a = epoch_rollover_packet(1, &consensus, 1, 2, 240, key);
        let b = epoch_rollover_packet(1, &consensus, 1, 2, 240, key);
        match (a, b) {
            (VerificationResult::Valid { packet_id: p1 }, VerificationResult::Valid { packet_id: p2 }) => {
                assert_eq!(p1, p2)
            }
            _ => panic!("expected both valid"),
        }
    }

    #[test]
    fn stale_proposed_epoch_is_invalid() {
        let consensus = [1u8; 20];
        let key = Point::generator();
        let result = epoch_rollover_packet(1, &consensus, 5, 3, 240, key);
        assert!(matches!(result, VerificationResult::Invalid { .. }));
    }
}
