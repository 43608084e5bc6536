//! Event-log side of the watcher (§4.9): fetches and decodes Coordinator
//! and Consensus logs into `machine::Event`, grounded in the teacher's
//! `EthRpcApi::get_logs` surface (mirrored in `action_queue::rpc`) with a
//! bloom pre-check and dynamic page-size halving on RPC failure.

use crate::action_queue::rpc::EthRpcApi;
use crate::crypto::Point;
use crate::machine::Event;
use crate::model::{Operation, TransactionProposal};
use crate::verification::{safe_domain_separator, safe_tx_typehash, safe_transaction_packet, VerificationResult};
use anyhow::Context;
use sha3::{Digest, Keccak256};
use web3::ethabi::{decode, ParamType, Token};
use web3::types::{Address, Block, BlockNumber, FilterBuilder, Log, H256, U64};

fn topic0(signature: &str) -> H256 {
    H256::from_slice(&Keccak256::digest(signature.as_bytes()))
}

fn point_from_bytes(token: &Token) -> anyhow::Result<Point> {
    let bytes = token.clone().into_bytes().ok_or_else(|| anyhow::anyhow!("expected bytes token"))?;
    let arr: [u8; 33] = bytes.try_into().map_err(|_| anyhow::anyhow!("point encoding must be 33 bytes"))?;
    Point::from_bytes(&arr).ok_or_else(|| anyhow::anyhow!("invalid point encoding"))
}

fn fixed32(token: &Token) -> anyhow::Result<[u8; 32]> {
    let bytes = token.clone().into_fixed_bytes().ok_or_else(|| anyhow::anyhow!("expected fixed bytes token"))?;
    bytes.try_into().map_err(|_| anyhow::anyhow!("fixed bytes must be 32 long"))
}

fn address20(token: &Token) -> anyhow::Result<[u8; 20]> {
    Ok(token.clone().into_address().ok_or_else(|| anyhow::anyhow!("expected address token"))?.0)
}

fn uint(token: &Token) -> anyhow::Result<u64> {
    Ok(token.clone().into_uint().ok_or_else(|| anyhow::anyhow!("expected uint token"))?.as_u64())
}

macro_rules! event {
    ($name:literal, $($ty:expr),* $(,)?) => {
        ($name, topic0($name), vec![$($ty),*])
    };
}

/// Registry of every event the watcher decodes, keyed by its Keccak-256
/// signature hash (topic0). Chosen argument lists are this engine's own
/// invention (no upstream ABI to match), kept structurally parallel to
/// `action_queue::encode`'s calldata tuples.
fn registry() -> Vec<(&'static str, H256, Vec<ParamType>)> {
    vec![
        event!(
            "KeyGen(bytes32,uint256[],address[],uint256,bytes32)",
            ParamType::FixedBytes(32),
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
        ),
        event!(
            "KeyGenCommitted(bytes32,uint256,bytes,bytes,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Bytes,
            ParamType::Bytes,
            ParamType::Uint(256),
        ),
        event!(
            "KeyGenSecretShared(bytes32,uint256,bytes32)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
        ),
        event!(
            "KeyGenComplaintSubmitted(bytes32,uint256,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ),
        event!(
            "KeyGenComplaintResponded(bytes32,uint256,uint256,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ),
        event!(
            "KeyGenConfirmed(bytes32,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
        ),
        event!(
            "NonceCommitmentsHash(bytes32,uint256,bytes32,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
        ),
        event!(
            "Sign(bytes32,bytes32,uint256)",
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
        ),
        event!(
            "NonceCommitments(uint256,uint256,bytes,bytes)",
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
            ParamType::Bytes,
        ),
        event!(
            "SignatureShare(uint256,uint256,uint256)",
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ),
        event!("Signed(uint256)", ParamType::Uint(256)),
        event!(
            "EpochProposed(uint256,uint256,bytes32)",
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
        ),
        event!("EpochStaged(uint256)", ParamType::Uint(256)),
        event!(
            "TransactionProposed(bytes32,uint256,address,address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,uint256,uint256)",
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Bytes,
            ParamType::Uint(8),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
        ),
        event!(
            "TransactionAttested(uint256,bytes32,uint256)",
            ParamType::Uint(256),
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
        ),
    ]
}

fn u256_32(token: &Token) -> anyhow::Result<[u8; 32]> {
    let mut out = [0u8; 32];
    token.clone().into_uint().ok_or_else(|| anyhow::anyhow!("expected uint token"))?.to_big_endian(&mut out);
    Ok(out)
}

fn decode_transaction_proposed(chain_id: u64, values: &[Token]) -> anyhow::Result<Event> {
    let group_id = fixed32(&values[0])?;
    let safe = address20(&values[2])?;
    let to = address20(&values[3])?;
    let value = u256_32(&values[4])?;
    let data = values[5].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("expected bytes token"))?;
    let operation = if uint(&values[6])? == 0 { Operation::Call } else { Operation::DelegateCall };
    let safe_tx_gas = uint(&values[7])?;
    let base_gas = uint(&values[8])?;
    let gas_price = u256_32(&values[9])?;
    let gas_token = address20(&values[10])?;
    let refund_receiver = address20(&values[11])?;
    let nonce = uint(&values[12])?;
    let epoch = uint(&values[13])?;

    let proposal = TransactionProposal {
        chain_id,
        safe,
        to,
        value,
        data,
        operation,
        safe_tx_gas,
        base_gas,
        gas_price,
        gas_token,
        refund_receiver,
        nonce,
        epoch,
    };

    let domain = safe_domain_separator(chain_id, &safe);
    match safe_transaction_packet(&safe_tx_typehash(), &domain, &proposal) {
        VerificationResult::Valid { packet_id } => Ok(Event::TransactionProposed { group_id, message: packet_id }),
        VerificationResult::Invalid { reason } => Err(anyhow::anyhow!("invalid transaction proposal: {reason}")),
    }
}

/// Decodes a single log against the registry; returns `Ok(None)` for logs
/// whose topic0 isn't recognized (other contract events the watcher
/// doesn't care about).
pub fn decode_log(chain_id: u64, log: &Log) -> anyhow::Result<Option<Event>> {
    let Some(topic) = log.topics.first().copied() else { return Ok(None) };
    let Some((name, _, params)) = registry().into_iter().find(|(_, t, _)| *t == topic) else {
        return Ok(None);
    };

    let values = decode(&params, &log.data.0)?;

    let event = match name {
        "KeyGen(bytes32,uint256[],address[],uint256,bytes32)" => {
            let group_id = fixed32(&values[0])?;
            let ids = values[1].clone().into_array().ok_or_else(|| anyhow::anyhow!("expected array"))?;
            let addrs = values[2].clone().into_array().ok_or_else(|| anyhow::anyhow!("expected array"))?;
            let threshold = uint(&values[3])?;
            let context = fixed32(&values[4])?;
            let participants = ids
                .iter()
                .zip(addrs.iter())
                .map(|(id, addr)| anyhow::Ok(crate::model::Participant { id: uint(id)?, address: address20(addr)? }))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Event::KeyGen { group_id, participants, threshold, context }
        }
        "KeyGenCommitted(bytes32,uint256,bytes,bytes,uint256)" => {
            let group_id = fixed32(&values[0])?;
            let id = uint(&values[1])?;
            let raw = values[2].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("expected bytes"))?;
            let commitments = raw
                .chunks(33)
                .map(|chunk| {
                    let arr: [u8; 33] = chunk.try_into().map_err(|_| anyhow::anyhow!("bad commitment chunk"))?;
                    Point::from_bytes(&arr).ok_or_else(|| anyhow::anyhow!("invalid commitment point"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let pok_r = point_from_bytes(&values[3])?;
            let pok_mu_bytes = u256_32(&values[4])?;
            let pok_mu = crate::crypto::Scalar::from_bytes(&pok_mu_bytes)
                .ok_or_else(|| anyhow::anyhow!("invalid pok scalar"))?;
            Event::KeyGenCommitted {
                group_id,
                id,
                commitments,
                pok: crate::frost::keygen::ProofOfKnowledge { r: pok_r, mu: pok_mu },
            }
        }
        "KeyGenSecretShared(bytes32,uint256,bytes32)" => Event::KeyGenSecretShared {
            group_id: fixed32(&values[0])?,
            sender_id: uint(&values[1])?,
            encrypted_share: fixed32(&values[2])?,
        },
        "KeyGenComplaintSubmitted(bytes32,uint256,uint256)" => Event::KeyGenComplaintSubmitted {
            group_id: fixed32(&values[0])?,
            plaintiff: uint(&values[1])?,
            accused: uint(&values[2])?,
        },
        "KeyGenComplaintResponded(bytes32,uint256,uint256,uint256)" => {
            let share_bytes = u256_32(&values[3])?;
            Event::KeyGenComplaintResponded {
                group_id: fixed32(&values[0])?,
                plaintiff: uint(&values[1])?,
                accused: uint(&values[2])?,
                share: crate::crypto::Scalar::from_bytes(&share_bytes)
                    .ok_or_else(|| anyhow::anyhow!("invalid complaint-response scalar"))?,
            }
        }
        "KeyGenConfirmed(bytes32,uint256)" => {
            Event::KeyGenConfirmed { group_id: fixed32(&values[0])?, participant: uint(&values[1])? }
        }
        "NonceCommitmentsHash(bytes32,uint256,bytes32,uint256)" => Event::NonceCommitmentsHash {
            group_id: fixed32(&values[0])?,
            participant: uint(&values[1])?,
            root: fixed32(&values[2])?,
            chunk: uint(&values[3])?,
        },
        "Sign(bytes32,bytes32,uint256)" => {
            Event::Sign { group_id: fixed32(&values[0])?, message: fixed32(&values[1])?, signature_id: uint(&values[2])? }
        }
        "NonceCommitments(uint256,uint256,bytes,bytes)" => Event::NonceCommitments {
            signature_id: uint(&values[0])?,
            signer: uint(&values[1])?,
            hiding: point_from_bytes(&values[2])?,
            binding: point_from_bytes(&values[3])?,
        },
        "SignatureShare(uint256,uint256,uint256)" => {
            let share_bytes = u256_32(&values[2])?;
            Event::SignatureShare {
                signature_id: uint(&values[0])?,
                signer: uint(&values[1])?,
                share: crate::crypto::Scalar::from_bytes(&share_bytes)
                    .ok_or_else(|| anyhow::anyhow!("invalid signature-share scalar"))?,
            }
        }
        "Signed(uint256)" => Event::Signed { signature_id: uint(&values[0])? },
        "EpochProposed(uint256,uint256,bytes32)" => Event::EpochProposed {
            proposed_epoch: uint(&values[0])?,
            rollover_block: uint(&values[1])?,
            group_id: fixed32(&values[2])?,
        },
        "EpochStaged(uint256)" => Event::EpochStaged { proposed_epoch: uint(&values[0])? },
        "TransactionProposed(bytes32,uint256,address,address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,uint256,uint256)" => {
            decode_transaction_proposed(chain_id, &values)?
        }
        "TransactionAttested(uint256,bytes32,uint256)" => Event::TransactionAttested {
            epoch: uint(&values[0])?,
            transaction_hash: fixed32(&values[1])?,
            signature_id: uint(&values[2])?,
        },
        other => anyhow::bail!("unhandled event signature in registry: {other}"),
    };

    Ok(Some(event))
}

/// Fetches and decodes logs for `[from, to]`, sorted `(block_number,
/// log_index)` per §4.9. Halves the range on RPC failure (dynamic
/// page-size halving) until a single block still fails, at which point
/// the error is surfaced to the caller.
pub async fn fetch_range<R: EthRpcApi>(
    rpc: &R,
    chain_id: u64,
    addresses: &[Address],
    from: u64,
    to: u64,
) -> anyhow::Result<Vec<(u64, u64, Event)>> {
    if from > to {
        return Ok(Vec::new());
    }

    let filter = FilterBuilder::default()
        .address(addresses.to_vec())
        .from_block(BlockNumber::Number(U64::from(from)))
        .to_block(BlockNumber::Number(U64::from(to)));

    match rpc.get_logs(filter).await {
        Ok(logs) => logs_to_events(chain_id, logs),
        Err(_) if to > from => {
            let mid = from + (to - from) / 2;
            let mut left = Box::pin(fetch_range(rpc, chain_id, addresses, from, mid)).await?;
            let right = Box::pin(fetch_range(rpc, chain_id, addresses, mid + 1, to)).await?;
            left.extend(right);
            left.sort_by_key(|(block, index, _)| (*block, *index));
            Ok(left)
        }
        Err(err) => Err(err).context(format!("get_logs failed for single block {from}")),
    }
}

fn logs_to_events(chain_id: u64, logs: Vec<Log>) -> anyhow::Result<Vec<(u64, u64, Event)>> {
    let mut out = Vec::new();
    for log in &logs {
        let Some(event) = decode_log(chain_id, log)? else { continue };
        let block = log.block_number.ok_or_else(|| anyhow::anyhow!("log missing block number"))?.as_u64();
        let index = log.log_index.ok_or_else(|| anyhow::anyhow!("log missing log index"))?.as_u64();
        out.push((block, index, event));
    }
    out.sort_by_key(|(block, index, _)| (*block, *index));
    Ok(out)
}

/// Bloom pre-check (§4.9): skips fetching logs for a block whose bloom
/// filter can't possibly contain any of `addresses`.
pub fn block_might_contain(block: &Block<H256>, addresses: &[Address]) -> bool {
    let Some(bloom) = block.logs_bloom else { return true };
    addresses.iter().any(|address| bloom_contains_address(&bloom, address))
}

fn bloom_contains_address(bloom: &web3::types::H2048, address: &Address) -> bool {
    let digest = Keccak256::digest(address.as_bytes());
    for chunk in digest.chunks(2).take(3) {
        let bit = (u16::from_be_bytes([chunk[0], chunk[1]]) & 0x7ff) as usize;
        let byte = 255 - bit / 8;
        let mask = 1u8 << (bit % 8);
        if bloom.0[byte] & mask == 0 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_event_round_trips_through_the_registry() {
        let data = web3::ethabi::encode(&[Token::Uint(web3::types::U256::from(42u64))]);
        let log = Log {
            address: Address::zero(),
            topics: vec![topic0("Signed(uint256)")],
            data: web3::types::Bytes(data),
            block_hash: None,
            block_number: Some(U64::from(10)),
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(web3::types::U256::from(0)),
            transaction_log_index: None,
            log_type: None,
            removed: None,
        };

        let decoded = decode_log(1, &log).unwrap().unwrap();
        assert!(matches!(decoded, Event::Signed { signature_id: 42 }));
    }

    #[test]
    fn unknown_topic_decodes_to_none() {
        let log = Log {
            address: Address::zero(),
            topics: vec![H256::zero()],
            data: web3::types::Bytes(vec![]),
            block_hash: None,
            block_number: Some(U64::from(1)),
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(web3::types::U256::from(0)),
            transaction_log_index: None,
            log_type: None,
            removed: None,
        };
        assert!(decode_log(1, &log).unwrap().is_none());
    }
}
