//! ABI calldata encoders for the Coordinator and Consensus contract
//! surfaces (§6), grounded in the teacher's
//! `eth_tx_encoding/set_agg_key_with_agg_key.rs` (`web3::ethabi::Token`
//! tuple/uint/address encoding against a function selector).

use crate::crypto::Point;
use crate::frost::keygen::ProofOfKnowledge;
use crate::model::{GroupId, ParticipantId};
use web3::ethabi::{Function, Param, ParamType, StateMutability, Token};
use web3::types::{Address, U256};

fn function(name: &str, inputs: Vec<(&str, ParamType)>) -> Function {
    #[allow(deprecated)]
    Function {
        name: name.to_string(),
        inputs: inputs
            .into_iter()
            .map(|(n, kind)| Param { name: n.to_string(), kind, internal_type: None })
            .collect(),
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

fn pok_tuple(pok: &ProofOfKnowledge) -> Token {
    Token::Tuple(vec![
        Token::Uint(U256::from_big_endian(&pok.r.to_bytes()[1..])),
        Token::FixedBytes(pok.r.to_bytes().to_vec()),
        Token::Uint(U256::from_big_endian(&pok.mu.to_bytes())),
    ])
}

pub fn key_gen_and_commit(
    participants_root: [u8; 32],
    n: u64,
    t: u64,
    context: [u8; 32],
    id: ParticipantId,
    poap: &[u8],
    pok: &ProofOfKnowledge,
) -> Vec<u8> {
    let f = function(
        "keyGenAndCommit",
        vec![
            ("participantsRoot", ParamType::FixedBytes(32)),
            ("n", ParamType::Uint(256)),
            ("t", ParamType::Uint(256)),
            ("context", ParamType::FixedBytes(32)),
            ("id", ParamType::Uint(256)),
            ("poap", ParamType::Bytes),
            ("pok", ParamType::Tuple(vec![ParamType::Uint(256), ParamType::FixedBytes(32), ParamType::Uint(256)])),
        ],
    );

    f.encode_input(&[
        Token::FixedBytes(participants_root.to_vec()),
        Token::Uint(U256::from(n)),
        Token::Uint(U256::from(t)),
        Token::FixedBytes(context.to_vec()),
        Token::Uint(U256::from(id)),
        Token::Bytes(poap.to_vec()),
        pok_tuple(pok),
    ])
    .expect("static ABI encodes")
}

pub fn key_gen_commit(group_id: GroupId, id: ParticipantId, poap: &[u8], pok: &ProofOfKnowledge) -> Vec<u8> {
    let f = function(
        "keyGenCommit",
        vec![
            ("groupId", ParamType::FixedBytes(32)),
            ("id", ParamType::Uint(256)),
            ("poap", ParamType::Bytes),
            ("pok", ParamType::Tuple(vec![ParamType::Uint(256), ParamType::FixedBytes(32), ParamType::Uint(256)])),
        ],
    );
    f.encode_input(&[
        Token::FixedBytes(group_id.to_vec()),
        Token::Uint(U256::from(id)),
        Token::Bytes(poap.to_vec()),
        pok_tuple(pok),
    ])
    .expect("static ABI encodes")
}

pub fn key_gen_secret_share(group_id: GroupId, y: Point, f_share: [u8; 32]) -> Vec<u8> {
    let func = function(
        "keyGenSecretShare",
        vec![
            ("groupId", ParamType::FixedBytes(32)),
            ("y", ParamType::Bytes),
            ("f", ParamType::FixedBytes(32)),
        ],
    );
    func.encode_input(&[
        Token::FixedBytes(group_id.to_vec()),
        Token::Bytes(y.to_bytes().to_vec()),
        Token::FixedBytes(f_share.to_vec()),
    ])
    .expect("static ABI encodes")
}

pub fn key_gen_complain(group_id: GroupId, accused_id: ParticipantId) -> Vec<u8> {
    let func = function(
        "keyGenComplain",
        vec![("groupId", ParamType::FixedBytes(32)), ("accusedId", ParamType::Uint(256))],
    );
    func.encode_input(&[Token::FixedBytes(group_id.to_vec()), Token::Uint(U256::from(accused_id))])
        .expect("static ABI encodes")
}

pub fn key_gen_complaint_response(group_id: GroupId, plaintiff_id: ParticipantId, secret_share: [u8; 32]) -> Vec<u8> {
    let func = function(
        "keyGenComplaintResponse",
        vec![
            ("groupId", ParamType::FixedBytes(32)),
            ("plaintiffId", ParamType::Uint(256)),
            ("secretShare", ParamType::FixedBytes(32)),
        ],
    );
    func.encode_input(&[
        Token::FixedBytes(group_id.to_vec()),
        Token::Uint(U256::from(plaintiff_id)),
        Token::FixedBytes(secret_share.to_vec()),
    ])
    .expect("static ABI encodes")
}

pub fn key_gen_confirm(group_id: GroupId) -> Vec<u8> {
    let func = function("keyGenConfirm", vec![("groupId", ParamType::FixedBytes(32))]);
    func.encode_input(&[Token::FixedBytes(group_id.to_vec())]).expect("static ABI encodes")
}

pub fn key_gen_confirm_with_callback(group_id: GroupId, target: Address, context: Vec<u8>) -> Vec<u8> {
    let func = function(
        "keyGenConfirmWithCallback",
        vec![
            ("groupId", ParamType::FixedBytes(32)),
            ("target", ParamType::Address),
            ("context", ParamType::Bytes),
        ],
    );
    func.encode_input(&[Token::FixedBytes(group_id.to_vec()), Token::Address(target), Token::Bytes(context)])
        .expect("static ABI encodes")
}

pub fn sign(group_id: GroupId, message: [u8; 32]) -> Vec<u8> {
    let func = function("sign", vec![("groupId", ParamType::FixedBytes(32)), ("message", ParamType::FixedBytes(32))]);
    func.encode_input(&[Token::FixedBytes(group_id.to_vec()), Token::FixedBytes(message.to_vec())])
        .expect("static ABI encodes")
}

pub fn preprocess(group_id: GroupId, commitment_root: [u8; 32]) -> Vec<u8> {
    let func = function(
        "preprocess",
        vec![("groupId", ParamType::FixedBytes(32)), ("commitmentRoot", ParamType::FixedBytes(32))],
    );
    func.encode_input(&[Token::FixedBytes(group_id.to_vec()), Token::FixedBytes(commitment_root.to_vec())])
        .expect("static ABI encodes")
}

pub fn sign_reveal_nonces(signature_id: u64, d: Point, e: Point, merkle_proof: &[u8]) -> Vec<u8> {
    let func = function(
        "signRevealNonces",
        vec![
            ("signatureId", ParamType::Uint(256)),
            ("de", ParamType::Tuple(vec![ParamType::Bytes, ParamType::Bytes])),
            ("proof", ParamType::Bytes),
        ],
    );
    func.encode_input(&[
        Token::Uint(U256::from(signature_id)),
        Token::Tuple(vec![Token::Bytes(d.to_bytes().to_vec()), Token::Bytes(e.to_bytes().to_vec())]),
        Token::Bytes(merkle_proof.to_vec()),
    ])
    .expect("static ABI encodes")
}

pub fn propose_epoch(proposed_epoch: u64, rollover_block: u64, group_id: GroupId) -> Vec<u8> {
    let func = function(
        "proposeEpoch",
        vec![
            ("proposedEpoch", ParamType::Uint(256)),
            ("rolloverBlock", ParamType::Uint(256)),
            ("groupId", ParamType::FixedBytes(32)),
        ],
    );
    func.encode_input(&[
        Token::Uint(U256::from(proposed_epoch)),
        Token::Uint(U256::from(rollover_block)),
        Token::FixedBytes(group_id.to_vec()),
    ])
    .expect("static ABI encodes")
}

pub fn stage_epoch(proposed_epoch: u64, rollover_block: u64, group_id: GroupId, signature_id: u64) -> Vec<u8> {
    let func = function(
        "stageEpoch",
        vec![
            ("proposedEpoch", ParamType::Uint(256)),
            ("rolloverBlock", ParamType::Uint(256)),
            ("groupId", ParamType::FixedBytes(32)),
            ("signatureId", ParamType::Uint(256)),
        ],
    );
    func.encode_input(&[
        Token::Uint(U256::from(proposed_epoch)),
        Token::Uint(U256::from(rollover_block)),
        Token::FixedBytes(group_id.to_vec()),
        Token::Uint(U256::from(signature_id)),
    ])
    .expect("static ABI encodes")
}

pub fn sign_share(
    signature_id: u64,
    commitment_share: Point,
    signers_root: [u8; 32],
    z: crate::crypto::Scalar,
    lagrange_coefficient: crate::crypto::Scalar,
    proof: &[u8],
) -> Vec<u8> {
    let func = function(
        "signShare",
        vec![
            ("signatureId", ParamType::Uint(256)),
            ("commitment", ParamType::Tuple(vec![ParamType::Bytes, ParamType::FixedBytes(32)])),
            ("share", ParamType::Tuple(vec![ParamType::Uint(256), ParamType::Uint(256)])),
            ("proof", ParamType::Bytes),
        ],
    );
    func.encode_input(&[
        Token::Uint(U256::from(signature_id)),
        Token::Tuple(vec![
            Token::Bytes(commitment_share.to_bytes().to_vec()),
            Token::FixedBytes(signers_root.to_vec()),
        ]),
        Token::Tuple(vec![
            Token::Uint(U256::from_big_endian(&z.to_bytes())),
            Token::Uint(U256::from_big_endian(&lagrange_coefficient.to_bytes())),
        ]),
        Token::Bytes(proof.to_vec()),
    ])
    .expect("static ABI encodes")
}

pub fn attest_transaction(epoch: u64, transaction_hash: [u8; 32], signature_id: u64) -> Vec<u8> {
    let func = function(
        "attestTransaction",
        vec![
            ("epoch", ParamType::Uint(256)),
            ("transactionHash", ParamType::FixedBytes(32)),
            ("signatureId", ParamType::Uint(256)),
        ],
    );
    func.encode_input(&[
        Token::Uint(U256::from(epoch)),
        Token::FixedBytes(transaction_hash.to_vec()),
        Token::Uint(U256::from(signature_id)),
    ])
    .expect("static ABI encodes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_epoch_encodes_selector_and_arguments() {
        let calldata = stage_epoch(2, 240, [1u8; 32], 7);
        // 4-byte selector + 4 * 32-byte words.
        assert_eq!(calldata.len(), 4 + 4 * 32);
        let mut expected_proposed_epoch = [0u8; 32];
        expected_proposed_epoch[31] = 2;
        assert_eq!(&calldata[4..36], &expected_proposed_epoch);
    }

    #[test]
    fn attest_transaction_roundtrips_transaction_hash() {
        let hash = [0xABu8; 32];
        let calldata = attest_transaction(5, hash, 9);
        assert_eq!(&calldata[36..68], &hash);
    }
}
