//! Stateful per-ceremony drivers: the KeyGen client (C4) and Signing
//! client (C5), both grounded in the teacher's
//! `multisig/client/keygen_state_runner.rs` state-runner shape.

pub mod keygen;
pub mod signing;

pub use keygen::KeyGenClient;
pub use signing::SigningClient;
