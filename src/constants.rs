//! Protocol-wide constants.

/// Domain separation prefix for all hash-to-field operations.
pub const HASH_DOMAIN: &str = "FROST-secp256k1-SHA256-v1";

pub const DKG_TAG: &str = "dkg";
pub const RHO_TAG: &str = "rho";
pub const CHAL_TAG: &str = "chal";
pub const NONCE_TAG: &str = "nonce";

/// Number of (d, e) nonce pairs generated per pre-processing batch.
///
/// Not pinned by the Coordinator ABI; chosen to match a chunk size the
/// contract can cheaply verify a Merkle proof against.
pub const NONCE_BATCH_SIZE: usize = 32;

/// Default action TTL (§4.6).
pub const DEFAULT_ACTION_TTL_MS: u64 = 10 * 60 * 1000;

/// Default retry delay between head-of-line action attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Number of blocks uncled pessimistically on watcher startup.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 2;

/// `checkPending` timer interval.
pub const DEFAULT_CHECK_PENDING_POLL_SECONDS: u64 = 15;

/// Age (seconds) after which a pending tx_store row is eligible for resubmission.
pub const DEFAULT_RESUBMIT_SECONDS: u64 = 60;

pub const COMPONENT_KEY: &str = "component";

/// `k` multiplier used to derive the three successive `CollectingConfirmations`
/// deadlines (complaint, response, final) from the configured keygen timeout.
pub const CONFIRMATION_DEADLINE_STEPS: [u64; 3] = [1, 2, 3];
