pub mod canonical;
pub mod keypair;
pub mod keystore;
pub mod pow;
pub mod record;

pub use canonical::{canonical_json, sha256_bytes, sha256_hex};
pub use keypair::{verify_signature, verify_signature_b64, KeyPair};
pub use keystore::{load_env_signer, Keystore};
pub use pow::{mine_pow, verify_pow};
pub use record::{sign_record, verify_record, SIG_FIELDS};
