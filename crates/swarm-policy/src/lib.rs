pub mod enforcement;
pub mod envelope;
pub mod gas;
pub mod gates;
pub mod rules;

pub use enforcement::strip_bypass_env;
pub use envelope::{sign_envelope, verify_envelope, Envelope};
pub use gas::GasMeter;
pub use gates::{CommitTelemetry, GateEnforcer, PolicyDecision, PolicyGate};
pub use rules::current_policy_hash;
