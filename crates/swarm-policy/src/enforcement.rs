use tracing::warn;

/// Environment variables that have historically been abused to skip policy
/// validation. Removed from the environment at startup so no code path can
/// consult them.
pub const BYPASS_VARS: [&str; 4] = [
    "SKIP_POLICY_VALIDATION",
    "DISABLE_POLICY",
    "BYPASS_VALIDATION",
    "NO_VALIDATION",
];

/// Strip policy-bypass variables from the process environment. Called once
/// at startup, before any component reads its configuration.
pub fn strip_bypass_env() {
    for var in BYPASS_VARS {
        if std::env::var_os(var).is_some() {
            warn!(var, "removing insecure environment variable");
            std::env::remove_var(var);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_vars_are_removed() {
        for var in BYPASS_VARS {
            std::env::set_var(var, "1");
        }
        strip_bypass_env();
        for var in BYPASS_VARS {
            assert!(std::env::var_os(var).is_none(), "{var} survived");
        }
    }
}
