pub const POET_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the persisted round schema and proof wire format this build speaks.
pub fn format_versions() -> String {
    format!(
        "round-schema v{}, wire v{}",
        poet_storage::ROUND_SCHEMA_VERSION,
        poet_types::WIRE_VERSION
    )
}

pub fn git_commit_hash() -> &'static str {
    option_env!("GIT_COMMIT_HASH").unwrap_or("unknown")
}
