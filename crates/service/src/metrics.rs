//! Service metric names and recording helpers.

pub const CHALLENGES_SUBMITTED: &str = "poet_challenges_submitted";
pub const ROUNDS_OPENED: &str = "poet_rounds_opened";
pub const ROUNDS_EXECUTING: &str = "poet_rounds_executing";
pub const PROOFS_BROADCAST: &str = "poet_proofs_broadcast";
pub const BROADCAST_FAILURES: &str = "poet_broadcast_failures";

/// Register descriptions with whatever recorder is installed.
pub fn describe() {
    ::metrics::describe_counter!(CHALLENGES_SUBMITTED, "Challenges accepted into a round");
    ::metrics::describe_counter!(ROUNDS_OPENED, "Rounds opened for submissions");
    ::metrics::describe_gauge!(ROUNDS_EXECUTING, "Rounds currently computing their DAG");
    ::metrics::describe_counter!(PROOFS_BROADCAST, "Proof messages acknowledged by the broadcaster");
    ::metrics::describe_counter!(BROADCAST_FAILURES, "Failed proof broadcasts");
}

pub(crate) fn increment(name: &'static str) {
    ::metrics::counter!(name).increment(1);
}

pub(crate) fn set_executing(count: usize) {
    ::metrics::gauge!(ROUNDS_EXECUTING).set(count as f64);
}
