/// Width in bytes of every DAG label and of the round statement.
pub const LABEL_SIZE: usize = 32;

/// Output of the hash primitive for a single DAG node.
pub type Label = [u8; LABEL_SIZE];

/// Convert a byte slice into a [`Label`], rejecting any other width.
pub fn label_from_slice(bytes: &[u8]) -> Option<Label> {
    bytes.try_into().ok()
}

/// Short hex rendering used in log lines.
pub fn short_hex(label: &Label) -> String {
    hex::encode(&label[..6])
}
