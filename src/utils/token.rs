use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Length of tokens embedded in candidate-facing links.
pub const LINK_TOKEN_LEN: usize = 32;

pub fn generate_access_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
