use std::time::Duration;

/// Operational knobs for the protocol layer.
///
/// Wire-format constants live in [`crate::codec`] and must match across
/// peers; these values only shape local behavior.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// Submission attempts before a send reports failure.
    pub submit_retries: u32,
    /// Base delay between submission attempts, scaled linearly per attempt.
    pub retry_backoff: Duration,
    /// Delay between chat polls when running a polling task.
    pub poll_interval: Duration,
    /// Completed messages observed on a chat address before both parties
    /// rotate to the next derived address.
    pub messages_on_address: u32,
    /// Candidate addresses tried during collision resolution before giving
    /// up with `AddressSpaceExhausted`.
    pub max_rotation_attempts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            submit_retries: 3,
            retry_backoff: Duration::from_millis(500),
            poll_interval: Duration::from_secs(5),
            messages_on_address: 6,
            max_rotation_attempts: 16,
        }
    }
}
