use tracing::{debug, warn};

use crate::{Address, ContactExchange, Error, Identity, next_public_key_address};

impl ContactExchange {
    /// Find the next unoccupied public-key address after a collision.
    ///
    /// Candidates derive deterministically from the seed and the previous
    /// candidate, so re-running the resolution from the same state walks the
    /// same chain. A candidate is accepted when nobody else announces there;
    /// the identity's own announcement (from an earlier, interrupted
    /// rotation) does not disqualify it. The walk is bounded by
    /// `max_rotation_attempts`.
    pub(crate) async fn resolve_collision(&self, identity: &Identity) -> Result<Address, Error> {
        let own = (
            identity.public_key().clone(),
            identity.request_address().clone(),
        );

        let mut candidate = identity.public_key_address().clone();
        for attempt in 1..=self.config.max_rotation_attempts {
            candidate = next_public_key_address(identity.seed(), &candidate)?;

            let occupants = self.announcements_at(&candidate).await?;
            let foreign = occupants.iter().any(|pair| pair != &own);
            if !foreign {
                debug!(attempt, address = %candidate, "rotation candidate accepted");
                return Ok(candidate);
            }
            warn!(attempt, address = %candidate, "rotation candidate occupied");
        }

        Err(Error::AddressSpaceExhausted(
            self.config.max_rotation_attempts,
        ))
    }
}
