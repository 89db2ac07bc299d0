//! Load options.

/// How [`crate::DistribCache::load`] looks up a key.
///
/// Both bumping and the peer check are on by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    pub(crate) bump: bool,
    pub(crate) peer_check: bool,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a local hit makes the element the most recently used one.
    #[must_use]
    pub fn bump(mut self, bump: bool) -> Self {
        self.bump = bump;
        self
    }

    #[must_use]
    pub fn no_bump(self) -> Self {
        self.bump(false)
    }

    /// Whether the peers are asked for their copies, so that an
    /// inconsistency is detected. Without it a local hit is served as is.
    #[must_use]
    pub fn peer_check(mut self, peer_check: bool) -> Self {
        self.peer_check = peer_check;
        self
    }

    #[must_use]
    pub fn no_peer_check(self) -> Self {
        self.peer_check(false)
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            bump: true,
            peer_check: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let opts = LoadOptions::new();
        assert!(opts.bump && opts.peer_check);

        let opts = LoadOptions::new().no_bump().no_peer_check();
        assert!(!opts.bump && !opts.peer_check);

        let opts = opts.bump(true);
        assert!(opts.bump);
    }
}
