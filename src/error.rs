use crate::binding::SlotIndex;
use crate::config::RegistryConfig;
use thiserror::Error;

/// Failure states of side-table operations.
///
/// Resolution misses are not errors; they are reported through
/// [`crate::Resolution::Unresolved`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ExtensionError {
    #[error("host object has already been destroyed")]
    HostDestroyed,
    #[error("side table is being torn down")]
    TearingDown,
    #[error("side table was retired by its context")]
    Retired,
    #[error("property slot {slot} exceeds the supported maximum {max}")]
    SlotOutOfRange { slot: SlotIndex, max: SlotIndex },
    #[error("source location is already set")]
    LocationAlreadySet,
    #[error("a deferred descriptor is already pending")]
    DeferredPending,
    #[error("deferred properties were already materialized")]
    DeferredConsumed,
    #[error("host teardown ran twice")]
    AlreadyDestroyed,
}

impl ExtensionError {
    /// Whether this error reports misuse of the API rather than an ordinary rejection.
    pub const fn is_programming_error(self) -> bool {
        matches!(
            self,
            Self::HostDestroyed | Self::TearingDown | Self::SlotOutOfRange { .. } | Self::AlreadyDestroyed
        )
    }
}

/// Routes an error through the strictness policy: programming errors panic in
/// strict mode and are logged otherwise.
pub(crate) fn report(config: &RegistryConfig, err: ExtensionError) -> ExtensionError {
    if err.is_programming_error() {
        if config.strict {
            panic!("{err}");
        }
        tracing::error!(error = %err, "side table misuse");
    }
    err
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn ordinary_rejections_pass_through_strict_mode() {
        let config = RegistryConfig::default().with_strict(true);
        assert_eq!(report(&config, ExtensionError::Retired), ExtensionError::Retired);
        assert_eq!(
            report(&config, ExtensionError::LocationAlreadySet),
            ExtensionError::LocationAlreadySet
        );
    }

    #[test]
    #[should_panic(expected = "host teardown ran twice")]
    fn programming_errors_panic_in_strict_mode() {
        let config = RegistryConfig::default().with_strict(true);
        report(&config, ExtensionError::AlreadyDestroyed);
    }

    #[test]
    fn programming_errors_are_returned_when_lenient() {
        let config = RegistryConfig::default().with_strict(false);
        let err = report(&config, ExtensionError::SlotOutOfRange { slot: 9, max: 4 });
        assert_eq!(err, ExtensionError::SlotOutOfRange { slot: 9, max: 4 });
        assert_eq!(err.to_string(), "property slot 9 exceeds the supported maximum 4");
    }
}
