use roastery_core::PacingConfig;

/// Configuration for the operation registry.
///
/// Controls how simulated stage durations map onto real pauses and how much
/// history is retained for queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Pacing applied to every operation the registry builds.
    pub pacing: PacingConfig,
    /// Default page size for history queries when the caller gives no limit.
    pub default_history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            default_history_limit: 100,
        }
    }
}
