//! Engine configuration.

use reprint_core::key::DEFAULT_MAX_POST_BODY;
use serde::{Deserialize, Serialize};

/// Host-level cache settings, deserializable from the host's configuration.
///
/// Every field has a default, so an empty document configures a working
/// cache:
///
/// ```
/// use reprint::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str("{}").unwrap();
/// assert_eq!(config, CacheConfig::default());
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch. A disabled cache bypasses every lookup and rejects
    /// every admission; it never counts misses.
    pub enabled: bool,
    /// Largest raw POST body eligible for digest keying, in bytes.
    pub max_post_body_bytes: usize,
    /// Suppress the `Vary: *` marker the host would otherwise emit for
    /// responses varying by params or by a custom string.
    pub omit_vary_star: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_post_body_bytes: DEFAULT_MAX_POST_BODY,
            omit_vary_star: false,
        }
    }
}
