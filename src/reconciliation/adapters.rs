//! Platform adapter contract and the static registry of mock adapters.
//!
//! The original system dispatched to per-platform modules via a dynamic
//! `importlib` lookup keyed by platform name. Rust has no equivalent late
//! binding worth reaching for here — a plain `match` over a closed,
//! compile-time-known set of platform names is both the simplest and the
//! most idiomatic replacement (see SPEC_FULL.md §11).

use crate::reconciliation::errors::AdapterError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Metrics an adapter pulled back from a platform for one post. A field is
/// `None` when the platform's own API didn't return it for this post —
/// this is how a real adapter's partial response is represented, not a
/// Rust-ism; `raw_data` on `PlatformReport` carries the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchedMetrics {
    pub views: Option<i64>,
    pub clicks: Option<i64>,
    pub conversions: Option<i64>,
}

/// A platform-specific metric fetcher. Implementations are synchronous:
/// the engine's worker threads call this off the main request path, and
/// retry/backoff/circuit-breaking all live one layer up in
/// [`crate::reconciliation::platform_fetcher`].
pub trait PlatformAdapter: Send + Sync {
    fn platform_name(&self) -> &'static str;
    fn fetch(&self, post_url: &str) -> Result<FetchedMetrics, AdapterError>;
}

fn seed_for(post_url: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    post_url.hash(&mut hasher);
    hasher.finish()
}

/// Fraction of calls (out of 100, by seeded hash) that the mock treats as a
/// platform-side failure, mirroring the original's `MOCK_FAILURE_RATE`.
const MOCK_FAILURE_RATE_PCT: u64 = 5;

/// Deterministic mock adapter: derives plausible, stable metrics from a
/// hash of the post URL so repeated fetches of the same post return the
/// same numbers (and the same simulated failures) within a run, without
/// any network calls.
struct MockAdapter {
    name: &'static str,
    base_views: i64,
}

impl PlatformAdapter for MockAdapter {
    fn platform_name(&self) -> &'static str {
        self.name
    }

    fn fetch(&self, post_url: &str) -> Result<FetchedMetrics, AdapterError> {
        let seed = seed_for(post_url);

        if seed % 100 < MOCK_FAILURE_RATE_PCT {
            return Err(match seed % 3 {
                0 => AdapterError::Failed("rate limit exceeded, try again later".to_string()),
                1 => AdapterError::Failed("401 unauthorized: invalid API credentials".to_string()),
                _ => AdapterError::Failed("upstream returned a malformed response".to_string()),
            });
        }

        let views = self.base_views + (seed % 5_000) as i64;
        let clicks = views / (20 + (seed % 10) as i64).max(1);
        let conversions = clicks / (10 + (seed % 5) as i64).max(1);

        // Occasionally the platform omits one metric (partial response).
        let omit = (seed / 100) % 37;
        Ok(FetchedMetrics {
            views: if omit == 1 { None } else { Some(views) },
            clicks: if omit == 2 { None } else { Some(clicks) },
            conversions: if omit == 3 { None } else { Some(conversions) },
        })
    }
}

/// Looks up the adapter registered for `platform_name`. Platform names are
/// case-sensitive and must match exactly what's stored in `platforms.name`.
pub fn lookup(platform_name: &str) -> Result<Box<dyn PlatformAdapter>, AdapterError> {
    let adapter: Box<dyn PlatformAdapter> = match platform_name {
        "instagram" => Box::new(MockAdapter {
            name: "instagram",
            base_views: 10_000,
        }),
        "tiktok" => Box::new(MockAdapter {
            name: "tiktok",
            base_views: 25_000,
        }),
        "youtube" => Box::new(MockAdapter {
            name: "youtube",
            base_views: 5_000,
        }),
        "x" => Box::new(MockAdapter {
            name: "x",
            base_views: 8_000,
        }),
        "reddit" => Box::new(MockAdapter {
            name: "reddit",
            base_views: 3_000,
        }),
        other => return Err(AdapterError::Missing(other.to_string())),
    };
    Ok(adapter)
}
