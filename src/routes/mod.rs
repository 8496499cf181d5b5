//! Router Module Index
//!
//! Everything under `/api` is the service's own machinery and is bypassed by the
//! route gate. Page paths are judged by the gate and then reach the page fallback.

/// JSON endpoints consumed by the web tier.
pub mod api;
