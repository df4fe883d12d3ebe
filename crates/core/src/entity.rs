//! Entity trait: identity + continuity across state changes.

/// An analytics entity addressable by a stable identifier.
///
/// Every entity stored by the engine (dashboards, models, insights, reports)
/// implements this so it can live in a [`crate::Repository`].
pub trait Entity: Clone + Send + Sync + 'static {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync;

    /// Human-readable entity kind, used in `NotFound` errors and logs.
    const KIND: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
