//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Entities (retry tasks, correlation links, match results, vendor profiles)
/// are compared by identity; their fields change over time while the identity
/// stays fixed.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
