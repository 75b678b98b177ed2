//! Entity trait: identity inside an aggregate.

/// An object with identity that lives inside an aggregate boundary
/// (e.g. a credit application inside its credit).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
