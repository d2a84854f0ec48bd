//! Projection identification.
//!
//! A [`ProjectionName`] is the only key the coordinator uses to correlate a projection's
//! handler, its durable position, its live subscription and its catch-up task.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque, cheaply clonable identifier of a registered projection.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectionName(Arc<str>);

impl ProjectionName {
    /// Creates a projection name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProjectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for ProjectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectionName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProjectionName {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&ProjectionName> for ProjectionName {
    fn from(value: &ProjectionName) -> Self {
        value.clone()
    }
}

impl AsRef<str> for ProjectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ProjectionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Provides the stable name a projection is registered under.
///
/// Instead of implementing it manually, use the `#[derive(ProjectionName)]` macro from
/// `projector_derive`, which strips a `Projection`/`Projector`/`Runner` suffix from the type
/// name and converts the rest to kebab-case.
///
/// ```ignore
/// use projector_derive::ProjectionName;
///
/// #[derive(ProjectionName)]
/// struct AddressListProjection;
///
/// // projection_name() -> "address-list"
/// ```
///
/// The name is persisted next to the projection's position, so it must stay stable across
/// deployments.
pub trait NamedProjection {
    /// Returns the name this projection is registered under.
    fn projection_name(&self) -> &str;
}

impl<P> NamedProjection for Arc<P>
where
    P: NamedProjection + ?Sized,
{
    fn projection_name(&self) -> &str {
        (**self).projection_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn names_compare_by_value() {
        assert_eq!(ProjectionName::new("parcels"), ProjectionName::from("parcels"));
        assert_ne!(ProjectionName::new("parcels"), ProjectionName::new("streets"));
        assert!(ProjectionName::new("a") < ProjectionName::new("b"));
    }

    #[test]
    fn names_can_be_looked_up_by_str() {
        let mut map = HashMap::new();
        map.insert(ProjectionName::new("parcels"), 1);
        assert_eq!(map.get("parcels"), Some(&1));
    }

    #[test]
    fn display_and_debug() {
        let name = ProjectionName::new("parcels");
        assert_eq!(name.to_string(), "parcels");
        assert_eq!(format!("{name:?}"), "\"parcels\"");
    }
}
