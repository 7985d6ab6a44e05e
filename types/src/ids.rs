use std::fmt;

use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifies one taxonomy; also the key of the per-taxonomy run lock.
    TaxonomyId
);

string_id!(
    /// Identifies one category node within a taxonomy tree.
    NodeId
);

string_id!(
    /// Identifies one free-text item being classified.
    ItemId
);

string_id!(
    /// Identifies one in-progress classification run.
    SessionId
);

impl NodeId {
    /// Well-known id of the root node of every taxonomy tree.
    pub const ROOT: &'static str = "root";

    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_owned())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeId, TaxonomyId};

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TaxonomyId::generate(), TaxonomyId::generate());
    }

    #[test]
    fn root_id_is_well_known() {
        assert!(NodeId::root().is_root());
        assert!(!NodeId::from("branch-1").is_root());
    }

    #[test]
    fn serializes_transparently() {
        let id = NodeId::from("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
