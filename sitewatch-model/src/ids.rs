use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                $name(value)
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name).map_err(|_| ModelError::Parse {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Strongly typed ID for the project that owns targets and issues
    ProjectId,
    "project id"
);
define_id!(
    /// Strongly typed ID for a single scan record (reused by rescans)
    ScanId,
    "scan id"
);
define_id!(
    /// Strongly typed ID for a deduplicated issue
    IssueId,
    "issue id"
);
define_id!(
    /// Stable ID for an audited URL within a project
    UrlId,
    "url id"
);

impl UrlId {
    /// Derive the target id for `url` inside `project`.
    ///
    /// The id is a UUIDv5 keyed by the project, so the same normalized URL
    /// always maps to the same target across scans.
    pub fn derive(project: ProjectId, url: &str) -> Self {
        UrlId(Uuid::new_v5(&project.0, url.as_bytes()))
    }
}
