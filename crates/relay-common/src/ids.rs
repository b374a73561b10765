use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, UUID-shaped identifiers (spec §3: "identifiers are opaque strings").
///
/// Each is a thin wrapper around `Uuid` rather than a bare `String` so the
/// compiler catches a `ProviderId` passed where a `CredentialId` is expected.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(ProviderId);
opaque_id!(EndpointId);
opaque_id!(CredentialId);
opaque_id!(GlobalModelId);
opaque_id!(CallerId);

/// Trace ids are request-scoped and never persisted as entities, so they stay
/// a plain `String` rather than a wrapped `Uuid` type.
pub fn new_trace_id() -> String {
    Uuid::now_v7().to_string()
}
