use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String id with a type-specific prefix. Generated ids are
/// `{prefix}_{uuid v7}`, so they sort by creation time.
macro_rules! prefixed_id {
    ($(#[$doc:meta])* $name:ident => $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
            }

            /// Wrap an existing id, e.g. one given on the command line.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(
    /// One run of the pipeline over one plan. Scopes cached documents,
    /// vector collections and stored subsections.
    SessionId => "review"
);
prefixed_id!(ToolCallId => "toolu");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(SessionId::new().as_str().starts_with("review_"));
        assert!(ToolCallId::new().as_str().starts_with("toolu_"));
    }

    #[test]
    fn generated_session_ids_sort_by_creation() {
        let ids: Vec<SessionId> = (0..50).map(|_| SessionId::new()).collect();
        assert!(ids.windows(2).all(|w| w[0].as_str() < w[1].as_str()));
    }

    #[test]
    fn raw_ids_serialize_as_plain_strings() {
        let id = SessionId::from_raw("survey-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""survey-42""#);
        let back: SessionId = serde_json::from_str(r#""survey-42""#).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.to_string(), "survey-42");
    }
}
