//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Amazon-style resource name, `arn:<partition>:<service>:<region>:<account>:<resource>`.
    Arn
);

string_newtype!(
    /// Logical name of a deployed stack, `<app>-<env>-<workload>`.
    StackName
);

impl Arn {
    fn field(&self, idx: usize) -> Option<&str> {
        if !self.0.starts_with("arn:") {
            return None;
        }
        self.0.splitn(6, ':').nth(idx)
    }

    pub fn partition(&self) -> Option<&str> {
        self.field(1)
    }

    pub fn service(&self) -> Option<&str> {
        self.field(2)
    }

    /// The resource part of the ARN. `None` if the ARN is malformed.
    pub fn resource(&self) -> Option<&str> {
        self.field(5).filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_fields() {
        let arn = Arn::new("arn:aws:sns:us-west-2:123456789012:app-env-db-orders");
        assert_eq!(arn.partition(), Some("aws"));
        assert_eq!(arn.service(), Some("sns"));
        assert_eq!(arn.resource(), Some("app-env-db-orders"));
    }

    #[test]
    fn arn_resource_keeps_colons() {
        let arn = Arn::new("arn:aws:acm:us-east-1:123:certificate/abc:def");
        assert_eq!(arn.resource(), Some("certificate/abc:def"));
    }

    #[test]
    fn malformed_arn_has_no_resource() {
        assert_eq!(Arn::new("not-an-arn").resource(), None);
        assert_eq!(Arn::new("arn:aws:sns").resource(), None);
        assert_eq!(Arn::new("arn:aws:sns:us-east-1:123:").resource(), None);
    }

    #[test]
    fn stack_name_serde_roundtrip() {
        let name = StackName::new("app-test-api");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"app-test-api\"");
        let back: StackName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn newtype_compares_with_str() {
        let arn = Arn::from("arn:aws:acm:us-east-1:1:certificate/x");
        assert_eq!(arn, "arn:aws:acm:us-east-1:1:certificate/x");
        assert_eq!(arn.to_string(), "arn:aws:acm:us-east-1:1:certificate/x");
    }
}
