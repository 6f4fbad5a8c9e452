//! Closed set of permission codes.
//!
//! Codes follow the `Resource.action` format and are generated from the
//! versioned permission catalog, so an unknown code is rejected at parse time
//! instead of being trusted as an arbitrary string at runtime.

use core::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use palisade_core::CoreError;

macro_rules! permission_codes {
    ($(($variant:ident, $code:literal, $category:literal)),+ $(,)?) => {
        /// A permission code from the catalog.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum PermissionCode {
            $($variant),+
        }

        impl PermissionCode {
            /// Every code in the catalog, in catalog order.
            pub const ALL: &'static [PermissionCode] = &[$(PermissionCode::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            /// Catalog category (the resource side of the code).
            pub fn category(&self) -> &'static str {
                match self {
                    $(Self::$variant => $category),+
                }
            }
        }

        impl FromStr for PermissionCode {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok(Self::$variant),)+
                    other => Err(CoreError::validation(format!(
                        "unknown permission code '{other}'"
                    ))),
                }
            }
        }
    };
}

permission_codes! {
    (ProjectCreate, "Project.create", "Project"),
    (ProjectRead, "Project.read", "Project"),
    (ProjectUpdate, "Project.update", "Project"),
    (ProjectDelete, "Project.delete", "Project"),
    (InvoiceCreate, "Invoice.create", "Invoice"),
    (InvoiceRead, "Invoice.read", "Invoice"),
    (InvoiceUpdate, "Invoice.update", "Invoice"),
    (InvoiceDelete, "Invoice.delete", "Invoice"),
    (SettingRead, "Setting.read", "Setting"),
    (SettingUpdate, "Setting.update", "Setting"),
    (RoleRead, "Role.read", "Role"),
    (RoleManage, "Role.manage", "Role"),
    (MemberRead, "Member.read", "Member"),
    (MemberManage, "Member.manage", "Member"),
    (SequenceRead, "Sequence.read", "Sequence"),
    (SequenceNext, "Sequence.next", "Sequence"),
    (SequenceReset, "Sequence.reset", "Sequence"),
    (AuditRead, "Audit.read", "Audit"),
}

impl PermissionCode {
    /// The action side of the code (after the dot).
    pub fn action(&self) -> &'static str {
        self.as_str()
            .split_once('.')
            .map(|(_, action)| action)
            .unwrap_or_default()
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PermissionCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|_| {
            D::Error::custom(format!("unknown permission code '{raw}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_resource_dot_action() {
        for code in PermissionCode::ALL {
            let s = code.as_str();
            let (resource, action) = s.split_once('.').expect("missing dot");
            assert!(!resource.is_empty() && !action.is_empty(), "bad code {s}");
            assert_eq!(code.category(), resource);
            assert_eq!(code.action(), action);
        }
    }

    #[test]
    fn parse_round_trip() {
        for code in PermissionCode::ALL {
            assert_eq!(code.as_str().parse::<PermissionCode>().unwrap(), *code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        let err = "Project.explode".parse::<PermissionCode>().unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        let err = serde_json::from_str::<PermissionCode>("\"Nope.nope\"").unwrap_err();
        assert!(err.to_string().contains("unknown permission code"));
    }

    #[test]
    fn serde_uses_the_code_string() {
        let json = serde_json::to_string(&PermissionCode::ProjectCreate).unwrap();
        assert_eq!(json, "\"Project.create\"");
        let back: PermissionCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PermissionCode::ProjectCreate);
    }
}
