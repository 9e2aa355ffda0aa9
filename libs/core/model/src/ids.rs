//! String identifiers for services, resources, rates, and availability zones.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

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
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identifies a backend service class, e.g. `compute` or `sharev2`.
    ServiceType
}

string_id! {
    /// Identifies a resource within a service, e.g. `cores` or `share_capacity`.
    ResourceName
}

string_id! {
    /// Identifies a cumulative rate, e.g. `data_transfer_in`.
    RateName
}

string_id! {
    /// An availability-zone label.
    ///
    /// The values [`AvailabilityZone::any`] and [`AvailabilityZone::unknown`]
    /// are reserved and semantically distinct from user-defined AZs.
    AvailabilityZone
}

impl AvailabilityZone {
    const ANY: &'static str = "any";
    const UNKNOWN: &'static str = "unknown";

    /// The pseudo-AZ for resources that are not AZ-aware.
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    /// The pseudo-AZ for usage or capacity whose AZ could not be determined.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// Whether this is a user-defined AZ rather than one of the reserved labels.
    pub fn is_real(&self) -> bool {
        !self.is_any() && !self.is_unknown()
    }
}
