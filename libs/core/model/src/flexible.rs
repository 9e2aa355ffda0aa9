//! Tolerant decoders for backend APIs that are loose about number shapes.
//!
//! Several OpenStack-style APIs return numeric fields as an integer, a numeric
//! string, the literal string `"infinite"`, or `null`. These wrappers accept
//! all of those forms: `"infinite"` maps to the maximum representable value,
//! `null` maps to zero.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An unsigned integer decoded leniently. Negative inputs saturate at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FlexibleUint(pub u64);

/// A signed integer decoded leniently. `-1` commonly means "unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FlexibleInt(pub i64);

impl From<FlexibleUint> for u64 {
    fn from(value: FlexibleUint) -> u64 {
        value.0
    }
}

impl From<FlexibleInt> for i64 {
    fn from(value: FlexibleInt) -> i64 {
        value.0
    }
}

impl Serialize for FlexibleUint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl Serialize for FlexibleInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

struct UintVisitor;

impl<'de> Visitor<'de> for UintVisitor {
    type Value = FlexibleUint;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, a numeric string, \"infinite\", or null")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(FlexibleUint(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(FlexibleUint(value.try_into().unwrap_or(0)))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value <= 0.0 {
            Ok(FlexibleUint(0))
        } else if value >= u64::MAX as f64 {
            Ok(FlexibleUint(u64::MAX))
        } else {
            Ok(FlexibleUint(value as u64))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        if value == "infinite" {
            return Ok(FlexibleUint(u64::MAX));
        }
        value
            .parse::<u64>()
            .map(FlexibleUint)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FlexibleUint(0))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FlexibleUint(0))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(UintVisitor)
    }
}

impl<'de> Deserialize<'de> for FlexibleUint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UintVisitor)
    }
}

struct IntVisitor;

impl<'de> Visitor<'de> for IntVisitor {
    type Value = FlexibleInt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer, a numeric string, \"infinite\", or null")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(FlexibleInt(value.try_into().unwrap_or(i64::MAX)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(FlexibleInt(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value >= i64::MAX as f64 {
            Ok(FlexibleInt(i64::MAX))
        } else if value <= i64::MIN as f64 {
            Ok(FlexibleInt(i64::MIN))
        } else {
            Ok(FlexibleInt(value as i64))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        if value == "infinite" {
            return Ok(FlexibleInt(i64::MAX));
        }
        value
            .parse::<i64>()
            .map(FlexibleInt)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FlexibleInt(0))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FlexibleInt(0))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(IntVisitor)
    }
}

impl<'de> Deserialize<'de> for FlexibleInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IntVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Doc {
        value: FlexibleUint,
    }

    fn decode(json: &str) -> u64 {
        let doc: Doc = serde_json::from_str(json).unwrap();
        doc.value.0
    }

    #[test]
    fn accepts_all_number_shapes() {
        assert_eq!(decode(r#"{"value": 42}"#), 42);
        assert_eq!(decode(r#"{"value": "42"}"#), 42);
        assert_eq!(decode(r#"{"value": "infinite"}"#), u64::MAX);
        assert_eq!(decode(r#"{"value": null}"#), 0);
        assert_eq!(decode(r#"{"value": -3}"#), 0);
    }

    #[test]
    fn rejects_garbage_strings() {
        let result: Result<Doc, _> = serde_json::from_str(r#"{"value": "many"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn signed_variant_keeps_unlimited_marker() {
        let value: FlexibleInt = serde_json::from_str("-1").unwrap();
        assert_eq!(value.0, -1);
        let value: FlexibleInt = serde_json::from_str("\"infinite\"").unwrap();
        assert_eq!(value.0, i64::MAX);
    }
}
