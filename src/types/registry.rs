//! Process-wide type registry
//!
//! Every supported value kind has one immutable `TypeDescriptor` holding its
//! names, its BSON type alias and its encode/decode rules. The descriptor
//! table is static data; the name index is built once on first lookup and is
//! read-only afterwards.
//!
//! Encode rules accept a small set of lossless conversions (an integral
//! double into an int32 field, a numeric into a string field). Nothing that
//! loses precision is ever accepted.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Decimal128};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value::Value;
use super::wire::bson_type;
use crate::errors::{FleError, FleResult};

/// Largest integer a double represents exactly
const MAX_SAFE_INTEGER: i64 = 1 << 53;

/// Supported leaf value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    String,
    Boolean,
    Buffer,
    Date,
    ObjectId,
    BigInt,
    Decimal128,
    Int32,
    Double,
    Uuid,
}

impl TypeKind {
    pub const ALL: [TypeKind; 10] = [
        TypeKind::String,
        TypeKind::Boolean,
        TypeKind::Buffer,
        TypeKind::Date,
        TypeKind::ObjectId,
        TypeKind::BigInt,
        TypeKind::Decimal128,
        TypeKind::Int32,
        TypeKind::Double,
        TypeKind::Uuid,
    ];

    /// Returns this kind's descriptor
    pub fn descriptor(self) -> &'static TypeDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn bson_type(self) -> &'static str {
        self.descriptor().bson_type
    }

    /// Looks a kind up by name or alias, ignoring case.
    pub fn from_name(name: &str) -> Option<TypeKind> {
        name_index()
            .get(name.to_ascii_lowercase().as_str())
            .copied()
    }

    /// Whether deterministic encryption may be applied to this kind
    pub fn supports_deterministic(self) -> bool {
        !matches!(self, TypeKind::Double | TypeKind::Decimal128 | TypeKind::Boolean)
    }

    /// Whether range queries may be declared on this kind
    pub fn supports_range(self) -> bool {
        matches!(
            self,
            TypeKind::Int32
                | TypeKind::BigInt
                | TypeKind::Double
                | TypeKind::Decimal128
                | TypeKind::Date
        )
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Canonical description of one value kind
pub struct TypeDescriptor {
    pub kind: TypeKind,
    pub name: &'static str,
    /// Alias used in encryption descriptors
    pub bson_type: &'static str,
    aliases: &'static [&'static str],
    encode: fn(&Value) -> Option<FleResult<Bson>>,
    decode: fn(&Bson) -> Option<FleResult<Value>>,
}

impl TypeDescriptor {
    /// Converts an application value into its wire form.
    ///
    /// Fails with `TypeMismatch` when the value is not accepted by this kind.
    pub fn encode(&self, value: &Value) -> FleResult<Bson> {
        match (self.encode)(value) {
            Some(result) => result,
            None => Err(FleError::type_mismatch(self.name, value.kind())),
        }
    }

    /// Converts a wire value back into its application form.
    pub fn decode(&self, wire: &Bson) -> FleResult<Value> {
        match (self.decode)(wire) {
            Some(result) => result,
            None => Err(FleError::type_mismatch(self.name, bson_type(wire))),
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        self.aliases
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("bson_type", &self.bson_type)
            .finish()
    }
}

/// Descriptor table, indexed by `TypeKind` discriminant
static DESCRIPTORS: [TypeDescriptor; 10] = [
    TypeDescriptor {
        kind: TypeKind::String,
        name: "string",
        bson_type: "string",
        aliases: &["string", "str"],
        encode: encode_string,
        decode: decode_string,
    },
    TypeDescriptor {
        kind: TypeKind::Boolean,
        name: "boolean",
        bson_type: "bool",
        aliases: &["boolean", "bool"],
        encode: encode_boolean,
        decode: decode_boolean,
    },
    TypeDescriptor {
        kind: TypeKind::Buffer,
        name: "buffer",
        bson_type: "binData",
        aliases: &["buffer", "bindata", "binary"],
        encode: encode_buffer,
        decode: decode_buffer,
    },
    TypeDescriptor {
        kind: TypeKind::Date,
        name: "date",
        bson_type: "date",
        aliases: &["date"],
        encode: encode_date,
        decode: decode_date,
    },
    TypeDescriptor {
        kind: TypeKind::ObjectId,
        name: "objectid",
        bson_type: "objectId",
        aliases: &["objectid", "oid"],
        encode: encode_object_id,
        decode: decode_object_id,
    },
    TypeDescriptor {
        kind: TypeKind::BigInt,
        name: "bigint",
        bson_type: "long",
        aliases: &["bigint", "long"],
        encode: encode_bigint,
        decode: decode_bigint,
    },
    TypeDescriptor {
        kind: TypeKind::Decimal128,
        name: "decimal128",
        bson_type: "decimal",
        aliases: &["decimal128", "decimal"],
        encode: encode_decimal,
        decode: decode_decimal,
    },
    TypeDescriptor {
        kind: TypeKind::Int32,
        name: "int32",
        bson_type: "int",
        aliases: &["int32", "int"],
        encode: encode_int32,
        decode: decode_int32,
    },
    TypeDescriptor {
        kind: TypeKind::Double,
        name: "double",
        bson_type: "double",
        aliases: &["double", "number"],
        encode: encode_double,
        decode: decode_double,
    },
    TypeDescriptor {
        kind: TypeKind::Uuid,
        name: "uuid",
        bson_type: "binData",
        aliases: &["uuid"],
        encode: encode_uuid,
        decode: decode_uuid,
    },
];

static NAME_INDEX: OnceLock<HashMap<&'static str, TypeKind>> = OnceLock::new();

fn name_index() -> &'static HashMap<&'static str, TypeKind> {
    NAME_INDEX.get_or_init(|| {
        DESCRIPTORS
            .iter()
            .flat_map(|d| d.aliases.iter().map(move |alias| (*alias, d.kind)))
            .collect()
    })
}

/// Encodes a value with the given kind's rules.
pub fn encode(kind: TypeKind, value: &Value) -> FleResult<Bson> {
    kind.descriptor().encode(value)
}

/// Decodes a wire value with the given kind's rules.
pub fn decode(kind: TypeKind, wire: &Bson) -> FleResult<Value> {
    kind.descriptor().decode(wire)
}

// =============================================================================
// Encode rules
// =============================================================================

fn encode_string(value: &Value) -> Option<FleResult<Bson>> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Int32(i) => i.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::Double(f) if f.is_finite() => f.to_string(),
        Value::Decimal128(d) => d.to_string(),
        _ => return None,
    };
    Some(Ok(Bson::String(text)))
}

fn encode_boolean(value: &Value) -> Option<FleResult<Bson>> {
    match value {
        Value::Boolean(b) => Some(Ok(Bson::Boolean(*b))),
        _ => None,
    }
}

fn encode_buffer(value: &Value) -> Option<FleResult<Bson>> {
    match value {
        Value::Buffer(bytes) => Some(Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }))),
        _ => None,
    }
}

/// Millisecond instant, provided it maps to a calendar date.
fn checked_millis(ms: i64) -> FleResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        FleError::type_mismatch("date", format!("{} ms outside the representable range", ms))
    })
}

fn encode_date(value: &Value) -> Option<FleResult<Bson>> {
    let instant = match value {
        Value::Date(dt) => Ok(*dt),
        Value::Int32(ms) => checked_millis(*ms as i64),
        Value::Int64(ms) => checked_millis(*ms),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| FleError::type_mismatch("date", format!("string '{}'", s))),
        _ => return None,
    };
    Some(instant.map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt))))
}

fn encode_object_id(value: &Value) -> Option<FleResult<Bson>> {
    match value {
        Value::ObjectId(id) => Some(Ok(Bson::ObjectId(*id))),
        Value::String(s) => Some(
            ObjectId::parse_str(s)
                .map(Bson::ObjectId)
                .map_err(|_| FleError::type_mismatch("objectid", format!("string '{}'", s))),
        ),
        _ => None,
    }
}

fn encode_bigint(value: &Value) -> Option<FleResult<Bson>> {
    let wide: i128 = match value {
        Value::BigInt(i) => *i,
        Value::Int32(i) => *i as i128,
        Value::Int64(i) => *i as i128,
        Value::String(s) => match s.trim().parse::<i128>() {
            Ok(i) => i,
            Err(_) => {
                return Some(Err(FleError::type_mismatch(
                    "bigint",
                    format!("string '{}'", s),
                )))
            }
        },
        _ => return None,
    };
    Some(
        i64::try_from(wide)
            .map(Bson::Int64)
            .map_err(|_| FleError::type_mismatch("bigint", "integer outside the 64-bit range")),
    )
}

fn parse_decimal(text: &str) -> FleResult<Decimal128> {
    text.trim()
        .parse::<Decimal128>()
        .map_err(|_| FleError::type_mismatch("decimal128", format!("string '{}'", text)))
}

fn encode_decimal(value: &Value) -> Option<FleResult<Bson>> {
    let decimal = match value {
        Value::Decimal128(d) => Ok(*d),
        Value::String(s) => parse_decimal(s),
        Value::Int32(i) => parse_decimal(&i.to_string()),
        Value::Int64(i) => parse_decimal(&i.to_string()),
        Value::BigInt(i) => parse_decimal(&i.to_string()),
        _ => return None,
    };
    Some(decimal.map(Bson::Decimal128))
}

fn encode_int32(value: &Value) -> Option<FleResult<Bson>> {
    let out_of_range = || FleError::type_mismatch("int32", "integer outside the 32-bit range");
    let result = match value {
        Value::Int32(i) => Ok(*i),
        Value::Int64(i) => i32::try_from(*i).map_err(|_| out_of_range()),
        Value::BigInt(i) => i32::try_from(*i).map_err(|_| out_of_range()),
        Value::Double(f) => {
            if f.fract() != 0.0 || !f.is_finite() {
                Err(FleError::type_mismatch("int32", "non-integral double"))
            } else if *f < i32::MIN as f64 || *f > i32::MAX as f64 {
                Err(out_of_range())
            } else {
                Ok(*f as i32)
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i32>()
            .map_err(|_| FleError::type_mismatch("int32", format!("string '{}'", s))),
        _ => return None,
    };
    Some(result.map(Bson::Int32))
}

fn encode_double(value: &Value) -> Option<FleResult<Bson>> {
    let inexact = || FleError::type_mismatch("double", "integer not exactly representable");
    let result = match value {
        Value::Double(f) => Ok(*f),
        Value::Int32(i) => Ok(*i as f64),
        Value::Int64(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => Ok(*i as f64),
        Value::Int64(_) => Err(inexact()),
        Value::BigInt(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u128 => Ok(*i as f64),
        Value::BigInt(_) => Err(inexact()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FleError::type_mismatch("double", format!("string '{}'", s))),
        _ => return None,
    };
    Some(result.map(Bson::Double))
}

fn encode_uuid(value: &Value) -> Option<FleResult<Bson>> {
    let uuid = match value {
        Value::Uuid(u) => Ok(*u),
        Value::String(s) => Uuid::parse_str(s)
            .map_err(|_| FleError::type_mismatch("uuid", format!("string '{}'", s))),
        _ => return None,
    };
    Some(uuid.map(|u| {
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: u.as_bytes().to_vec(),
        })
    }))
}

// =============================================================================
// Decode rules
// =============================================================================

fn decode_string(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::String(s) => Some(Ok(Value::String(s.clone()))),
        _ => None,
    }
}

fn decode_boolean(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Boolean(b) => Some(Ok(Value::Boolean(*b))),
        _ => None,
    }
}

fn decode_buffer(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Binary(binary) if binary.subtype != BinarySubtype::Encrypted => {
            Some(Ok(Value::Buffer(binary.bytes.clone())))
        }
        _ => None,
    }
}

fn decode_date(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::DateTime(dt) => Some(checked_millis(dt.timestamp_millis()).map(Value::Date)),
        _ => None,
    }
}

fn decode_object_id(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::ObjectId(id) => Some(Ok(Value::ObjectId(*id))),
        _ => None,
    }
}

fn decode_bigint(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Int64(i) => Some(Ok(Value::BigInt(*i as i128))),
        Bson::Int32(i) => Some(Ok(Value::BigInt(*i as i128))),
        _ => None,
    }
}

fn decode_decimal(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Decimal128(d) => Some(Ok(Value::Decimal128(*d))),
        _ => None,
    }
}

fn decode_int32(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Int32(i) => Some(Ok(Value::Int32(*i))),
        _ => None,
    }
}

fn decode_double(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Double(f) => Some(Ok(Value::Double(*f))),
        Bson::Int32(i) => Some(Ok(Value::Double(*i as f64))),
        _ => None,
    }
}

fn decode_uuid(wire: &Bson) -> Option<FleResult<Value>> {
    match wire {
        Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => {
            Uuid::from_slice(&binary.bytes).ok().map(|u| Ok(Value::Uuid(u)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(kind: TypeKind, value: Value) {
        let wire = encode(kind, &value).unwrap();
        assert_eq!(decode(kind, &wire).unwrap(), value, "kind {}", kind);
    }

    #[test]
    fn test_descriptor_table_matches_kinds() {
        for kind in TypeKind::ALL {
            assert_eq!(kind.descriptor().kind, kind);
        }
    }

    #[test]
    fn test_round_trip_every_kind() {
        round_trip(TypeKind::String, Value::from("hello"));
        round_trip(TypeKind::Boolean, Value::from(true));
        round_trip(TypeKind::Buffer, Value::from(vec![1u8, 2, 3]));
        round_trip(
            TypeKind::Date,
            Value::Date(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()),
        );
        round_trip(TypeKind::ObjectId, Value::from(ObjectId::new()));
        round_trip(TypeKind::BigInt, Value::BigInt(3));
        round_trip(TypeKind::BigInt, Value::BigInt(i64::MAX as i128));
        round_trip(TypeKind::Decimal128, Value::from("1.5".parse::<Decimal128>().unwrap()));
        round_trip(TypeKind::Int32, Value::from(5i32));
        round_trip(TypeKind::Double, Value::from(1.5f64));
        round_trip(TypeKind::Uuid, Value::from(Uuid::new_v4()));
    }

    #[test]
    fn test_int32_and_double_stay_distinct() {
        let as_int = encode(TypeKind::Int32, &Value::Int32(5)).unwrap();
        let as_double = encode(TypeKind::Double, &Value::Int32(5)).unwrap();
        assert_eq!(as_int, Bson::Int32(5));
        assert_eq!(as_double, Bson::Double(5.0));
        assert_eq!(decode(TypeKind::Int32, &as_int).unwrap(), Value::Int32(5));
        assert_eq!(decode(TypeKind::Double, &as_double).unwrap(), Value::Double(5.0));
    }

    #[test]
    fn test_int32_accepts_integral_values_only() {
        assert_eq!(
            encode(TypeKind::Int32, &Value::Double(32.0)).unwrap(),
            Bson::Int32(32)
        );
        assert!(encode(TypeKind::Int32, &Value::Double(1.5)).is_err());
        assert!(encode(TypeKind::Int32, &Value::Int64(1 << 40)).is_err());
    }

    #[test]
    fn test_bigint_is_exact() {
        let big = Value::BigInt(9_007_199_254_740_993);
        let wire = encode(TypeKind::BigInt, &big).unwrap();
        assert_eq!(wire, Bson::Int64(9_007_199_254_740_993));
        assert_eq!(decode(TypeKind::BigInt, &wire).unwrap(), big);
    }

    #[test]
    fn test_bigint_rejects_out_of_range() {
        let err = encode(TypeKind::BigInt, &Value::BigInt(i64::MAX as i128 + 1)).unwrap_err();
        assert_eq!(err.code().code(), "AERO_FLE_TYPE_MISMATCH");
    }

    #[test]
    fn test_double_rejects_inexact_integers() {
        assert!(encode(TypeKind::Double, &Value::Int64((1 << 53) + 1)).is_err());
        assert!(encode(TypeKind::Double, &Value::Int64(1 << 53)).is_ok());
    }

    #[test]
    fn test_decimal_never_accepts_double() {
        let err = encode(TypeKind::Decimal128, &Value::Double(1.5)).unwrap_err();
        assert_eq!(
            err,
            FleError::type_mismatch("decimal128", "double")
        );
    }

    #[test]
    fn test_decimal_from_string_keeps_scale() {
        let wire = encode(TypeKind::Decimal128, &Value::from("1.50")).unwrap();
        let value = decode(TypeKind::Decimal128, &wire).unwrap();
        match value {
            Value::Decimal128(d) => assert_eq!(d.to_string(), "1.50"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_accepts_numbers() {
        assert_eq!(
            encode(TypeKind::String, &Value::Int64(3)).unwrap(),
            Bson::String("3".into())
        );
        assert!(encode(TypeKind::String, &Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_date_from_rfc3339_and_millis() {
        let wire = encode(TypeKind::Date, &Value::from("2012-12-12T00:00:00Z")).unwrap();
        assert_eq!(
            wire,
            Bson::DateTime(bson::DateTime::from_millis(1_355_270_400_000))
        );
        assert_eq!(
            encode(TypeKind::Date, &Value::Int64(42)).unwrap(),
            Bson::DateTime(bson::DateTime::from_millis(42))
        );
        assert!(encode(TypeKind::Date, &Value::from("yesterday")).is_err());
    }

    #[test]
    fn test_date_rejects_millis_outside_calendar_range() {
        let err = encode(TypeKind::Date, &Value::Int64(i64::MAX)).unwrap_err();
        assert_eq!(err.code().code(), "AERO_FLE_TYPE_MISMATCH");
        assert!(err.to_string().contains(&i64::MAX.to_string()));
        assert!(encode(TypeKind::Date, &Value::Int64(i64::MIN)).is_err());
        assert!(encode(TypeKind::Date, &Value::Int32(i32::MIN)).is_ok());
    }

    #[test]
    fn test_decode_names_out_of_range_date() {
        let wire = Bson::DateTime(bson::DateTime::from_millis(i64::MAX));
        let err = decode(TypeKind::Date, &wire).unwrap_err();
        assert_eq!(
            err,
            FleError::type_mismatch(
                "date",
                format!("{} ms outside the representable range", i64::MAX)
            )
        );
    }

    #[test]
    fn test_decimal_folds_trailing_zeros_into_exponent() {
        let text = format!("1{}", "0".repeat(36));
        let wire = encode(TypeKind::Decimal128, &Value::from(text.as_str())).unwrap();
        assert!(matches!(wire, Bson::Decimal128(_)));
        assert!(decode(TypeKind::Decimal128, &wire).is_ok());
        assert!(encode(TypeKind::Decimal128, &Value::from("not a number")).is_err());
    }

    #[test]
    fn test_object_id_from_hex_string() {
        let id = ObjectId::new();
        assert_eq!(
            encode(TypeKind::ObjectId, &Value::from(id.to_hex())).unwrap(),
            Bson::ObjectId(id)
        );
        assert!(encode(TypeKind::ObjectId, &Value::from("xyz")).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_wire_kind() {
        let err = decode(TypeKind::Int32, &Bson::String("5".into())).unwrap_err();
        assert_eq!(err, FleError::type_mismatch("int32", "string"));
    }

    #[test]
    fn test_decode_rejects_ciphertext_as_buffer() {
        let ciphertext = Bson::Binary(Binary {
            subtype: BinarySubtype::Encrypted,
            bytes: vec![0; 8],
        });
        assert!(decode(TypeKind::Buffer, &ciphertext).is_err());
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(TypeKind::from_name("String"), Some(TypeKind::String));
        assert_eq!(TypeKind::from_name("Int32"), Some(TypeKind::Int32));
        assert_eq!(TypeKind::from_name("long"), Some(TypeKind::BigInt));
        assert_eq!(TypeKind::from_name("Decimal128"), Some(TypeKind::Decimal128));
        assert_eq!(TypeKind::from_name("Number"), Some(TypeKind::Double));
        assert_eq!(TypeKind::from_name("Mixed"), None);
    }

    #[test]
    fn test_bson_type_aliases() {
        assert_eq!(TypeKind::Boolean.bson_type(), "bool");
        assert_eq!(TypeKind::BigInt.bson_type(), "long");
        assert_eq!(TypeKind::Decimal128.bson_type(), "decimal");
        assert_eq!(TypeKind::Int32.bson_type(), "int");
        assert_eq!(TypeKind::ObjectId.bson_type(), "objectId");
        assert_eq!(TypeKind::Uuid.bson_type(), "binData");
    }
}
