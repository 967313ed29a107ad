//! Wire-side values
//!
//! The encryption machinery and the driver both speak BSON, so the wire
//! domain is `bson::Bson` itself. This module only names the aliases the
//! rest of the crate reports in errors.

use bson::Bson;

/// A document as the driver sees it.
pub type WireDocument = bson::Document;

/// BSON type alias of a wire value (`$type` spelling).
pub fn bson_type(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::String(_) => "string",
        Bson::Boolean(_) => "bool",
        Bson::Binary(_) => "binData",
        Bson::DateTime(_) => "date",
        Bson::ObjectId(_) => "objectId",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::Int32(_) => "int",
        Bson::Double(_) => "double",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Timestamp(_) => "timestamp",
        Bson::Symbol(_) => "symbol",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}
