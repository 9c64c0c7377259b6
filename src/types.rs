//! Type registry: OID → text-format decoder.
//!
//! The registry is explicit state owned by the adapter, populated at
//! construction. Nothing registers itself at load time.

use std::collections::HashMap;

use crate::error::Result;
use crate::protocol::Oid;
use crate::value::{self, Value};

/// Well-known type OIDs the default registry covers.
pub mod oid {
    use crate::protocol::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const JSON: Oid = 114;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const NUMERIC: Oid = 1700;
    pub const UUID: Oid = 2950;
    pub const JSONB: Oid = 3802;
}

/// A decoder turns one text-format wire value into a [`Value`].
pub type Decoder = fn(&str) -> Result<Value>;

/// Registry of column decoders keyed by type OID.
pub struct TypeRegistry {
    decoders: HashMap<Oid, Decoder>,
}

impl TypeRegistry {
    /// An empty registry. Every column decodes as text.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// The default registry covering the standard scalar types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(oid::BOOL, value::decode_bool);
        registry.register(oid::BYTEA, value::decode_bytea);
        registry.register(oid::INT2, value::decode_int);
        registry.register(oid::INT4, value::decode_int);
        registry.register(oid::INT8, value::decode_int);
        registry.register(oid::OID, value::decode_int);
        registry.register(oid::FLOAT4, value::decode_float);
        registry.register(oid::FLOAT8, value::decode_float);
        registry.register(oid::NUMERIC, value::decode_numeric);
        registry.register(oid::DATE, value::decode_date);
        registry.register(oid::TIME, value::decode_time);
        registry.register(oid::TIMESTAMP, value::decode_timestamp);
        registry.register(oid::TIMESTAMPTZ, value::decode_timestamptz);
        registry.register(oid::UUID, value::decode_uuid);
        // Textual types fall through to the text decoder anyway; registering
        // them keeps lookups off the fallback path.
        registry.register(oid::TEXT, value::decode_text);
        registry.register(oid::VARCHAR, value::decode_text);
        registry.register(oid::BPCHAR, value::decode_text);
        registry.register(oid::NAME, value::decode_text);
        registry.register(oid::JSON, value::decode_text);
        registry.register(oid::JSONB, value::decode_text);
        registry
    }

    /// Register (or replace) a decoder for a type OID.
    pub fn register(&mut self, oid: Oid, decoder: Decoder) {
        self.decoders.insert(oid, decoder);
    }

    /// Look up the decoder for a column. Modifier and column name are
    /// accepted for registries that discriminate on them; the default
    /// registry keys on OID alone. Unknown OIDs decode as text.
    pub fn lookup(&self, oid: Oid, _modifier: i32, _column: &str) -> Decoder {
        self.decoders
            .get(&oid)
            .copied()
            .unwrap_or(value::decode_text)
    }

    /// Decode one wire value for a column, NULL-aware.
    pub fn decode(
        &self,
        oid: Oid,
        modifier: i32,
        column: &str,
        raw: Option<&str>,
    ) -> Result<Value> {
        match raw {
            None => Ok(Value::Null),
            Some(text) => self.lookup(oid, modifier, column)(text),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
