//! KILN Core - Entries, Result Trees and Casting
//!
//! Shared types for the KILN workspace: cache entries and their integrity
//! digest, the error taxonomy, the configuration context, decoded result trees
//! and the schema-driven caster. No I/O happens in this crate apart from
//! reading environment variables during configuration resolution.

pub mod cast;
pub mod config;
pub mod entry;
pub mod error;
pub mod macros;
pub mod value;

pub use cast::{
    cast, cast_into, cast_members, Cast, Castable, FieldContext, FieldSpec, FromObject,
    FromScalar, Record, Schema, Shape,
};
pub use config::{
    KilnConfig, CACHE_DISABLED_ENV, CACHE_FILE_ENV, DEFAULT_CACHE_FILE, DEFAULT_EVALUATOR_BIN,
    EVALUATOR_BIN_ENV,
};
pub use entry::{digest, Candidate, Entry};
pub use error::{
    CacheError, CacheResult, CastError, CastResult, DecodeError, EvalError, EvalResult,
    KilnError, KilnResult,
};
pub use value::{ResultTree, Scalar, Value};
