//! Casting result trees onto statically declared destination types.
//!
//! Casting runs in two passes:
//!
//! 1. [`cast`] walks a [`ResultTree`] against a [`Schema`], resolving renamed
//!    source keys, checking shapes and recursing into nested objects. The
//!    output is a [`Record`] holding one [`Cast`] per field that had a source
//!    value. Fields without a source value are left out.
//! 2. [`Castable::from_record`] builds the destination value with an ordinary
//!    struct literal, converting each field with [`FromScalar`], serde (for
//!    array-like fields) or [`FromObject`].
//!
//! Schemas are registered with [`impl_castable!`](crate::impl_castable).

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::error::{CastError, CastResult};
use crate::value::{ResultTree, Scalar, Value};

// ============================================================================
// SCHEMA
// ============================================================================

/// Declared shape of a destination field.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// A single scalar value.
    Scalar,
    /// A plain nested structure (maps, lists) deserialized with serde.
    Array,
    /// A nested castable type, described by its own schema.
    Object(fn() -> Schema),
}

impl Shape {
    /// Human readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Shape::Scalar => "a scalar".to_string(),
            Shape::Array => "an array-like value".to_string(),
            Shape::Object(schema) => format!("an object of type {}", schema().type_name),
        }
    }
}

/// One destination field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name on the destination type.
    pub name: &'static str,
    /// Declared shape.
    pub shape: Shape,
    /// Source key, when it differs from the field name.
    pub rename: Option<&'static str>,
}

impl FieldSpec {
    /// Key looked up in the source tree.
    pub fn source_key(&self) -> &'static str {
        self.rename.unwrap_or(self.name)
    }
}

/// Field layout of a destination type.
#[derive(Debug, Clone)]
pub struct Schema {
    pub type_name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// STRUCTURAL PASS
// ============================================================================

/// A field value produced by the structural pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Cast {
    Scalar(Scalar),
    Array(Json),
    Object(Record),
}

impl Cast {
    fn kind(&self) -> &'static str {
        match self {
            Cast::Scalar(s) => s.kind(),
            Cast::Array(_) => "array-like value",
            Cast::Object(_) => "object",
        }
    }
}

/// Fields of one destination value, ready for typed construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: &'static str,
    fields: Vec<(&'static str, Cast)>,
}

/// Cast `tree` against `schema`.
///
/// Fails with [`CastError::MappingMismatch`] when a source value cannot take
/// the declared shape: a subtree or list for a scalar field, a list or a
/// non-null scalar for an object field.
pub fn cast(tree: &ResultTree, schema: &Schema) -> CastResult<Record> {
    let mut fields = Vec::with_capacity(schema.fields.len());

    for spec in &schema.fields {
        let key = spec.source_key();
        let Some(value) = tree.get(key) else {
            continue;
        };

        let mismatch = || CastError::MappingMismatch {
            type_name: schema.type_name.to_string(),
            field: spec.name.to_string(),
            source_key: key.to_string(),
            expected: spec.shape.describe(),
            found: value.kind().to_string(),
        };

        let cast = match (spec.shape, value) {
            (Shape::Scalar, Value::Scalar(s)) => Cast::Scalar(s.clone()),
            (Shape::Scalar, _) => return Err(mismatch()),
            (Shape::Array, v) => Cast::Array(v.to_plain()),
            (Shape::Object(nested), Value::Tree(subtree)) => {
                Cast::Object(cast(subtree, &nested())?)
            }
            (Shape::Object(_), Value::Scalar(Scalar::Null)) => Cast::Scalar(Scalar::Null),
            (Shape::Object(_), _) => return Err(mismatch()),
        };
        fields.push((spec.name, cast));
    }

    Ok(Record {
        type_name: schema.type_name,
        fields,
    })
}

/// Cast a tree straight into `T`.
pub fn cast_into<T: Castable>(tree: &ResultTree) -> CastResult<T> {
    let record = cast(tree, &T::schema())?;
    T::from_record(record)
}

/// Cast every top-level member of `tree` into `T`, in document order.
///
/// Fails with [`CastError::NotAnObject`] on the first member that is not a tree.
pub fn cast_members<T: Castable>(tree: &ResultTree) -> CastResult<Vec<(String, T)>> {
    let mut members = Vec::with_capacity(tree.len());
    for (key, value) in tree.iter() {
        let Value::Tree(member) = value else {
            return Err(CastError::NotAnObject {
                key: key.to_string(),
            });
        };
        members.push((key.to_string(), cast_into(member)?));
    }
    Ok(members)
}

// ============================================================================
// TYPED CONSTRUCTION
// ============================================================================

/// Identifies the field being converted, for error reporting.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub type_name: &'a str,
    pub field: &'a str,
}

impl FieldContext<'_> {
    pub fn missing(&self) -> CastError {
        CastError::MissingField {
            type_name: self.type_name.to_string(),
            field: self.field.to_string(),
        }
    }

    pub fn invalid(&self, reason: impl Into<String>) -> CastError {
        CastError::TypeMismatch {
            type_name: self.type_name.to_string(),
            field: self.field.to_string(),
            reason: reason.into(),
        }
    }
}

impl Record {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Field value from the structural pass, if the source had one.
    pub fn get(&self, field: &str) -> Option<&Cast> {
        self.fields.iter().find(|(k, _)| *k == field).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn take(&mut self, field: &str) -> Option<Cast> {
        let idx = self.fields.iter().position(|(k, _)| *k == field)?;
        Some(self.fields.remove(idx).1)
    }

    fn context<'a>(&'a self, field: &'a str) -> FieldContext<'a> {
        FieldContext {
            type_name: self.type_name,
            field,
        }
    }

    /// Convert a scalar field.
    pub fn scalar<T: FromScalar>(&mut self, field: &str) -> CastResult<T> {
        let cast = self.take(field);
        let ctx = self.context(field);
        match cast {
            None => T::from_scalar(None, ctx),
            Some(Cast::Scalar(s)) => T::from_scalar(Some(s), ctx),
            Some(other) => Err(ctx.invalid(format!("expected a scalar, got {}", other.kind()))),
        }
    }

    /// Convert an array-like field by deserializing its plain form.
    ///
    /// An absent field deserializes from `null`, so `Option<_>` fields become
    /// `None` and required fields fail with [`CastError::MissingField`].
    pub fn array<T: DeserializeOwned>(&mut self, field: &str) -> CastResult<T> {
        let cast = self.take(field);
        let ctx = self.context(field);
        match cast {
            None => serde_json::from_value(Json::Null).map_err(|_| ctx.missing()),
            Some(Cast::Array(json)) => {
                serde_json::from_value(json).map_err(|e| ctx.invalid(e.to_string()))
            }
            Some(Cast::Scalar(s)) => {
                serde_json::from_value(s.to_json()).map_err(|e| ctx.invalid(e.to_string()))
            }
            Some(Cast::Object(_)) => Err(ctx.invalid("expected an array-like value, got object")),
        }
    }

    /// Convert a nested object field.
    pub fn object<T: FromObject>(&mut self, field: &str) -> CastResult<T> {
        let cast = self.take(field);
        T::from_object(cast, self.context(field))
    }
}

/// A destination type with a registered schema.
pub trait Castable: Sized {
    fn schema() -> Schema;

    fn from_record(record: Record) -> CastResult<Self>;
}

/// Field types that can be built from a nested object.
///
/// Implemented for every [`Castable`] type by [`impl_castable!`](crate::impl_castable),
/// and for `Option<T>` where absent or null becomes `None`.
pub trait FromObject: Sized {
    fn from_object(cast: Option<Cast>, ctx: FieldContext<'_>) -> CastResult<Self>;
}

/// Conversion used by [`impl_castable!`](crate::impl_castable) for required object fields.
pub fn required_object<T: Castable>(cast: Option<Cast>, ctx: FieldContext<'_>) -> CastResult<T> {
    match cast {
        Some(Cast::Object(record)) => T::from_record(record),
        None => Err(ctx.missing()),
        Some(other) => Err(ctx.invalid(format!("expected an object, got {}", other.kind()))),
    }
}

impl<T: Castable> FromObject for Option<T> {
    fn from_object(cast: Option<Cast>, ctx: FieldContext<'_>) -> CastResult<Self> {
        match cast {
            None | Some(Cast::Scalar(Scalar::Null)) => Ok(None),
            some => required_object(some, ctx).map(Some),
        }
    }
}

/// Field types that can be built from a scalar.
pub trait FromScalar: Sized {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self>;
}

fn present(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Scalar> {
    scalar.ok_or_else(|| ctx.missing())
}

impl<T: FromScalar> FromScalar for Option<T> {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        match scalar {
            None | Some(Scalar::Null) => Ok(None),
            some => T::from_scalar(some, ctx).map(Some),
        }
    }
}

impl FromScalar for Scalar {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        present(scalar, ctx)
    }
}

impl FromScalar for String {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        match present(scalar, ctx)? {
            Scalar::String(s) => Ok(s),
            other => Err(ctx.invalid(format!("expected a string, got {}", other.kind()))),
        }
    }
}

impl FromScalar for bool {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        match present(scalar, ctx)? {
            Scalar::Bool(b) => Ok(b),
            other => Err(ctx.invalid(format!("expected a boolean, got {}", other.kind()))),
        }
    }
}

macro_rules! integer_from_scalar {
    ($($int:ty),*) => {
        $(
            impl FromScalar for $int {
                fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
                    match present(scalar, ctx)? {
                        Scalar::Int(i) => <$int>::try_from(i).map_err(|_| {
                            ctx.invalid(format!("{} does not fit in {}", i, stringify!($int)))
                        }),
                        other => Err(ctx.invalid(format!(
                            "expected an integer, got {}",
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

integer_from_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromScalar for f64 {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        match present(scalar, ctx)? {
            Scalar::Float(f) => Ok(f),
            Scalar::Int(i) => Ok(i as f64),
            other => Err(ctx.invalid(format!("expected a number, got {}", other.kind()))),
        }
    }
}

impl FromScalar for f32 {
    fn from_scalar(scalar: Option<Scalar>, ctx: FieldContext<'_>) -> CastResult<Self> {
        f64::from_scalar(scalar, ctx).map(|f| f as f32)
    }
}
