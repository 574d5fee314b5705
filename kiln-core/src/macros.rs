//! Schema registration for castable types.

/// Register a struct as a cast destination.
///
/// Every field of the struct is listed with its shape:
///
/// - `scalar`: converted with [`FromScalar`](crate::cast::FromScalar)
/// - `array`: flattened to plain JSON and deserialized with serde
/// - `object(Type)`: cast recursively with `Type`'s schema; the field may be
///   `Type` or `Option<Type>`
///
/// A trailing `from "key"` reads the field from a differently named source key.
///
/// ```
/// use kiln_core::{impl_castable, ResultTree};
///
/// struct Address {
///     city: String,
/// }
///
/// impl_castable!(Address { city: scalar });
///
/// struct User {
///     id: i64,
///     name_of_user: String,
///     address: Option<Address>,
///     tags: Vec<String>,
/// }
///
/// impl_castable!(User {
///     id: scalar,
///     name_of_user: scalar from "name",
///     address: object(Address),
///     tags: array,
/// });
///
/// let tree = ResultTree::parse(
///     r#"{"id": 1, "name": "a", "address": {"city": "Springfield"}, "tags": ["x"]}"#,
/// )
/// .unwrap();
/// let user: User = tree.cast().unwrap();
/// assert_eq!(user.name_of_user, "a");
/// assert_eq!(user.address.map(|a| a.city).as_deref(), Some("Springfield"));
/// ```
#[macro_export]
macro_rules! impl_castable {
    (@shape scalar) => {
        $crate::cast::Shape::Scalar
    };
    (@shape array) => {
        $crate::cast::Shape::Array
    };
    (@shape object $nested:ty) => {
        $crate::cast::Shape::Object(<$nested as $crate::cast::Castable>::schema)
    };
    (@rename) => {
        ::core::option::Option::None
    };
    (@rename $source:literal) => {
        ::core::option::Option::Some($source)
    };
    (
        $type:ident {
            $( $field:ident : $shape:ident $( ( $nested:ty ) )? $( from $source:literal )? ),* $(,)?
        }
    ) => {
        impl $crate::cast::Castable for $type {
            fn schema() -> $crate::cast::Schema {
                $crate::cast::Schema {
                    type_name: stringify!($type),
                    fields: vec![
                        $(
                            $crate::cast::FieldSpec {
                                name: stringify!($field),
                                shape: $crate::impl_castable!(@shape $shape $( $nested )?),
                                rename: $crate::impl_castable!(@rename $( $source )?),
                            },
                        )*
                    ],
                }
            }

            #[allow(unused_mut)]
            fn from_record(
                mut record: $crate::cast::Record,
            ) -> $crate::error::CastResult<Self> {
                Ok(Self {
                    $( $field: record.$shape(stringify!($field))?, )*
                })
            }
        }

        impl $crate::cast::FromObject for $type {
            fn from_object(
                cast: ::core::option::Option<$crate::cast::Cast>,
                ctx: $crate::cast::FieldContext<'_>,
            ) -> $crate::error::CastResult<Self> {
                $crate::cast::required_object(cast, ctx)
            }
        }
    };
}
