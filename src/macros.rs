/// Declares a `u32`-backed native enumeration with lossless conversion in both directions.
///
/// Generates `from_u32`, `as_u32`, `name`, `Display` and `From<$name> for Variant`
/// (as a `UInt32` variant, which is how the collector stores these values).
macro_rules! native_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_u32(self) -> u32 {
                match self {
                    $($name::$variant => $value,)+
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl From<$name> for $crate::variant::Variant {
            fn from(value: $name) -> Self {
                $crate::variant::Variant::UInt32(value.as_u32())
            }
        }
    };
}
