//! Declarative registration macros.
//!
//! ```ignore
//! #[derive(Default)]
//! struct Light { base: Component, color: Color, range: f32 }
//!
//! reflect_class!(Light: Component => base { color: Color, range: f32 });
//! ```

/// Implements [`Reflected`](crate::Reflected) for a struct.
///
/// Lists the reflected fields in declaration order. An optional `: Base => field` clause names
/// the embedded base class value.
#[macro_export]
macro_rules! reflect_class {
    ($class:ident $(: $base:ty => $base_field:ident)? { $($field:ident : $field_ty:ty),* $(,)? }) => {
        impl $crate::Reflected for $class {
            fn build_descriptor(_registry: &$crate::TypeRegistry) -> $crate::TypeBuild {
                #[allow(unused_variables)]
                fn init(
                    registry: &$crate::TypeRegistry,
                    owner: $crate::DescriptorId,
                ) -> $crate::ClassBody {
                    let fields: ::std::vec::Vec<$crate::FieldDescriptor> = ::std::vec![
                        $({
                            fn get(object: &$class) -> &$field_ty {
                                &object.$field
                            }
                            fn get_mut(object: &mut $class) -> &mut $field_ty {
                                &mut object.$field
                            }
                            $crate::FieldDescriptor::new::<$class, $field_ty>(
                                registry,
                                owner,
                                stringify!($field),
                                get,
                                get_mut,
                            )
                        }),*
                    ];
                    let base: ::std::option::Option<$crate::BaseLink> = None $(.or(Some({
                        fn get(object: &$class) -> &$base {
                            &object.$base_field
                        }
                        fn get_mut(object: &mut $class) -> &mut $base {
                            &mut object.$base_field
                        }
                        $crate::BaseLink::new::<$class, $base>(registry, get, get_mut)
                    })))?;
                    $crate::ClassBody {
                        fields,
                        base,
                        ctor: Some($crate::construct_boxed::<$class>),
                    }
                }

                $crate::TypeBuild::Class {
                    name: stringify!($class).to_owned(),
                    init,
                }
            }
        }
    };
}

/// Implements [`Reflected`](crate::Reflected) for a fieldless `Copy` enum.
///
/// `$repr` must match the enum's `#[repr]`; archives store values at exactly that width.
#[macro_export]
macro_rules! reflect_enum {
    ($enum_ty:ident : $repr:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::Reflected for $enum_ty {
            fn build_descriptor(_registry: &$crate::TypeRegistry) -> $crate::TypeBuild {
                #[allow(clippy::cast_lossless)]
                fn get(value: &dyn ::std::any::Any) -> ::std::option::Option<i64> {
                    value.downcast_ref::<$enum_ty>().map(|value| *value as i64)
                }

                fn set(value: &mut dyn ::std::any::Any, raw: i64) -> bool {
                    let Some(slot) = value.downcast_mut::<$enum_ty>() else {
                        return false;
                    };
                    $(
                        if raw == $enum_ty::$variant as i64 {
                            *slot = $enum_ty::$variant;
                            return true;
                        }
                    )+
                    false
                }

                $crate::TypeBuild::Ready {
                    name: stringify!($enum_ty).to_owned(),
                    kind: $crate::TypeKind::Enum($crate::EnumDescriptor {
                        entries: ::std::vec![$($crate::EnumEntry {
                            name: stringify!($variant),
                            value: $enum_ty::$variant as i64,
                        }),+],
                        storage: <$repr as $crate::EnumRepr>::STORAGE,
                        is_flags: false,
                        get,
                        set,
                    }),
                }
            }
        }
    };
}

/// Implements [`Reflected`](crate::Reflected) for a bit-flag newtype.
///
/// The listed associated constants are the known bits; any combination of them is valid.
#[macro_export]
macro_rules! reflect_flags {
    ($flags_ty:ident : $repr:ty { $($flag:ident),+ $(,)? }) => {
        impl $crate::Reflected for $flags_ty {
            fn build_descriptor(_registry: &$crate::TypeRegistry) -> $crate::TypeBuild {
                #[allow(clippy::cast_possible_wrap, clippy::cast_lossless)]
                fn get(value: &dyn ::std::any::Any) -> ::std::option::Option<i64> {
                    value.downcast_ref::<$flags_ty>().map(|value| value.0 as i64)
                }

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                fn set(value: &mut dyn ::std::any::Any, raw: i64) -> bool {
                    match value.downcast_mut::<$flags_ty>() {
                        Some(slot) => {
                            slot.0 = raw as $repr;
                            true
                        }
                        None => false,
                    }
                }

                #[allow(clippy::cast_possible_wrap, clippy::cast_lossless)]
                let entries = ::std::vec![$($crate::EnumEntry {
                    name: stringify!($flag),
                    value: $flags_ty::$flag.0 as i64,
                }),+];

                $crate::TypeBuild::Ready {
                    name: stringify!($flags_ty).to_owned(),
                    kind: $crate::TypeKind::Enum($crate::EnumDescriptor {
                        entries,
                        storage: <$repr as $crate::EnumRepr>::STORAGE,
                        is_flags: true,
                        get,
                        set,
                    }),
                }
            }
        }
    };
}
