//! Null-aware configuration merge
//!
//! Every config shape implements [`Merge`] field by field:
//! - Present overlay value (including `""`): replaces the base value
//! - Absent overlay value: base value is kept
//! - Nested config objects: merged recursively with the same rule
//! - Arrays: replaced as a whole, never concatenated

/// Field-level merge of two values of the same config shape.
pub trait Merge: Sized {
    /// Apply `overlay` as a sparse patch on top of `self`.
    fn merge_from(self, overlay: Self) -> Self;
}

impl<T: Merge> Merge for Box<T> {
    fn merge_from(self, overlay: Self) -> Self {
        Box::new((*self).merge_from(*overlay))
    }
}

/// Merge an optional overlay into a base.
///
/// A missing overlay returns `base` itself, untouched.
pub fn merge<T: Merge>(base: T, overlay: Option<T>) -> T {
    match overlay {
        Some(overlay) => base.merge_from(overlay),
        None => base,
    }
}

/// Merge rule for a leaf field.
pub fn merge_field<T>(base: Option<T>, overlay: Option<T>) -> Option<T> {
    overlay.or(base)
}

/// Merge rule for a nested config object.
pub fn merge_nested<T: Merge>(base: Option<T>, overlay: Option<T>) -> Option<T> {
    match (base, overlay) {
        (Some(base), Some(overlay)) => Some(base.merge_from(overlay)),
        (base, overlay) => overlay.or(base),
    }
}

/// Fold layers in precedence order (first is lowest).
pub fn merge_layers<T: Merge>(base: T, layers: impl IntoIterator<Item = T>) -> T {
    layers.into_iter().fold(base, Merge::merge_from)
}

/// Generate a [`Merge`] impl listing every leaf and nested field once.
macro_rules! impl_merge {
    ($ty:ident { $($field:ident),* $(,)? } $(nested { $($nested:ident),* $(,)? })?) => {
        impl $crate::config::Merge for $ty {
            fn merge_from(self, overlay: Self) -> Self {
                Self {
                    $($field: $crate::config::merge_field(self.$field, overlay.$field),)*
                    $($($nested: $crate::config::merge_nested(self.$nested, overlay.$nested),)*)?
                }
            }
        }
    };
}

pub(crate) use impl_merge;
