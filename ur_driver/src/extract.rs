//! Typed access to cyclic-exchange values.
//!
//! Every field of a negotiated recipe carries one [`RtdeValue`](crate::rtde::RtdeValue)
//! variant. [`ExtractValue`] lets callers pull the native Rust type out of it
//! without matching on the variant by hand.
//!
//! ```
//! use ur_driver::ExtractValue;
//! use ur_driver::rtde::RtdeValue;
//!
//! let value = RtdeValue::Double(0.25);
//! let speed: Option<&f64> = value.as_value();
//! assert_eq!(speed, Some(&0.25));
//! ```

/// Extracts the inner value of one variant.
pub trait ExtractValue<T> {
    /// Borrow the inner value if the variant matches `T`.
    fn as_value(&self) -> Option<&T>;

    /// Take the inner value if the variant matches `T`.
    fn into_value(self) -> Option<T>;
}

/// Implements [`ExtractValue`] and `From` for one value variant.
///
/// ```ignore
/// impl_extract_value!(RtdeValue, Double, f64);
/// ```
#[macro_export]
macro_rules! impl_extract_value {
    ($enum:ty, $variant:ident, $inner:ty) => {
        impl $crate::ExtractValue<$inner> for $enum {
            #[inline]
            fn as_value(&self) -> Option<&$inner> {
                match self {
                    Self::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            #[inline]
            fn into_value(self) -> Option<$inner> {
                match self {
                    Self::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$inner> for $enum {
            #[inline]
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    };
}
