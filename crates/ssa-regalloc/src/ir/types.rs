//! Value types.

use core::fmt;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// The type of the value produced by an instruction.
///
/// The allocator only cares about the register class a type belongs to, whether it is a
/// reference the garbage collector must see, and how many slots it occupies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// No value.
    #[default]
    Void,
    /// 32-bit integer. Booleans, bytes and shorts are widened to this.
    Int32,
    /// 64-bit integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Managed object reference.
    Reference,
}

impl Type {
    /// Is this a floating point type, allocated from the FP register class?
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Does a spilled value of this type take two consecutive stack slots?
    pub fn is_wide(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    /// Is this a reference tracked at safepoints?
    pub fn is_reference(self) -> bool {
        self == Self::Reference
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Void => "void",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Reference => "ref",
        })
    }
}
