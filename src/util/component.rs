//! Component and element types - the fixed numeric vocabulary of accessors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric type of a single accessor component.
///
/// The discriminants are the GL enum values stored in the JSON
/// `componentType` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum ComponentType {
    /// Signed 8-bit integer
    Byte = 5120,
    /// Unsigned 8-bit integer
    UnsignedByte = 5121,
    /// Signed 16-bit integer
    Short = 5122,
    /// Unsigned 16-bit integer
    UnsignedShort = 5123,
    /// Unsigned 32-bit integer
    UnsignedInt = 5125,
    /// 32-bit IEEE float
    Float = 5126,
}

impl ComponentType {
    /// Returns the size in bytes of a single component.
    #[inline]
    pub const fn num_bytes(self) -> usize {
        match self {
            Self::Byte | Self::UnsignedByte => 1,
            Self::Short | Self::UnsignedShort => 2,
            Self::UnsignedInt | Self::Float => 4,
        }
    }

    /// Returns true for the types allowed as sparse or primitive indices.
    #[inline]
    pub const fn is_unsigned_integer(self) -> bool {
        matches!(self, Self::UnsignedByte | Self::UnsignedShort | Self::UnsignedInt)
    }

    /// Returns the name of this type as a string.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Byte => "i8",
            Self::UnsignedByte => "u8",
            Self::Short => "i16",
            Self::UnsignedShort => "u16",
            Self::UnsignedInt => "u32",
            Self::Float => "f32",
        }
    }

    /// Convert from the GL enum value.
    pub const fn from_gl(value: u32) -> Option<Self> {
        match value {
            5120 => Some(Self::Byte),
            5121 => Some(Self::UnsignedByte),
            5122 => Some(Self::Short),
            5123 => Some(Self::UnsignedShort),
            5125 => Some(Self::UnsignedInt),
            5126 => Some(Self::Float),
            _ => None,
        }
    }
}

impl TryFrom<u32> for ComponentType {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        Self::from_gl(value).ok_or_else(|| format!("unknown componentType {value}"))
    }
}

impl From<ComponentType> for u32 {
    fn from(value: ComponentType) -> Self {
        value as u32
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of an accessor element (the JSON `type` field).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessorType {
    #[serde(rename = "SCALAR")]
    Scalar,
    #[serde(rename = "VEC2")]
    Vec2,
    #[serde(rename = "VEC3")]
    Vec3,
    #[serde(rename = "VEC4")]
    Vec4,
    #[serde(rename = "MAT2")]
    Mat2,
    #[serde(rename = "MAT3")]
    Mat3,
    #[serde(rename = "MAT4")]
    Mat4,
}

impl AccessorType {
    /// Number of components per element.
    #[inline]
    pub const fn component_count(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    /// JSON spelling of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "SCALAR",
            Self::Vec2 => "VEC2",
            Self::Vec3 => "VEC3",
            Self::Vec4 => "VEC4",
            Self::Mat2 => "MAT2",
            Self::Mat3 => "MAT3",
            Self::Mat4 => "MAT4",
        }
    }
}

/// ElementLayout describes how one accessor element is stored.
///
/// It combines a [`ComponentType`] with an [`AccessorType`].
/// For example, a `VEC3` of `FLOAT` is 12 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementLayout {
    pub component_type: ComponentType,
    pub accessor_type: AccessorType,
}

impl ElementLayout {
    #[inline]
    pub const fn new(component_type: ComponentType, accessor_type: AccessorType) -> Self {
        Self { component_type, accessor_type }
    }

    /// Number of components per element.
    #[inline]
    pub const fn component_count(&self) -> usize {
        self.accessor_type.component_count()
    }

    /// Total size in bytes of one tightly packed element.
    #[inline]
    pub const fn num_bytes(&self) -> usize {
        self.component_type.num_bytes() * self.accessor_type.component_count()
    }

    pub const VEC3F: Self = Self::new(ComponentType::Float, AccessorType::Vec3);
    pub const VEC2F: Self = Self::new(ComponentType::Float, AccessorType::Vec2);
    pub const INDEX_U16: Self = Self::new(ComponentType::UnsignedShort, AccessorType::Scalar);
    pub const INDEX_U32: Self = Self::new(ComponentType::UnsignedInt, AccessorType::Scalar);
}

impl fmt::Debug for ElementLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.component_count() == 1 {
            write!(f, "{}", self.component_type)
        } else {
            write!(f, "{}[{}]", self.component_type, self.component_count())
        }
    }
}

impl fmt::Display for ElementLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
