//! Pixel and element formats.

/// Format of texture texels, typed buffer elements and vertex attributes.
///
/// `Unknown` is only meaningful in view requests, where it means "use the
/// resource's own format".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Format {
    #[default]
    Unknown,

    // 8-bit formats
    R8Uint,
    R8Unorm,

    // 16-bit formats
    R16Uint,
    R16Unorm,
    R16Float,
    Rg8Unorm,

    // 32-bit formats
    R32Uint,
    R32Sint,
    R32Float,
    Rg16Float,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    // 64-bit formats
    Rg32Float,
    Rgba16Float,

    // 96/128-bit formats
    Rgb32Float,
    Rgba32Uint,
    Rgba32Float,

    // Depth/stencil formats
    Depth16Unorm,
    Depth24UnormStencil8,
    Depth32Float,
    Depth32FloatStencil8,
}

impl Format {
    /// Check if this format has a depth component.
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24UnormStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Check if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24UnormStencil8 | Self::Depth32FloatStencil8)
    }

    /// Size of one texel or element in bytes. Zero for `Unknown`.
    pub fn bytes_per_block(&self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Uint | Self::R8Unorm => 1,
            Self::R16Uint
            | Self::R16Unorm
            | Self::R16Float
            | Self::Rg8Unorm
            | Self::Depth16Unorm => 2,
            Self::R32Uint
            | Self::R32Sint
            | Self::R32Float
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24UnormStencil8
            | Self::Depth32Float => 4,
            Self::Rg32Float | Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Uint | Self::Rgba32Float => 16,
        }
    }

    /// Resolve `Unknown` to a fallback format.
    pub fn or(self, fallback: Format) -> Format {
        if self == Self::Unknown { fallback } else { self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(Format::Depth32Float.is_depth());
        assert!(!Format::Depth32Float.has_stencil());
        assert!(Format::Depth24UnormStencil8.has_stencil());
        assert!(!Format::Rgba8Unorm.is_depth());
    }

    #[test]
    fn test_bytes_per_block() {
        assert_eq!(Format::R8Unorm.bytes_per_block(), 1);
        assert_eq!(Format::Rgba8Unorm.bytes_per_block(), 4);
        assert_eq!(Format::Rgb32Float.bytes_per_block(), 12);
        assert_eq!(Format::Rgba32Float.bytes_per_block(), 16);
    }

    #[test]
    fn test_unknown_resolves_to_fallback() {
        assert_eq!(Format::Unknown.or(Format::R32Float), Format::R32Float);
        assert_eq!(Format::R32Uint.or(Format::R32Float), Format::R32Uint);
    }
}
