//! Format identifiers, descriptors and the catalog that enumerates them.
//!
//! Sets only ever store plain [`FormatId`] integers. Anything that needs to know
//! what a format *is* (its media type, whether it is planar, whether it carries
//! alpha) asks a [`FormatCatalog`]. [`BuiltinCatalog`] covers the common pixel
//! and sample formats; callers with their own format tables implement the trait.

/// Identifier of a discrete format, or a plain sample rate in Hz.
pub type FormatId = i32;

/// Category of media carried by a pad or link.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Video frames described by pixel formats.
    Video,
    /// Audio frames described by sample formats, rates and channel layouts.
    Audio,
    /// Subtitle events.
    Subtitle,
    /// Opaque data streams.
    Data,
}

impl MediaType {
    /// Whether links of this type also negotiate sample rates and channel layouts.
    pub fn is_audio(self) -> bool {
        self == MediaType::Audio
    }
}

/// Pixel format flag: big-endian component storage.
pub const PIX_FLAG_BE: u32 = 1 << 0;
/// Pixel format flag: palettized.
pub const PIX_FLAG_PAL: u32 = 1 << 1;
/// Pixel format flag: components are packed bitwise.
pub const PIX_FLAG_BITSTREAM: u32 = 1 << 2;
/// Pixel format flag: opaque hardware surface.
pub const PIX_FLAG_HWACCEL: u32 = 1 << 3;
/// Pixel format flag: at least one component lives in its own plane.
pub const PIX_FLAG_PLANAR: u32 = 1 << 4;
/// Pixel format flag: RGB-like rather than YUV-like.
pub const PIX_FLAG_RGB: u32 = 1 << 5;
/// Pixel format flag: has an alpha channel.
pub const PIX_FLAG_ALPHA: u32 = 1 << 7;
/// Pixel format flag: components are floats.
pub const PIX_FLAG_FLOAT: u32 = 1 << 9;
/// Synthetic flag: software format, non-planar, with chroma sub-sampling.
///
/// Never stored in a descriptor; derived by [`PixelDescriptor::filter_flags`].
pub const PIX_FLAG_SW_FLAT_SUB: u32 = 1 << 24;

/// Layout properties of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDescriptor {
    /// Number of components (1 for gray, 3 for YUV/RGB, 4 with alpha).
    pub nb_components: u8,
    /// Horizontal chroma sub-sampling as a power of two.
    pub log2_chroma_w: u8,
    /// Vertical chroma sub-sampling as a power of two.
    pub log2_chroma_h: u8,
    /// `PIX_FLAG_*` bits.
    pub flags: u32,
}

impl PixelDescriptor {
    /// Whether the format has chroma information.
    pub fn has_chroma(&self) -> bool {
        self.nb_components > 1
    }

    /// Whether the format has an alpha channel.
    pub fn has_alpha(&self) -> bool {
        self.flags & PIX_FLAG_ALPHA != 0
    }

    /// Descriptor flags plus the synthetic [`PIX_FLAG_SW_FLAT_SUB`] when it applies.
    pub fn filter_flags(&self) -> u32 {
        let mut flags = self.flags;
        if self.flags & (PIX_FLAG_HWACCEL | PIX_FLAG_PLANAR) == 0
            && (self.log2_chroma_w != 0 || self.log2_chroma_h != 0)
        {
            flags |= PIX_FLAG_SW_FLAT_SUB;
        }
        flags
    }
}

/// Storage properties of an audio sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDescriptor {
    /// Size of one sample of one channel.
    pub bytes_per_sample: u8,
    /// Whether each channel lives in its own plane.
    pub planar: bool,
}

/// Pixel formats known to [`BuiltinCatalog`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PixelFormat {
    Yuv420p = 0,
    Yuyv422 = 1,
    Rgb24 = 2,
    Bgr24 = 3,
    Yuv422p = 4,
    Yuv444p = 5,
    Yuv410p = 6,
    Yuv411p = 7,
    Gray8 = 8,
    MonoWhite = 9,
    MonoBlack = 10,
    Pal8 = 11,
    Uyvy422 = 12,
    Nv12 = 13,
    Nv21 = 14,
    Argb = 15,
    Rgba = 16,
    Abgr = 17,
    Bgra = 18,
    Gray16be = 19,
    Yuva420p = 20,
    Yuva444p = 21,
    Rgb48be = 22,
    Gbrp = 23,
    Gbrap = 24,
    Grayf32le = 25,
    Vaapi = 26,
    Cuda = 27,
}

impl PixelFormat {
    /// Every builtin pixel format in identifier order.
    pub const ALL: [PixelFormat; 28] = [
        PixelFormat::Yuv420p,
        PixelFormat::Yuyv422,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Yuv422p,
        PixelFormat::Yuv444p,
        PixelFormat::Yuv410p,
        PixelFormat::Yuv411p,
        PixelFormat::Gray8,
        PixelFormat::MonoWhite,
        PixelFormat::MonoBlack,
        PixelFormat::Pal8,
        PixelFormat::Uyvy422,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Argb,
        PixelFormat::Rgba,
        PixelFormat::Abgr,
        PixelFormat::Bgra,
        PixelFormat::Gray16be,
        PixelFormat::Yuva420p,
        PixelFormat::Yuva444p,
        PixelFormat::Rgb48be,
        PixelFormat::Gbrp,
        PixelFormat::Gbrap,
        PixelFormat::Grayf32le,
        PixelFormat::Vaapi,
        PixelFormat::Cuda,
    ];

    /// The identifier stored in format sets.
    pub fn id(self) -> FormatId {
        self as FormatId
    }

    /// Look up a builtin pixel format by identifier.
    pub fn from_id(id: FormatId) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Layout description of this format.
    pub fn descriptor(self) -> PixelDescriptor {
        use PixelFormat::*;
        let (nb_components, log2_chroma_w, log2_chroma_h, flags) = match self {
            Yuv420p => (3, 1, 1, PIX_FLAG_PLANAR),
            Yuyv422 | Uyvy422 => (3, 1, 0, 0),
            Rgb24 | Bgr24 => (3, 0, 0, PIX_FLAG_RGB),
            Yuv422p => (3, 1, 0, PIX_FLAG_PLANAR),
            Yuv444p => (3, 0, 0, PIX_FLAG_PLANAR),
            Yuv410p => (3, 2, 2, PIX_FLAG_PLANAR),
            Yuv411p => (3, 2, 0, PIX_FLAG_PLANAR),
            Gray8 => (1, 0, 0, 0),
            MonoWhite | MonoBlack => (1, 0, 0, PIX_FLAG_BITSTREAM),
            Pal8 => (1, 0, 0, PIX_FLAG_PAL),
            Nv12 | Nv21 => (3, 1, 1, PIX_FLAG_PLANAR),
            Argb | Rgba | Abgr | Bgra => (4, 0, 0, PIX_FLAG_RGB | PIX_FLAG_ALPHA),
            Gray16be => (1, 0, 0, PIX_FLAG_BE),
            Yuva420p => (4, 1, 1, PIX_FLAG_PLANAR | PIX_FLAG_ALPHA),
            Yuva444p => (4, 0, 0, PIX_FLAG_PLANAR | PIX_FLAG_ALPHA),
            Rgb48be => (3, 0, 0, PIX_FLAG_RGB | PIX_FLAG_BE),
            Gbrp => (3, 0, 0, PIX_FLAG_RGB | PIX_FLAG_PLANAR),
            Gbrap => (4, 0, 0, PIX_FLAG_RGB | PIX_FLAG_PLANAR | PIX_FLAG_ALPHA),
            Grayf32le => (1, 0, 0, PIX_FLAG_FLOAT),
            Vaapi | Cuda => (0, 1, 1, PIX_FLAG_HWACCEL),
        };
        PixelDescriptor {
            nb_components,
            log2_chroma_w,
            log2_chroma_h,
            flags,
        }
    }
}

/// Audio sample formats known to [`BuiltinCatalog`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SampleFormat {
    U8 = 0,
    S16 = 1,
    S32 = 2,
    Flt = 3,
    Dbl = 4,
    U8p = 5,
    S16p = 6,
    S32p = 7,
    Fltp = 8,
    Dblp = 9,
    S64 = 10,
    S64p = 11,
}

impl SampleFormat {
    /// Every builtin sample format in identifier order.
    pub const ALL: [SampleFormat; 12] = [
        SampleFormat::U8,
        SampleFormat::S16,
        SampleFormat::S32,
        SampleFormat::Flt,
        SampleFormat::Dbl,
        SampleFormat::U8p,
        SampleFormat::S16p,
        SampleFormat::S32p,
        SampleFormat::Fltp,
        SampleFormat::Dblp,
        SampleFormat::S64,
        SampleFormat::S64p,
    ];

    /// The identifier stored in format sets.
    pub fn id(self) -> FormatId {
        self as FormatId
    }

    /// Look up a builtin sample format by identifier.
    pub fn from_id(id: FormatId) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Storage description of this format.
    pub fn descriptor(self) -> SampleDescriptor {
        use SampleFormat::*;
        let (bytes_per_sample, planar) = match self {
            U8 => (1, false),
            S16 => (2, false),
            S32 | Flt => (4, false),
            Dbl | S64 => (8, false),
            U8p => (1, true),
            S16p => (2, true),
            S32p | Fltp => (4, true),
            Dblp | S64p => (8, true),
        };
        SampleDescriptor {
            bytes_per_sample,
            planar,
        }
    }
}

/// Source of format enumeration and classification.
pub trait FormatCatalog {
    /// Every format identifier registered for `media`, in catalog order.
    fn formats(&self, media: MediaType) -> Vec<FormatId>;

    /// Descriptor of a pixel format, or `None` if unknown.
    fn pixel_descriptor(&self, fmt: FormatId) -> Option<PixelDescriptor>;

    /// Descriptor of a sample format, or `None` if unknown.
    fn sample_descriptor(&self, fmt: FormatId) -> Option<SampleDescriptor>;
}

/// Catalog backed by [`PixelFormat`] and [`SampleFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl FormatCatalog for BuiltinCatalog {
    fn formats(&self, media: MediaType) -> Vec<FormatId> {
        match media {
            MediaType::Video => PixelFormat::ALL.iter().map(|f| f.id()).collect(),
            MediaType::Audio => SampleFormat::ALL.iter().map(|f| f.id()).collect(),
            MediaType::Subtitle | MediaType::Data => Vec::new(),
        }
    }

    fn pixel_descriptor(&self, fmt: FormatId) -> Option<PixelDescriptor> {
        PixelFormat::from_id(fmt).map(PixelFormat::descriptor)
    }

    fn sample_descriptor(&self, fmt: FormatId) -> Option<SampleDescriptor> {
        SampleFormat::from_id(fmt).map(SampleFormat::descriptor)
    }
}
