//! Definitions for the SFrame format version 2.
//!
//! The SFrame specification is available at
//! <https://sourceware.org/binutils/docs-2.41/sframe-spec.html>.

use core::fmt;

use c_enum::c_enum;
use zerocopy::{AsBytes, ByteOrder, FromBytes, FromZeroes, Unaligned, I32, U16, U32};

use super::Preamble;

/// The header is the first part of an SFrame section.
///
/// It contains things that apply to the section as a whole and offsets to the
/// various other sub-sections defined in the format.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct Header<O: ByteOrder> {
    /// The preamble for the format.
    pub preamble: Preamble<O>,

    /// The ABI/arch identifier.
    pub abi_arch: Abi,

    /// The CFA fixed FP offset, if any.
    pub fixed_fp_offset: i8,

    /// The CFA fixed RA offset, if any.
    pub fixed_ra_offset: i8,

    /// The size of the auxiliary header that follows the [`Header`], in bytes.
    pub auxhdr_len: u8,

    /// The number of SFrame FDEs in the section.
    pub num_fdes: U32<O>,

    /// The number of SFrame FREs in the section.
    pub num_fres: U32<O>,

    /// The length in bytes of the SFrame FRE sub-section.
    pub fre_len: U32<O>,

    /// The offset in bytes of the SFrame FDE sub-section.
    ///
    /// This sub-section contains `num_fdes` number of fixed-length array
    /// elements.
    pub fdeoff: U32<O>,

    /// The offset in bytes of the SFrame FRE sub-section, which describes the
    /// stack-trace information using variable-length array elements.
    pub freoff: U32<O>,
}

c_enum! {
    /// The ABI/arch of the target system for which the stack trace information
    /// contained in the SFrame section is intended.
    ///
    /// The identifier also fixes the byte order of the whole section.
    #[repr(transparent)]
    #[derive(Copy, Clone, Default, Eq, PartialEq, Hash, AsBytes, FromBytes, FromZeroes, Unaligned)]
    pub enum Abi: u8 {
        INVALID = 0,
        AARCH64_ENDIAN_BIG = 1,
        AARCH64_ENDIAN_LITTLE = 2,
        AMD64_ENDIAN_LITTLE = 3,
        S390X_ENDIAN_BIG = 4,
    }
}

/// A single function descriptor entry.
///
/// The SFrame FDE sub-section is a sorted list of this struct. Each FDE
/// contains information to describe a function's stack trace information at a
/// high level.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct FuncDescEntry<O: ByteOrder> {
    /// The virtual memory address of the described function.
    pub start_address: I32<O>,

    /// The size of the function in bytes.
    pub size: U32<O>,

    /// The offset in bytes of the function's first SFrame FRE, relative to
    /// the start of the FRE sub-section.
    pub start_fre_off: U32<O>,

    /// The total number of FREs used for the function.
    pub num_fres: U32<O>,

    /// The FDE info word.
    pub info: FdeInfo,

    /// The size of the repetitive code block for which a
    /// [`FdeType::PcMask`] FDE is used.
    pub rep_size: u8,

    // Extra padding for future fields.
    #[doc(hidden)]
    pub _padding2: U16<O>,
}

/// The packed `func_info` byte of a FDE.
///
/// ```text
///  7   6   5   4   3   2   1   0
/// +-------+---+---+---------------+
/// | unused| K | T |   FRE type    |
/// +-------+---+---+---------------+
/// ```
///
/// `K` is the aarch64 pointer authentication key and `T` the [`FdeType`].
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, AsBytes, FromBytes, FromZeroes, Unaligned,
)]
pub struct FdeInfo(pub u8);

impl FdeInfo {
    pub fn new(fretype: FreType, fdetype: FdeType) -> Self {
        let mut info = Self::default();
        info.set_fretype(fretype);
        info.set_fdetype(fdetype);
        info
    }

    /// The width of the FRE start addresses of this function.
    ///
    /// Returns `None` for the reserved encodings.
    pub fn fretype(&self) -> Option<FreType> {
        match self.0 & 0xF {
            0 => Some(FreType::Addr1),
            1 => Some(FreType::Addr2),
            2 => Some(FreType::Addr4),
            _ => None,
        }
    }

    pub fn set_fretype(&mut self, fretype: FreType) {
        self.0 &= !0xF;
        self.0 |= fretype as u8;
    }

    pub fn fdetype(&self) -> FdeType {
        match (self.0 >> 4) & 1 {
            0 => FdeType::PcInc,
            _ => FdeType::PcMask,
        }
    }

    pub fn set_fdetype(&mut self, fdetype: FdeType) {
        self.0 &= !(1 << 4);
        self.0 |= (fdetype as u8) << 4;
    }

    /// Specifies which key is used for signing the return addresses in the FDE.
    pub fn pauth_key(&self) -> Aarch64PauthKey {
        match (self.0 >> 5) & 1 {
            0 => Aarch64PauthKey::A,
            _ => Aarch64PauthKey::B,
        }
    }

    pub fn set_pauth_key(&mut self, pauth_key: Aarch64PauthKey) {
        self.0 &= !(1 << 5);
        self.0 |= (pauth_key as u8) << 5;
    }
}

/// Specifies which key is used for signing the return addresses in the SFrame
/// FDE.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Aarch64PauthKey {
    A = 0,
    B = 1,
}

/// The type of which FDE type to use.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FdeType {
    /// Unwinders perform (`PC >= FRE_START_ADDR`) to look up a matching FRE.
    PcInc = 0,

    /// Unwinders perform (`PC % REP_BLOCK_SIZE >= FRE_START_ADDR`) to look up a
    /// matching FRE.
    ///
    /// `REP_BLOCK_SIZE` is the size in bytes of the repeating block of program
    /// instructions.
    PcMask = 1,
}

/// The types of FRE entries used to represent the stack trace information.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FreType {
    /// The start address offset (in bytes) of the FRE is an unsigned 8-bit
    /// value.
    Addr1 = 0,

    /// The start address offset (in bytes) of the FRE is an unsigned 16-bit
    /// value.
    Addr2 = 1,

    /// The start address offset (in bytes) of the FRE is an unsigned 32-bit
    /// value.
    Addr4 = 2,
}

impl FreType {
    /// Pick the narrowest FRE type able to address every byte of a function
    /// of `size` bytes.
    pub fn for_function_size(size: u32) -> Self {
        match size {
            0..=0xFF => Self::Addr1,
            0x100..=0xFFFF => Self::Addr2,
            _ => Self::Addr4,
        }
    }

    /// The number of bytes used to store the start address of a FRE.
    pub fn addr_size(self) -> usize {
        match self {
            Self::Addr1 => 1,
            Self::Addr2 => 2,
            Self::Addr4 => 4,
        }
    }

    /// The largest start address offset representable with this type.
    pub fn max_start_address(self) -> u32 {
        match self {
            Self::Addr1 => u8::MAX as u32,
            Self::Addr2 => u16::MAX as u32,
            Self::Addr4 => u32::MAX,
        }
    }
}

/// The fixed part of a FRE: the start address followed by the info byte.
///
/// `T` is one of `u8`, `U16<O>` or `U32<O>` depending on the [`FreType`] of
/// the owning function. The stack offsets follow immediately afterwards.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct FrameRowEntry<T> {
    pub start_address: T,
    pub info: FreInfo,
}

/// The packed `info` byte of a FRE.
///
/// ```text
///  7   6   5   4   3   2   1   0
/// +---+-------+---------------+---+
/// | M | size  |     count     | B |
/// +---+-------+---------------+---+
/// ```
///
/// `M` marks a mangled return address and `B` the CFA base register.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, AsBytes, FromBytes, FromZeroes, Unaligned)]
pub struct FreInfo(pub u8);

impl FreInfo {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn from_parts(base_reg: FreBaseRegId, offset_count: u8, offset_size: FreOffset) -> Self {
        let mut info = Self::new();
        info.set_cfa_base_reg_id(base_reg);
        info.set_offset_count(offset_count);
        info.set_offset_size(offset_size);
        info
    }

    /// Distinguish between SP or FP based CFA recovery.
    pub fn cfa_base_reg_id(&self) -> FreBaseRegId {
        match self.0 & 1 {
            0 => FreBaseRegId::Fp,
            _ => FreBaseRegId::Sp,
        }
    }

    pub fn set_cfa_base_reg_id(&mut self, value: FreBaseRegId) {
        self.0 &= 0b11111110;
        self.0 |= value as u8;
    }

    /// A value of up to 3 is allowed to track all three of CFA, FP, and RA.
    pub fn offset_count(&self) -> u8 {
        (self.0 >> 1) & 0b1111
    }

    pub fn set_offset_count(&mut self, count: u8) {
        assert!(count <= 0b1111);

        self.0 &= 0b11100001;
        self.0 |= (count << 1) & 0b00011110;
    }

    /// The size of the following stack offsets in bytes.
    ///
    /// Returns `None` for the reserved encoding.
    pub fn offset_size(&self) -> Option<FreOffset> {
        match (self.0 >> 5) & 0b11 {
            0 => Some(FreOffset::_1B),
            1 => Some(FreOffset::_2B),
            2 => Some(FreOffset::_4B),
            _ => None,
        }
    }

    pub fn set_offset_size(&mut self, size: FreOffset) {
        self.0 &= 0b10011111;
        self.0 |= ((size as u8) << 5) & 0b01100000;
    }

    /// Indicates whether the return address is mangled with any authorization
    /// bits (signed RA).
    pub fn mangled_ra_p(&self) -> bool {
        (self.0 >> 7) & 1 != 0
    }

    pub fn set_mangled_ra_p(&mut self, value: bool) {
        self.0 &= 0b01111111;
        self.0 |= u8::from(value) << 7;
    }
}

impl fmt::Debug for FreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreInfo")
            .field("cfa_base_reg_id", &self.cfa_base_reg_id())
            .field("offset_count", &self.offset_count())
            .field("offset_size", &self.offset_size())
            .field("mangled_ra_p", &self.mangled_ra_p())
            .finish()
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FreOffset {
    _1B = 0,
    _2B = 1,
    _4B = 2,
}

impl FreOffset {
    /// The size of a single stack offset in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::_1B => 1,
            Self::_2B => 2,
            Self::_4B => 4,
        }
    }

    /// The narrowest offset size able to hold `offset`.
    pub fn for_offset(offset: i32) -> Self {
        match offset {
            -0x80..=0x7F => Self::_1B,
            -0x8000..=0x7FFF => Self::_2B,
            _ => Self::_4B,
        }
    }

    /// Whether `offset` survives being stored with this size.
    pub fn fits(self, offset: i32) -> bool {
        match self {
            Self::_1B => i8::try_from(offset).is_ok(),
            Self::_2B => i16::try_from(offset).is_ok(),
            Self::_4B => true,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FreBaseRegId {
    Fp = 0,
    Sp = 1,
}
