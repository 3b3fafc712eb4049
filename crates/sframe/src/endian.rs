//! Byte-order conversion of whole SFrame sections.
//!
//! The byte order of a section is tied to its ABI/arch identifier. Sections
//! written for a target of the other endianness are converted with
//! [`convert_section`], which visits every multi-byte field exactly once:
//! first the header, then each FDE and the run of FREs it owns.

use core::mem;

use zerocopy::{AsBytes, ByteOrder, FromBytes, NativeEndian, I16, I32, U16, U32};

use crate::debug::debug;
use crate::raw::*;
use crate::Error;

/// The byte order of an SFrame section.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// The byte order of the host.
    pub const NATIVE: Self = if cfg!(target_endian = "big") {
        Self::Big
    } else {
        Self::Little
    };
}

impl v2::Abi {
    /// The byte order that sections for this ABI/arch are written in.
    ///
    /// Returns `None` for identifiers this crate does not know about.
    pub fn endianness(self) -> Option<Endianness> {
        match self {
            Self::AARCH64_ENDIAN_LITTLE | Self::AMD64_ENDIAN_LITTLE => Some(Endianness::Little),
            Self::AARCH64_ENDIAN_BIG | Self::S390X_ENDIAN_BIG => Some(Endianness::Big),
            _ => None,
        }
    }

    /// Whether sections for this ABI/arch use the opposite byte order from
    /// the host.
    pub fn is_foreign(self) -> bool {
        self.endianness()
            .is_some_and(|endian| endian != Endianness::NATIVE)
    }
}

/// An on-disk record whose multi-byte fields can be byte-swapped in place.
pub trait ByteOrderConvertible {
    /// Reverse the bytes of every multi-byte field.
    fn swap_byte_order(&mut self);
}

macro_rules! swap_impl {
    ($($ty:ident),*) => {$(
        impl<O: ByteOrder> ByteOrderConvertible for $ty<O> {
            fn swap_byte_order(&mut self) {
                self.set(self.get().swap_bytes());
            }
        }
    )*};
}

swap_impl!(U16, U32, I16, I32);

impl ByteOrderConvertible for u8 {
    fn swap_byte_order(&mut self) {}
}

impl ByteOrderConvertible for i8 {
    fn swap_byte_order(&mut self) {}
}

impl<O: ByteOrder> ByteOrderConvertible for Preamble<O> {
    fn swap_byte_order(&mut self) {
        self.magic.swap_byte_order();
    }
}

impl<O: ByteOrder> ByteOrderConvertible for v2::Header<O> {
    fn swap_byte_order(&mut self) {
        self.preamble.swap_byte_order();

        for field in [
            &mut self.num_fdes,
            &mut self.num_fres,
            &mut self.fre_len,
            &mut self.fdeoff,
            &mut self.freoff,
        ] {
            field.swap_byte_order();
        }
    }
}

impl<O: ByteOrder> ByteOrderConvertible for v1::FuncDescEntry<O> {
    fn swap_byte_order(&mut self) {
        self.start_address.swap_byte_order();
        for field in [&mut self.size, &mut self.start_fre_off, &mut self.num_fres] {
            field.swap_byte_order();
        }
    }
}

impl<O: ByteOrder> ByteOrderConvertible for v2::FuncDescEntry<O> {
    fn swap_byte_order(&mut self) {
        self.start_address.swap_byte_order();
        for field in [&mut self.size, &mut self.start_fre_off, &mut self.num_fres] {
            field.swap_byte_order();
        }
        self._padding2.swap_byte_order();
    }
}

impl<T: ByteOrderConvertible + Copy> ByteOrderConvertible for v2::FrameRowEntry<T> {
    fn swap_byte_order(&mut self) {
        // The field may be unaligned so it cannot be borrowed in place.
        let mut start_address = self.start_address;
        start_address.swap_byte_order();
        self.start_address = start_address;
    }
}

impl<T: ByteOrderConvertible> ByteOrderConvertible for [T] {
    fn swap_byte_order(&mut self) {
        for item in self {
            item.swap_byte_order();
        }
    }
}

/// Which way a section is being converted.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// The section is in the foreign byte order and should end up in the
    /// native one. Header fields are read after they have been swapped.
    ToNative,

    /// The section is in the native byte order and should end up in the
    /// foreign one. Header fields are read before they are swapped.
    ToForeign,
}

/// The parts of a FDE needed to walk its FREs.
struct FdeLayout {
    fretype: v2::FreType,
    start_fre_off: u32,
    num_fres: u32,
}

/// The FDE layouts of the different versions, from the point of view of the
/// section walker.
trait RawFde: ByteOrderConvertible + AsBytes + FromBytes + Sized {
    fn layout(&self) -> Result<FdeLayout, Error>;
}

macro_rules! raw_fde_impl {
    ($ty:ty) => {
        impl RawFde for $ty {
            fn layout(&self) -> Result<FdeLayout, Error> {
                Ok(FdeLayout {
                    fretype: self.info.fretype().ok_or(Error::FdeInvalid)?,
                    start_fre_off: self.start_fre_off.get(),
                    num_fres: self.num_fres.get(),
                })
            }
        }
    };
}

raw_fde_impl!(v1::FuncDescEntry<NativeEndian>);
raw_fde_impl!(v2::FuncDescEntry<NativeEndian>);

/// Convert a whole SFrame section between the native and foreign byte order
/// in place.
///
/// The header is validated as part of the walk. On error the buffer is left
/// partially converted.
pub fn convert_section(section: &mut [u8], direction: Direction) -> Result<(), Error> {
    let header = v2::Header::<NativeEndian>::mut_from_prefix(section).ok_or(Error::BufferInvalid)?;
    if direction == Direction::ToNative {
        header.swap_byte_order();
    }
    header.check()?;

    let version = header.preamble.version;
    let num_fdes = header.num_fdes.get() as usize;
    let fde_start = header.size() + header.fdeoff.get() as usize;
    let fre_start = header.size() + header.freoff.get() as usize;
    let fre_end = fre_start
        .checked_add(header.fre_len.get() as usize)
        .ok_or(Error::BufferInvalid)?;

    if fre_end > section.len() {
        debug!(
            "FRE sub-section ends at {fre_end:#x} past the end of the section ({:#x})",
            section.len()
        );
        return Err(Error::BufferInvalid);
    }

    let fde_size = crate::header::fde_size(version);
    let fde_end = num_fdes
        .checked_mul(fde_size)
        .and_then(|len| len.checked_add(fde_start))
        .ok_or(Error::BufferInvalid)?;
    if fde_end > section.len() {
        return Err(Error::BufferInvalid);
    }

    for index in 0..num_fdes {
        let offset = fde_start + index * fde_size;
        let fde = &mut section[offset..offset + fde_size];
        let layout = match version {
            Version::V1 => convert_fde::<v1::FuncDescEntry<NativeEndian>>(fde, direction)?,
            _ => convert_fde::<v2::FuncDescEntry<NativeEndian>>(fde, direction)?,
        };

        let mut offset = fre_start
            .checked_add(layout.start_fre_off as usize)
            .ok_or(Error::BufferInvalid)?;
        for _ in 0..layout.num_fres {
            let fre = section.get_mut(offset..fre_end).ok_or(Error::BufferInvalid)?;
            offset += convert_fre(fre, layout.fretype)?;
        }
    }

    if direction == Direction::ToForeign {
        let header =
            v2::Header::<NativeEndian>::mut_from_prefix(section).ok_or(Error::BufferInvalid)?;
        header.swap_byte_order();
    }

    Ok(())
}

fn convert_fde<F: RawFde>(bytes: &mut [u8], direction: Direction) -> Result<FdeLayout, Error> {
    let fde = F::mut_from_prefix(bytes).ok_or(Error::BufferInvalid)?;

    let layout = match direction {
        Direction::ToNative => {
            fde.swap_byte_order();
            fde.layout()?
        }
        Direction::ToForeign => {
            let layout = fde.layout()?;
            fde.swap_byte_order();
            layout
        }
    };

    Ok(layout)
}

/// Swap a single FRE at the start of `bytes`, returning its size.
///
/// The info byte is a single byte so both directions are handled the same.
fn convert_fre(bytes: &mut [u8], fretype: v2::FreType) -> Result<usize, Error> {
    let (info, fixed_size) = match fretype {
        v2::FreType::Addr1 => convert_fre_start::<u8>(bytes)?,
        v2::FreType::Addr2 => convert_fre_start::<U16<NativeEndian>>(bytes)?,
        v2::FreType::Addr4 => convert_fre_start::<U32<NativeEndian>>(bytes)?,
    };

    let count = info.offset_count() as usize;
    let offset_size = info.offset_size().ok_or(Error::FreInvalid)?;
    if count > crate::fre::MAX_OFFSETS {
        return Err(Error::FreInvalid);
    }

    let offsets = &mut bytes[fixed_size..];
    match offset_size {
        v2::FreOffset::_1B => (),
        v2::FreOffset::_2B => {
            let (offsets, _) = I16::<NativeEndian>::mut_slice_from_prefix(offsets, count)
                .ok_or(Error::BufferInvalid)?;
            offsets.swap_byte_order();
        }
        v2::FreOffset::_4B => {
            let (offsets, _) = I32::<NativeEndian>::mut_slice_from_prefix(offsets, count)
                .ok_or(Error::BufferInvalid)?;
            offsets.swap_byte_order();
        }
    }

    let size = fixed_size + count * offset_size.size();
    if size > bytes.len() {
        return Err(Error::BufferInvalid);
    }

    Ok(size)
}

fn convert_fre_start<T>(bytes: &mut [u8]) -> Result<(v2::FreInfo, usize), Error>
where
    T: ByteOrderConvertible + AsBytes + FromBytes + Copy,
{
    let fre = v2::FrameRowEntry::<T>::mut_from_prefix(bytes).ok_or(Error::BufferInvalid)?;
    fre.swap_byte_order();

    Ok((fre.info, mem::size_of::<v2::FrameRowEntry<T>>()))
}
