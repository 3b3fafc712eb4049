//! Generate and write out a new SFrame section.
//!
//! Functions and their FREs are added to a [`SFrameEncoder`] in the order
//! they are generated. [`SFrameEncoder::write`] lays them out into a section,
//! sorting the FDE table on the way.

use alloc::vec::Vec;
use core::num::NonZeroI8;

use tinyvec::ArrayVec;
use zerocopy::{AsBytes, NativeEndian, U16, U32};

use crate::debug::debug;
use crate::endian::{convert_section, Direction};
use crate::fde::{self, FuncDesc};
use crate::fre::{FrameRowEntry, MAX_OFFSETS};
use crate::header::{fde_size, HEADER_SIZE};
use crate::raw::*;
use crate::table::Table;
use crate::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SFrameOptions {
    version: Version,
    flags: Flags,
    abi_arch: v2::Abi,
    fixed_fp_offset: Option<NonZeroI8>,
    fixed_ra_offset: Option<NonZeroI8>,
}

impl SFrameOptions {
    pub fn new() -> Self {
        Self {
            version: Version::V2,
            flags: Flags::FDE_SORTED,
            abi_arch: Default::default(),
            fixed_fp_offset: None,
            fixed_ra_offset: None,
        }
    }

    /// The format version to emit. Defaults to [`Version::V2`].
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the section flags.
    ///
    /// [`Flags::FDE_SORTED`] is always set on the emitted section since the
    /// encoder sorts the FDE table.
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether functions preserve the frame pointer.
    pub fn frame_pointer(mut self, value: bool) -> Self {
        self.flags.set(Flags::FRAME_POINTER, value);
        self
    }

    /// Set the arch and endianness for the section.
    ///
    /// The section is emitted in the byte order of the ABI. Unknown ABIs use
    /// the native byte order.
    pub fn abi(mut self, abi: v2::Abi) -> Self {
        self.abi_arch = abi;
        self
    }

    /// Set the fixed offset of the frame pointer from the CFA.
    ///
    /// Note that setting this value to 0 is the same as setting it to `None`.
    pub fn fixed_fp_offset(mut self, offset: impl Into<Option<i8>>) -> Self {
        self.fixed_fp_offset = offset.into().and_then(NonZeroI8::new);
        self
    }

    /// Set the fixed offset of the return address from the CFA.
    ///
    /// Note that setting this value to 0 is the same as setting it to `None`.
    pub fn fixed_ra_offset(mut self, offset: impl Into<Option<i8>>) -> Self {
        self.fixed_ra_offset = offset.into().and_then(NonZeroI8::new);
        self
    }
}

impl Default for SFrameOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The offsets used to actually do the unwinding.
///
/// This specifies how, starting with a base register, the unwinder can
/// determine first the canonical frame address (CFA) and then use that to
/// determine the return address (RA) and frame pointer (FP) of the subsequent
/// frame.
///
/// The FP and RA offsets may optionally be specified as part of the section
/// header. In that case those offsets _must_ be absent in the serialized FRE.
/// As a convenience, [`SFrameEncoder::fre_from_offsets`] allows them to be set
/// as long as they are equal to the values contained in the header.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameRowOffsets {
    /// The offset used to locate the canonical frame address (CFA).
    ///
    /// When unwinding happens, it will be used to compute the offset of the CFA
    /// from the configured base register (by doing `BASE_REG + offset`).
    pub cfa: i32,

    /// The offset used to calculate the return address.
    ///
    /// When unwinding happens, it will be used to compute the offset of the RA
    /// from the CFA (by doing `CFA + offset`).
    pub ra: Option<i32>,

    /// The offset used to calculate the frame pointer.
    ///
    /// When unwinding happens, it will be used to compute the offset of the FP
    /// from the CFA (by doing `CFA + offset`).
    ///
    /// Without a fixed RA offset the FP offset is stored after the RA offset,
    /// so it can only be present if `ra` is as well.
    pub fp: Option<i32>,
}

/// Builds a SFrame section from functions and their FREs.
#[derive(Clone, Debug)]
pub struct SFrameEncoder {
    options: SFrameOptions,
    fdes: Table<FuncDesc>,
    fres: Table<FrameRowEntry>,
    fre_len: u32,
}

impl SFrameEncoder {
    /// Create a new encoder.
    ///
    /// # Errors
    /// - [`Error::VersionInvalid`] if the version is not supported.
    /// - [`Error::Invalid`] if the flags contain unknown bits.
    pub fn new(options: SFrameOptions) -> Result<Self, Error> {
        if !options.version.is_supported() {
            return Err(Error::VersionInvalid);
        }

        if options.flags.has_unknown() {
            return Err(Error::Invalid);
        }

        Ok(Self {
            options,
            fdes: Table::new(),
            fres: Table::new(),
            fre_len: 0,
        })
    }

    pub fn version(&self) -> Version {
        self.options.version
    }

    /// The flags that will be written to the section header.
    pub fn flags(&self) -> Flags {
        self.options.flags | Flags::FDE_SORTED
    }

    pub fn abi(&self) -> v2::Abi {
        self.options.abi_arch
    }

    pub fn fixed_fp_offset(&self) -> Option<i8> {
        self.options.fixed_fp_offset.map(NonZeroI8::get)
    }

    pub fn fixed_ra_offset(&self) -> Option<i8> {
        self.options.fixed_ra_offset.map(NonZeroI8::get)
    }

    /// The size of the emitted header. The encoder never emits an auxiliary
    /// header.
    pub fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    pub fn num_fdes(&self) -> usize {
        self.fdes.len()
    }

    pub fn num_fres(&self) -> usize {
        self.fres.len()
    }

    /// The size of the FRE sub-section emitted so far.
    pub fn fre_len(&self) -> u32 {
        self.fre_len
    }

    /// Get the function at `index`, in the order functions were added.
    pub fn funcdesc(&self, index: usize) -> Result<&FuncDesc, Error> {
        self.fdes.get(index).ok_or(Error::FdeNotFound)
    }

    /// Add a new function and return its index.
    ///
    /// FREs for this function must be added before the next function is
    /// added. `info` must describe a [`v2::FdeType::PcInc`] function; use
    /// [`add_function_v2`](Self::add_function_v2) for PC-mask functions.
    pub fn add_function(
        &mut self,
        start_address: i32,
        size: u32,
        info: v2::FdeInfo,
    ) -> Result<usize, Error> {
        self.add_function_v2(start_address, size, info, 0)
    }

    /// Add a new function with a repetition block size and return its index.
    ///
    /// # Errors
    /// Returns [`Error::Invalid`] if `info` has a reserved FRE type, or if it
    /// describes a [`v2::FdeType::PcMask`] function while either emitting
    /// version 1 or `rep_block_size` is 0.
    pub fn add_function_v2(
        &mut self,
        start_address: i32,
        size: u32,
        info: v2::FdeInfo,
        rep_block_size: u8,
    ) -> Result<usize, Error> {
        let rep_block_size = match self.options.version {
            Version::V1 => 0,
            _ => rep_block_size,
        };

        let mut fde = FuncDesc::new(start_address, size, info, rep_block_size);
        if fde.check(self.options.version).is_err() {
            debug!("rejecting function at {start_address:#x}: {fde:?}");
            return Err(Error::Invalid);
        }

        fde.set_fre_start_offset(self.fre_len);
        self.fdes.push(fde)
    }

    /// Append a FRE to the function at `func_index`.
    ///
    /// # Errors
    /// - [`Error::FdeNotFound`] if there is no function at `func_index`.
    /// - [`Error::Invalid`] if the function is not the most recently added
    ///   one.
    /// - [`Error::FreInvalid`] if the FRE has a malformed info byte, offsets
    ///   that do not fit its offset size, or a start address that is out of
    ///   order, outside the function, or too wide for the function's FRE type.
    pub fn add_fre(&mut self, func_index: usize, fre: FrameRowEntry) -> Result<(), Error> {
        let fde = *self.funcdesc(func_index)?;
        if func_index + 1 != self.fdes.len() {
            debug!("FRE added to function {func_index} after a later function");
            return Err(Error::Invalid);
        }

        fre.sanity_check()?;

        let fretype = fde.fretype()?;
        let start = fre.start_address_offset();
        if start > fretype.max_start_address() || start >= fde.size().max(1) {
            debug!("FRE start {start:#x} does not fit function {func_index}: {fde:?}");
            return Err(Error::FreInvalid);
        }

        if fde.fdetype() == v2::FdeType::PcMask && start >= u32::from(fde.rep_block_size()) {
            return Err(Error::FreInvalid);
        }

        if fde.num_fres() > 0 {
            let prev = self.fres.get(self.fres.len() - 1).map(|prev| prev.start_address_offset());
            if prev.is_some_and(|prev| prev > start) {
                return Err(Error::FreInvalid);
            }
        }

        let offset_size = fre.info().offset_size().ok_or(Error::FreInvalid)?;
        if !fre.offsets().iter().all(|&offset| offset_size.fits(offset)) {
            return Err(Error::FreInvalid);
        }

        let fre_len = u32::try_from(fre.entry_size(fretype))
            .ok()
            .and_then(|size| self.fre_len.checked_add(size))
            .ok_or(Error::Invalid)?;

        self.fres.push(fre)?;
        self.fre_len = fre_len;
        if let Some(fde) = self.fdes.get_mut(func_index) {
            fde.push_fre();
        }

        Ok(())
    }

    /// Build a FRE from named offsets, dropping the ones that are fixed by
    /// the section header.
    ///
    /// # Errors
    /// Returns [`Error::FreInvalid`] if an offset disagrees with the fixed
    /// offset in the header, or the FP offset is present without an RA offset
    /// to precede it.
    pub fn fre_from_offsets(
        &self,
        start_address: u32,
        base_reg: v2::FreBaseRegId,
        offsets: FrameRowOffsets,
    ) -> Result<FrameRowEntry, Error> {
        let ra = match (self.options.fixed_ra_offset, offsets.ra) {
            (Some(fixed), Some(offset)) if i32::from(fixed.get()) == offset => None,
            (Some(_), Some(_)) => return Err(Error::FreInvalid),
            (_, ra) => ra,
        };

        let fp = match (self.options.fixed_fp_offset, offsets.fp) {
            (Some(fixed), Some(offset)) if i32::from(fixed.get()) == offset => None,
            (Some(_), Some(_)) => return Err(Error::FreInvalid),
            (_, fp) => fp,
        };

        let mut values = ArrayVec::<[i32; MAX_OFFSETS]>::new();
        values.push(offsets.cfa);

        match (ra, fp) {
            (Some(ra), fp) => {
                values.push(ra);
                values.extend(fp);
            }
            (None, Some(fp)) if self.options.fixed_ra_offset.is_some() => values.push(fp),
            (None, Some(_)) => return Err(Error::FreInvalid),
            (None, None) => (),
        }

        FrameRowEntry::with_offsets(start_address, base_reg, &values)
    }

    /// Serialize the section.
    ///
    /// FREs are laid out in the order they were added so the offsets recorded
    /// by [`add_function`](Self::add_function) stay valid. The FDE table is
    /// written sorted on start address. The encoder itself is left untouched
    /// so this can be called again after adding more functions.
    pub fn write(&self) -> Result<Vec<u8>, Error> {
        let version = self.options.version;
        let fde_size = fde_size(version);
        let fde_len = self
            .fdes
            .len()
            .checked_mul(fde_size)
            .ok_or(Error::NoMemory)?;
        let fre_start = HEADER_SIZE + fde_len;
        let total = fre_start
            .checked_add(self.fre_len as usize)
            .ok_or(Error::NoMemory)?;

        debug!(
            "writing {} FDEs and {} FREs: header {HEADER_SIZE}, FDEs {fde_len}, FREs {} bytes",
            self.fdes.len(),
            self.fres.len(),
            self.fre_len
        );

        let mut out = Vec::new();
        out.try_reserve_exact(total).map_err(|_| Error::NoMemory)?;
        out.resize(fre_start, 0);

        let mut fres = self.fres.iter();
        for fde in self.fdes.iter() {
            debug_assert_eq!(out.len() - fre_start, fde.fre_start_offset() as usize);

            let fretype = fde.fretype()?;
            for fre in fres.by_ref().take(fde.num_fres() as usize) {
                fre.encode(fretype, &mut out);
            }
        }
        debug_assert_eq!(out.len(), total);

        let mut sorted = Vec::new();
        sorted
            .try_reserve_exact(self.fdes.len())
            .map_err(|_| Error::NoMemory)?;
        sorted.extend_from_slice(self.fdes.as_slice());
        fde::sort(&mut sorted);

        let table = &mut out[HEADER_SIZE..fre_start];
        for (fde, slot) in sorted.iter().zip(table.chunks_exact_mut(fde_size)) {
            match version {
                Version::V1 => slot.copy_from_slice(fde.to_v1::<NativeEndian>().as_bytes()),
                _ => slot.copy_from_slice(fde.to_v2::<NativeEndian>().as_bytes()),
            }
        }

        let header = v2::Header::<NativeEndian> {
            preamble: Preamble {
                magic: U16::new(MAGIC),
                version,
                flags: self.flags(),
            },
            abi_arch: self.options.abi_arch,
            fixed_fp_offset: self.fixed_fp_offset().unwrap_or(FIXED_OFFSET_INVALID),
            fixed_ra_offset: self.fixed_ra_offset().unwrap_or(FIXED_OFFSET_INVALID),
            auxhdr_len: 0,
            num_fdes: U32::new(u32::try_from(self.fdes.len()).map_err(|_| Error::Invalid)?),
            num_fres: U32::new(u32::try_from(self.fres.len()).map_err(|_| Error::Invalid)?),
            fre_len: U32::new(self.fre_len),
            fdeoff: U32::new(0),
            freoff: U32::new(u32::try_from(fde_len).map_err(|_| Error::Invalid)?),
        };
        out[..HEADER_SIZE].copy_from_slice(header.as_bytes());

        if self.options.abi_arch.is_foreign() {
            debug!("converting section to the byte order of {:?}", self.options.abi_arch);
            convert_section(&mut out, Direction::ToForeign)?;
        }

        Ok(out)
    }
}
