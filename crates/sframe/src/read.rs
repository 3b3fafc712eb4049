use alloc::vec::Vec;
use core::iter::FusedIterator;
use core::slice;

use zerocopy::{FromBytes, NativeEndian};

use crate::debug::debug;
use crate::endian::{convert_section, Direction};
use crate::fde::{self, FuncDesc};
use crate::fre::FrameRowEntry;
use crate::header::{fixed_offset, HEADER_SIZE};
use crate::raw::*;
use crate::Error;

/// A decoded SFrame section.
///
/// The section is copied into native byte order when it is decoded so none of
/// the accessors need to care about the byte order of the original bytes.
#[derive(Clone, Debug)]
pub struct SFrame {
    header: v2::Header<NativeEndian>,
    aux: Vec<u8>,
    fdes: Vec<FuncDesc>,
    fres: Vec<u8>,
}

impl SFrame {
    /// Decode a SFrame section in either byte order.
    ///
    /// The byte order is detected from the magic number. Sections in the
    /// foreign byte order are converted in a scratch copy which is dropped
    /// before this returns.
    pub fn decode(section: &[u8]) -> Result<Self, Error> {
        if section.len() < HEADER_SIZE {
            debug!(
                "section is {} bytes, smaller than the {HEADER_SIZE} byte header",
                section.len()
            );
            return Err(Error::BufferInvalid);
        }

        let preamble =
            Preamble::<NativeEndian>::read_from_prefix(section).ok_or(Error::BufferInvalid)?;

        match preamble.magic.get() {
            MAGIC => Self::parse(section),
            magic if magic == MAGIC.swap_bytes() => {
                debug!("section is in the foreign byte order, converting");

                let mut scratch = try_to_vec(section)?;
                convert_section(&mut scratch, Direction::ToNative)?;
                Self::parse(&scratch)
            }
            magic => {
                debug!("section has bad magic {magic:#06x}");
                Err(Error::BufferInvalid)
            }
        }
    }

    /// Parse a section that is already in native byte order.
    fn parse(section: &[u8]) -> Result<Self, Error> {
        let header =
            v2::Header::<NativeEndian>::read_from_prefix(section).ok_or(Error::BufferInvalid)?;
        header.check()?;

        // The aux header counts towards the header size so offsets are relative to
        // the end of the aux header.
        let aux = section
            .get(HEADER_SIZE..header.size())
            .ok_or(Error::BufferInvalid)?;
        let data = &section[header.size()..];

        let version = header.preamble.version;
        let num_fdes = header.num_fdes.get() as usize;
        let fdes = data
            .get(header.fdeoff.get() as usize..)
            .ok_or(Error::BufferInvalid)?;

        let table = match version {
            Version::V1 => {
                let (fdes, _) = v1::FuncDescEntry::<NativeEndian>::slice_from_prefix(fdes, num_fdes)
                    .ok_or(Error::BufferInvalid)?;
                collect_fdes(fdes, FuncDesc::from_v1)?
            }
            _ => {
                let (fdes, _) = v2::FuncDescEntry::<NativeEndian>::slice_from_prefix(fdes, num_fdes)
                    .ok_or(Error::BufferInvalid)?;
                collect_fdes(fdes, FuncDesc::from_v2)?
            }
        };

        for (index, fde) in table.iter().enumerate() {
            if let Err(e) = fde.check(version) {
                debug!("FDE {index} is invalid: {fde:?}");
                return Err(e);
            }
        }

        let freoff = header.freoff.get() as usize;
        let fre_end = freoff
            .checked_add(header.fre_len.get() as usize)
            .ok_or(Error::BufferInvalid)?;
        let fres = data.get(freoff..fre_end).ok_or_else(|| {
            debug!(
                "FRE sub-section [{freoff:#x}, {fre_end:#x}) is out of bounds of {:#x} bytes",
                data.len()
            );
            Error::BufferInvalid
        })?;

        debug!(
            "decoded v{} section: {num_fdes} FDEs, {} FRE bytes, abi {:?}",
            version.0,
            fres.len(),
            header.abi_arch
        );

        Ok(Self {
            header,
            aux: try_to_vec(aux)?,
            fdes: table,
            fres: try_to_vec(fres)?,
        })
    }

    /// The SFrame specification version that this section uses.
    pub fn version(&self) -> Version {
        self.header.preamble.version
    }

    /// Section-wide SFrame flags.
    pub fn flags(&self) -> Flags {
        self.header.preamble.flags
    }

    /// Information about the arch (endianness) and ABI.
    pub fn abi(&self) -> v2::Abi {
        self.header.abi_arch
    }

    /// The size of the header, including the auxiliary header.
    pub fn header_size(&self) -> usize {
        self.header.size()
    }

    /// The bytes that make up the auxiliary header.
    ///
    /// This is not used by the SFrame format at the moment but in the future it
    /// may be used to extend the information specified in the SFrame header.
    pub fn aux_header(&self) -> &[u8] {
        &self.aux
    }

    /// Return the fixed Frame Pointer offset from the CFA, if any.
    ///
    /// The offset for the Frame Pointer (FP) from CFA is fixed for some ABIs.
    /// (e.g. in AMD64 when -fno-omit-frame-pointer is used). When fixed, the
    /// header specifies the fixed stack frame offset and the individual
    /// FREs do not track it. If not fixed this will return `None` and
    /// individual FREs will provide the applicable stack frame offset, if
    /// any.
    pub fn fixed_fp_offset(&self) -> Option<i8> {
        fixed_offset(self.header.fixed_fp_offset)
    }

    /// Returns the fixed Return Address offset from the CFA, if any.
    ///
    /// The offset for the Return Address (RA) from CFA is fixed for some ABIs.
    /// When fixed, this field specifies the fixed stack frame offset and
    /// individual FREs do not track it. If not fixed then this method will
    /// return `None` and individual FREs will provide the applicable stack
    /// frame offset, if any.
    pub fn fixed_ra_offset(&self) -> Option<i8> {
        fixed_offset(self.header.fixed_ra_offset)
    }

    pub fn num_fdes(&self) -> usize {
        self.fdes.len()
    }

    /// The number of FREs in the section, as recorded in the header.
    pub fn num_fres(&self) -> u32 {
        self.header.num_fres.get()
    }

    /// The length of the FRE sub-section in bytes.
    pub fn fre_len(&self) -> u32 {
        self.header.fre_len.get()
    }

    /// Get the FDE at `index`.
    pub fn funcdesc(&self, index: usize) -> Result<&FuncDesc, Error> {
        self.fdes.get(index).ok_or(Error::FdeNotFound)
    }

    /// Get an iterator over all the [FDEs] in this section, in the order they
    /// appear in the section.
    ///
    /// [FDEs]: FuncDesc
    pub fn fdes(&self) -> slice::Iter<'_, FuncDesc> {
        self.fdes.iter()
    }

    /// Get an iterator over the FREs of the function at `index`.
    pub fn fres(&self, index: usize) -> Result<FrameRowIter<'_>, Error> {
        let fde = self.funcdesc(index)?;
        let offset = fde.fre_start_offset() as usize;

        // Decoding the first FRE fails if the offset is out of bounds.
        let fres = self.fres.get(offset..).unwrap_or_default();

        Ok(FrameRowIter {
            fres,
            fretype: fde.fretype()?,
            remaining: fde.num_fres(),
        })
    }

    /// Get FRE `fre_index` of the function at `func_index`.
    pub fn fre(&self, func_index: usize, fre_index: usize) -> Result<FrameRowEntry, Error> {
        let mut fres = self.fres(func_index)?;
        if fre_index >= fres.len() {
            return Err(Error::FreNotFound);
        }

        fres.nth(fre_index).ok_or(Error::FreNotFound)?
    }

    /// Find the index of the FDE whose address range may contain `address`.
    ///
    /// This is the FDE with the largest start address at or below `address`.
    /// It is not checked whether `address` actually falls within the
    /// function.
    pub fn funcdesc_for_addr(&self, address: i32) -> Result<usize, Error> {
        if self.fdes.is_empty() {
            return Err(Error::FdeNotFound);
        }

        if !self.flags().contains(Flags::FDE_SORTED) {
            debug!("binary search requested on an unsorted FDE table");
            return Err(Error::FdeNotSorted);
        }

        fde::search(&self.fdes, address).ok_or(Error::FdeNotFound)
    }

    /// Find the FRE that describes how to unwind from `pc`.
    ///
    /// # Errors
    /// - [`Error::FdeNotFound`] if no function starts at or below `pc`.
    /// - [`Error::FreInvalid`] if the first FRE of the function starts after
    ///   `pc`, or a FRE could not be decoded.
    /// - [`Error::FdeInvalid`] if none of the FREs of the function cover `pc`.
    pub fn find_fre(&self, pc: i32) -> Result<FrameRowEntry, Error> {
        let index = self.funcdesc_for_addr(pc)?;
        let fde = &self.fdes[index];

        // PC-mask FDEs describe a repeating block; the FREs are matched against
        // the PC reduced to a position within that block.
        let (base, target) = match fde.fdetype() {
            v2::FdeType::PcInc => (i64::from(fde.start_address()), i64::from(pc)),
            v2::FdeType::PcMask => {
                let rep = i64::from(fde.rep_block_size());
                (0, i64::from(pc).rem_euclid(rep))
            }
        };

        let mut fres = self.fres(index)?;
        let mut current = match fres.next() {
            Some(fre) => fre?,
            None => {
                debug!("FDE {index} has no FREs for pc {pc:#x}");
                return Err(Error::FdeInvalid);
            }
        };

        if fde.fdetype() == v2::FdeType::PcInc
            && base + i64::from(current.start_address_offset()) > target
        {
            return Err(Error::FreInvalid);
        }

        loop {
            let next = fres.next().transpose()?;
            let start = base + i64::from(current.start_address_offset());
            let end = match &next {
                Some(next) => base + i64::from(next.start_address_offset()) - 1,
                None => base + i64::from(fde.size()) - 1,
            };

            if start <= target && target <= end {
                return Ok(current);
            }

            current = match next {
                Some(next) => next,
                None => break,
            };
        }

        debug!("no FRE of FDE {index} covers pc {pc:#x}");
        Err(Error::FdeInvalid)
    }
}

impl FrameRowEntry {
    /// Read the offset of the RA from the CFA.
    ///
    /// This is the fixed offset from the section header if there is one.
    pub fn ra_offset(&self, sframe: &SFrame) -> Result<i32, Error> {
        self.ra_offset_with(sframe.fixed_ra_offset())
    }

    /// Read the offset of the FP from the CFA.
    ///
    /// This is the fixed offset from the section header if there is one.
    pub fn fp_offset(&self, sframe: &SFrame) -> Result<i32, Error> {
        self.fp_offset_with(sframe.fixed_fp_offset(), sframe.fixed_ra_offset())
    }
}

/// An iterator over the FREs of a single function.
#[derive(Clone, Debug)]
pub struct FrameRowIter<'a> {
    fres: &'a [u8],
    fretype: v2::FreType,
    remaining: u32,
}

impl<'a> Iterator for FrameRowIter<'a> {
    type Item = Result<FrameRowEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        Some(match FrameRowEntry::decode(self.fres, self.fretype) {
            Ok((fre, size)) => {
                self.remaining -= 1;
                self.fres = &self.fres[size..];

                Ok(fre)
            }
            Err(e) => {
                self.remaining = 0;

                Err(e)
            }
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let bound = self.remaining as usize;
        (bound, Some(bound))
    }
}

impl<'a> ExactSizeIterator for FrameRowIter<'a> {}
impl<'a> FusedIterator for FrameRowIter<'a> {}

/// Convert raw FDE records, reserving only once the records are known to fit in
/// the section.
fn collect_fdes<R>(raw: &[R], convert: impl Fn(&R) -> FuncDesc) -> Result<Vec<FuncDesc>, Error> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(raw.len())
        .map_err(|_| Error::NoMemory)?;
    table.extend(raw.iter().map(convert));
    Ok(table)
}

fn try_to_vec(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(bytes.len())
        .map_err(|_| Error::NoMemory)?;
    vec.extend_from_slice(bytes);
    Ok(vec)
}
