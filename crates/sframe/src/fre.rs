//! Encoding and decoding of individual frame row entries.

use alloc::vec::Vec;

use zerocopy::{AsBytes, FromBytes, NativeEndian, I16, I32, U16, U32};

use crate::raw::v2::{self, FreBaseRegId, FreInfo, FreOffset, FreType};
use crate::Error;

/// The maximum number of stack offsets a FRE may carry: CFA, RA and FP.
pub const MAX_OFFSETS: usize = 3;

/// Index of the CFA offset within [`FrameRowEntry::offsets`].
pub const CFA_OFFSET_IDX: usize = 0;

/// Index of the RA offset, when the RA is not fixed by the header.
pub const RA_OFFSET_IDX: usize = 1;

/// Index of the FP offset, when neither the RA nor the FP is fixed by the
/// header. When only the RA is fixed the FP offset lives at
/// [`RA_OFFSET_IDX`] instead.
pub const FP_OFFSET_IDX: usize = 2;

/// A single decoded frame row entry.
///
/// A FRE describes how to recover the CFA, RA and FP for a range of
/// instructions within a function. The start address is relative to the
/// start of the owning function; the range ends where the next FRE starts or
/// at the end of the function.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FrameRowEntry {
    start_address: u32,
    info: FreInfo,
    offsets: [i32; MAX_OFFSETS],
}

impl FrameRowEntry {
    /// Create a FRE from its raw parts.
    ///
    /// Slots in `offsets` past the offset count of `info` are ignored.
    pub fn from_raw_parts(start_address: u32, info: FreInfo, offsets: [i32; MAX_OFFSETS]) -> Self {
        let mut fre = Self {
            start_address,
            info,
            offsets,
        };

        let count = (info.offset_count() as usize).min(MAX_OFFSETS);
        fre.offsets[count..].fill(0);
        fre
    }

    /// Create a FRE carrying `offsets` in on-disk order.
    ///
    /// The offset size is the narrowest one that can represent every offset.
    pub fn with_offsets(
        start_address: u32,
        base_reg: FreBaseRegId,
        offsets: &[i32],
    ) -> Result<Self, Error> {
        if offsets.len() > MAX_OFFSETS {
            return Err(Error::FreInvalid);
        }

        let offset_size = offsets
            .iter()
            .map(|&offset| FreOffset::for_offset(offset))
            .max_by_key(|size| size.size())
            .unwrap_or(FreOffset::_1B);

        let mut slots = [0; MAX_OFFSETS];
        slots[..offsets.len()].copy_from_slice(offsets);

        let info = FreInfo::from_parts(base_reg, offsets.len() as u8, offset_size);
        Ok(Self::from_raw_parts(start_address, info, slots))
    }

    /// Mark the return address as mangled with pointer authentication bits.
    pub fn mangled_ra(mut self, value: bool) -> Self {
        self.info.set_mangled_ra_p(value);
        self
    }

    /// The offset of the start address of this FRE from the start address of
    /// its function.
    pub fn start_address_offset(&self) -> u32 {
        self.start_address
    }

    pub fn info(&self) -> FreInfo {
        self.info
    }

    /// Distinguish between SP or FP based CFA recovery.
    pub fn base_reg_id(&self) -> FreBaseRegId {
        self.info.cfa_base_reg_id()
    }

    /// Indicates whether the return address is mangled with any authorization
    /// bits (for signed RA).
    pub fn mangled_ra_p(&self) -> bool {
        self.info.mangled_ra_p()
    }

    pub fn offset_count(&self) -> usize {
        self.info.offset_count() as usize
    }

    /// The offsets contained within this FRE, in on-disk order.
    pub fn offsets(&self) -> &[i32] {
        let count = self.offset_count().min(MAX_OFFSETS);
        &self.offsets[..count]
    }

    /// Read the stack offset at `index`, if this FRE carries it.
    pub fn offset(&self, index: usize) -> Result<i32, Error> {
        self.offsets()
            .get(index)
            .copied()
            .ok_or(Error::FreOffsetNotPresent)
    }

    /// Read the offset of the CFA from the base register.
    pub fn cfa_offset(&self) -> Result<i32, Error> {
        self.offset(CFA_OFFSET_IDX)
    }

    pub(crate) fn ra_offset_with(&self, fixed_ra: Option<i8>) -> Result<i32, Error> {
        match fixed_ra {
            Some(offset) => Ok(offset.into()),
            None => self.offset(RA_OFFSET_IDX),
        }
    }

    pub(crate) fn fp_offset_with(
        &self,
        fixed_fp: Option<i8>,
        fixed_ra: Option<i8>,
    ) -> Result<i32, Error> {
        match (fixed_fp, fixed_ra) {
            (Some(offset), _) => Ok(offset.into()),
            (None, Some(_)) => self.offset(RA_OFFSET_IDX),
            (None, None) => self.offset(FP_OFFSET_IDX),
        }
    }

    /// Check that the info byte describes a FRE that can be decoded.
    pub fn sanity_check(&self) -> Result<(), Error> {
        sanity_check(self.info)
    }

    /// The number of bytes this FRE takes up when encoded with `fretype`.
    pub fn entry_size(&self, fretype: FreType) -> usize {
        entry_size(self.info, fretype).unwrap_or(fretype.addr_size() + 1)
    }

    /// Decode a FRE from the start of `bytes`.
    ///
    /// `bytes` must already be in the native byte order. Returns the entry and
    /// the number of bytes it took up.
    pub fn decode(bytes: &[u8], fretype: FreType) -> Result<(Self, usize), Error> {
        let (start_address, info) = match fretype {
            FreType::Addr1 => {
                let fre =
                    v2::FrameRowEntry::<u8>::read_from_prefix(bytes).ok_or(Error::FreInvalid)?;
                (fre.start_address as u32, fre.info)
            }
            FreType::Addr2 => {
                let fre = v2::FrameRowEntry::<U16<NativeEndian>>::read_from_prefix(bytes)
                    .ok_or(Error::FreInvalid)?;
                (fre.start_address.get() as u32, fre.info)
            }
            FreType::Addr4 => {
                let fre = v2::FrameRowEntry::<U32<NativeEndian>>::read_from_prefix(bytes)
                    .ok_or(Error::FreInvalid)?;
                (fre.start_address.get(), fre.info)
            }
        };

        sanity_check(info)?;

        let count = info.offset_count() as usize;
        let rest = &bytes[fretype.addr_size() + 1..];
        let mut offsets = [0i32; MAX_OFFSETS];

        match info.offset_size() {
            Some(FreOffset::_1B) => {
                let (raw, _) = i8::slice_from_prefix(rest, count).ok_or(Error::FreInvalid)?;
                for (slot, offset) in offsets.iter_mut().zip(raw) {
                    *slot = (*offset).into();
                }
            }
            Some(FreOffset::_2B) => {
                let (raw, _) = I16::<NativeEndian>::slice_from_prefix(rest, count)
                    .ok_or(Error::FreInvalid)?;
                for (slot, offset) in offsets.iter_mut().zip(raw) {
                    *slot = offset.get().into();
                }
            }
            Some(FreOffset::_4B) => {
                let (raw, _) = I32::<NativeEndian>::slice_from_prefix(rest, count)
                    .ok_or(Error::FreInvalid)?;
                for (slot, offset) in offsets.iter_mut().zip(raw) {
                    *slot = offset.get();
                }
            }
            None => return Err(Error::FreInvalid),
        }

        let fre = Self {
            start_address,
            info,
            offsets,
        };

        Ok((fre, fre.entry_size(fretype)))
    }

    /// Append the native byte order encoding of this FRE to `out`.
    ///
    /// # Panics
    /// Panics if the start address does not fit within `fretype`, the info
    /// byte fails [`sanity_check`](Self::sanity_check), or an offset does not
    /// fit the offset size of the info byte. The encoder checks all of these
    /// before a FRE is accepted.
    pub fn encode(&self, fretype: FreType, out: &mut Vec<u8>) {
        assert!(
            self.start_address <= fretype.max_start_address(),
            "FRE start address {:#x} does not fit in {:?}",
            self.start_address,
            fretype
        );
        if let Some(offset_size) = self.info.offset_size() {
            assert!(
                self.offsets().iter().all(|&offset| offset_size.fits(offset)),
                "FRE offsets {:?} do not fit in {:?}",
                self.offsets(),
                offset_size
            );
        }

        match fretype {
            FreType::Addr1 => out.extend_from_slice(
                v2::FrameRowEntry {
                    start_address: self.start_address as u8,
                    info: self.info,
                }
                .as_bytes(),
            ),
            FreType::Addr2 => out.extend_from_slice(
                v2::FrameRowEntry {
                    start_address: U16::<NativeEndian>::new(self.start_address as u16),
                    info: self.info,
                }
                .as_bytes(),
            ),
            FreType::Addr4 => out.extend_from_slice(
                v2::FrameRowEntry {
                    start_address: U32::<NativeEndian>::new(self.start_address),
                    info: self.info,
                }
                .as_bytes(),
            ),
        }

        let offsets = self.offsets();
        match self.info.offset_size() {
            Some(FreOffset::_1B) => {
                for &offset in offsets {
                    out.push(offset as i8 as u8);
                }
            }
            Some(FreOffset::_2B) => {
                for &offset in offsets {
                    out.extend_from_slice(I16::<NativeEndian>::new(offset as i16).as_bytes());
                }
            }
            Some(FreOffset::_4B) => {
                for &offset in offsets {
                    out.extend_from_slice(I32::<NativeEndian>::new(offset).as_bytes());
                }
            }
            None => panic!("FRE has a reserved offset size"),
        }
    }
}

/// Check that `info` has a legal offset size and no more than
/// [`MAX_OFFSETS`] offsets.
pub fn sanity_check(info: FreInfo) -> Result<(), Error> {
    if info.offset_size().is_none() || info.offset_count() as usize > MAX_OFFSETS {
        return Err(Error::FreInvalid);
    }

    Ok(())
}

/// The encoded size of a FRE with the given info byte.
///
/// Returns `None` if the offset size is reserved.
pub fn entry_size(info: FreInfo, fretype: FreType) -> Option<usize> {
    let offset_size = info.offset_size()?.size();
    Some(fretype.addr_size() + 1 + info.offset_count() as usize * offset_size)
}
