//! Section-level header handling.

use core::mem;

use zerocopy::{ByteOrder, NativeEndian};

use crate::debug::debug;
use crate::raw::*;
use crate::Error;

/// The size of the fixed part of the header.
pub const HEADER_SIZE: usize = mem::size_of::<v2::Header<NativeEndian>>();

impl<O: ByteOrder> v2::Header<O> {
    /// The size of the whole header, including the auxiliary header.
    ///
    /// Both the FDE and FRE offsets are relative to the end of this.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.auxhdr_len as usize
    }

    /// The size of a single FDE in this section.
    pub fn fde_size(&self) -> usize {
        fde_size(self.preamble.version)
    }

    /// Validate the parts of the header that do not depend on the rest of the
    /// section.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.preamble.magic.get() != MAGIC {
            debug!("header has bad magic {:#06x}", self.preamble.magic.get());
            return Err(Error::BufferInvalid);
        }

        if !self.preamble.version.is_supported() {
            debug!("header has unsupported version {}", self.preamble.version.0);
            return Err(Error::BufferInvalid);
        }

        if self.preamble.flags.has_unknown() {
            debug!("header has unknown flags {:#x}", self.preamble.flags.bits());
            return Err(Error::BufferInvalid);
        }

        if self.fdeoff.get() > self.freoff.get() {
            debug!(
                "FDE sub-section ({:#x}) placed after the FRE sub-section ({:#x})",
                self.fdeoff.get(),
                self.freoff.get()
            );
            return Err(Error::BufferInvalid);
        }

        Ok(())
    }
}

/// The size of a FDE for the given version.
///
/// Unsupported versions use the version 2 layout.
pub(crate) fn fde_size(version: Version) -> usize {
    match version {
        Version::V1 => mem::size_of::<v1::FuncDescEntry<NativeEndian>>(),
        _ => mem::size_of::<v2::FuncDescEntry<NativeEndian>>(),
    }
}

/// Wrap a possibly-sentinel fixed offset from the header.
pub(crate) fn fixed_offset(value: i8) -> Option<i8> {
    match value {
        FIXED_OFFSET_INVALID => None,
        v => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use zerocopy::{FromZeroes, U16, U32};

    use super::*;

    fn header() -> v2::Header<NativeEndian> {
        let mut header = v2::Header::<NativeEndian>::new_zeroed();
        header.preamble = Preamble {
            magic: U16::new(MAGIC),
            version: Version::V2,
            flags: Flags::FDE_SORTED,
        };
        header
    }

    #[test]
    fn valid_header() {
        assert_eq!(header().check(), Ok(()));
        assert_eq!(header().size(), 28);
        assert_eq!(header().fde_size(), 20);
    }

    #[test]
    fn aux_header_counts_towards_size() {
        let mut header = header();
        header.auxhdr_len = 4;
        assert_eq!(header.size(), 32);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut header = header();
        header.preamble.magic = U16::new(MAGIC.swap_bytes());
        assert_eq!(header.check(), Err(Error::BufferInvalid));
    }

    #[test]
    fn rejects_bad_version() {
        let mut header = header();
        header.preamble.version = Version(3);
        assert_eq!(header.check(), Err(Error::BufferInvalid));

        header.preamble.version = Version(0);
        assert_eq!(header.check(), Err(Error::BufferInvalid));
    }

    #[test]
    fn rejects_unknown_flags() {
        let mut header = header();
        header.preamble.flags = Flags::from_bits_retain(0x4);
        assert_eq!(header.check(), Err(Error::BufferInvalid));
    }

    #[test]
    fn rejects_fdes_after_fres() {
        let mut header = header();
        header.fdeoff = U32::new(8);
        header.freoff = U32::new(4);
        assert_eq!(header.check(), Err(Error::BufferInvalid));
    }

    #[test]
    fn sentinel_fixed_offsets() {
        assert_eq!(fixed_offset(0), None);
        assert_eq!(fixed_offset(-8), Some(-8));
    }
}
