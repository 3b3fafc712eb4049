//! Function descriptor entries, independent of the on-disk version.

use zerocopy::{ByteOrder, I32, U16, U32};

use crate::raw::*;
use crate::Error;

/// A single function descriptor entry.
///
/// This is the native, version-independent form of [`v1::FuncDescEntry`] and
/// [`v2::FuncDescEntry`]. Version 1 sections always have a
/// `rep_block_size` of zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FuncDesc {
    start_address: i32,
    size: u32,
    fre_start_offset: u32,
    num_fres: u32,
    info: v2::FdeInfo,
    rep_block_size: u8,
}

impl FuncDesc {
    pub(crate) fn new(
        start_address: i32,
        size: u32,
        info: v2::FdeInfo,
        rep_block_size: u8,
    ) -> Self {
        Self {
            start_address,
            size,
            fre_start_offset: 0,
            num_fres: 0,
            info,
            rep_block_size,
        }
    }

    pub(crate) fn from_v1<O: ByteOrder>(raw: &v1::FuncDescEntry<O>) -> Self {
        Self {
            start_address: raw.start_address.get(),
            size: raw.size.get(),
            fre_start_offset: raw.start_fre_off.get(),
            num_fres: raw.num_fres.get(),
            info: raw.info,
            rep_block_size: 0,
        }
    }

    pub(crate) fn from_v2<O: ByteOrder>(raw: &v2::FuncDescEntry<O>) -> Self {
        Self {
            start_address: raw.start_address.get(),
            size: raw.size.get(),
            fre_start_offset: raw.start_fre_off.get(),
            num_fres: raw.num_fres.get(),
            info: raw.info,
            rep_block_size: raw.rep_size,
        }
    }

    pub(crate) fn to_v1<O: ByteOrder>(&self) -> v1::FuncDescEntry<O> {
        v1::FuncDescEntry {
            start_address: I32::new(self.start_address),
            size: U32::new(self.size),
            start_fre_off: U32::new(self.fre_start_offset),
            num_fres: U32::new(self.num_fres),
            info: self.info,
        }
    }

    pub(crate) fn to_v2<O: ByteOrder>(&self) -> v2::FuncDescEntry<O> {
        v2::FuncDescEntry {
            start_address: I32::new(self.start_address),
            size: U32::new(self.size),
            start_fre_off: U32::new(self.fre_start_offset),
            num_fres: U32::new(self.num_fres),
            info: self.info,
            rep_size: self.rep_block_size,
            _padding2: U16::new(0),
        }
    }

    pub(crate) fn set_fre_start_offset(&mut self, offset: u32) {
        self.fre_start_offset = offset;
    }

    pub(crate) fn push_fre(&mut self) {
        self.num_fres += 1;
    }

    /// The start address of the function.
    pub fn start_address(&self) -> i32 {
        self.start_address
    }

    /// The size of the function in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The offset in bytes of the first FRE of this function within the FRE
    /// sub-section.
    pub fn fre_start_offset(&self) -> u32 {
        self.fre_start_offset
    }

    /// The number of FREs used for this function.
    pub fn num_fres(&self) -> u32 {
        self.num_fres
    }

    pub fn info(&self) -> v2::FdeInfo {
        self.info
    }

    /// The strategy to use to find the matching FRE for a given PC.
    pub fn fdetype(&self) -> v2::FdeType {
        self.info.fdetype()
    }

    /// The width of the start addresses of the FREs of this function.
    pub fn fretype(&self) -> Result<v2::FreType, Error> {
        self.info.fretype().ok_or(Error::FdeInvalid)
    }

    /// Specifies which key is used for signing the return addresses in the FDE.
    pub fn pauth_key(&self) -> v2::Aarch64PauthKey {
        self.info.pauth_key()
    }

    /// The size of the repetitive block for which a FDE of type
    /// [`v2::FdeType::PcMask`] is used.
    pub fn rep_block_size(&self) -> u8 {
        self.rep_block_size
    }

    /// Returns whether `[start_address, start_address + size)` contains
    /// `address`.
    pub fn contains(&self, address: i32) -> bool {
        let start = i64::from(self.start_address);
        let address = i64::from(address);

        start <= address && address < start + i64::from(self.size)
    }

    /// Validate the fields that the format does not constrain on its own.
    pub(crate) fn check(&self, version: Version) -> Result<(), Error> {
        self.fretype()?;

        if self.fdetype() == v2::FdeType::PcMask
            && (version == Version::V1 || self.rep_block_size == 0)
        {
            return Err(Error::FdeInvalid);
        }

        Ok(())
    }
}

/// Sort FDEs on their start address.
pub fn sort(fdes: &mut [FuncDesc]) {
    fdes.sort_by_key(|fde| fde.start_address);
}

/// Whether `fdes` is sorted on start address.
pub fn is_sorted(fdes: &[FuncDesc]) -> bool {
    fdes.windows(2)
        .all(|pair| pair[0].start_address <= pair[1].start_address)
}

/// Find the index of the FDE that may contain `address` in a sorted FDE
/// table.
///
/// This is the FDE with the largest start address that is still at or below
/// `address`. Whether the address actually lies within the function is left
/// to the caller. Returns `None` when every FDE starts after `address`.
pub fn search(fdes: &[FuncDesc], address: i32) -> Option<usize> {
    match fdes.partition_point(|fde| fde.start_address <= address) {
        0 => None,
        index => Some(index - 1),
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn fde(start_address: i32, size: u32) -> FuncDesc {
        let info = v2::FdeInfo::new(v2::FreType::for_function_size(size), v2::FdeType::PcInc);
        FuncDesc::new(start_address, size, info, 0)
    }

    fn table() -> Vec<FuncDesc> {
        [fde(0x1000, 0x10), fde(0x1010, 0x20), fde(0x1040, 0x8)]
            .into_iter()
            .collect()
    }

    #[test]
    fn search_exact_start() {
        let fdes = table();
        assert_eq!(search(&fdes, 0x1000), Some(0));
        assert_eq!(search(&fdes, 0x1010), Some(1));
        assert_eq!(search(&fdes, 0x1040), Some(2));
    }

    #[test]
    fn search_inside_function() {
        let fdes = table();
        assert_eq!(search(&fdes, 0x100F), Some(0));
        assert_eq!(search(&fdes, 0x1011), Some(1));
        assert_eq!(search(&fdes, 0x102F), Some(1));
    }

    #[test]
    fn search_before_first() {
        assert_eq!(search(&table(), 0xFFF), None);
        assert_eq!(search(&[], 0), None);
    }

    #[test]
    fn search_past_last() {
        // The last FDE is returned even when the address is beyond its end.
        assert_eq!(search(&table(), 0x1047), Some(2));
        assert_eq!(search(&table(), i32::MAX), Some(2));
    }

    #[test]
    fn search_gap_between_functions() {
        // [0x1030, 0x1040) is not covered; the preceding function is returned
        // and `contains` rejects it.
        let fdes = table();
        let index = search(&fdes, 0x1030).unwrap();
        assert_eq!(index, 1);
        assert!(!fdes[index].contains(0x1030));
    }

    #[test]
    fn sort_on_start_address() {
        let mut fdes = [fde(0x30, 1), fde(-0x10, 1), fde(0x10, 1)];
        assert!(!is_sorted(&fdes));

        sort(&mut fdes);
        assert!(is_sorted(&fdes));
        assert_eq!(
            fdes.map(|fde| fde.start_address()),
            [-0x10, 0x10, 0x30]
        );
    }

    #[test]
    fn check_rejects_bad_fdes() {
        let info = v2::FdeInfo::new(v2::FreType::Addr1, v2::FdeType::PcMask);
        assert_eq!(
            FuncDesc::new(0, 16, info, 0).check(Version::V2),
            Err(Error::FdeInvalid)
        );
        assert_eq!(
            FuncDesc::new(0, 16, info, 16).check(Version::V1),
            Err(Error::FdeInvalid)
        );
        assert_eq!(FuncDesc::new(0, 16, info, 16).check(Version::V2), Ok(()));

        let reserved = v2::FdeInfo(0x07);
        assert_eq!(
            FuncDesc::new(0, 16, reserved, 0).check(Version::V2),
            Err(Error::FdeInvalid)
        );
    }

    #[test]
    fn contains_is_end_exclusive() {
        let fde = fde(0x1000, 0x10);
        assert!(fde.contains(0x1000));
        assert!(fde.contains(0x100F));
        assert!(!fde.contains(0x1010));
        assert!(!fde.contains(0xFFF));
    }
}
