//! `sframe` is a library for reading and writing the
//! [SFrame stack trace format][0].
//!
//! The Simple Frame (SFrame) format keeps track of the minimal necessary
//! information needed to generate a stack trace:
//! - the Canonical Frame Pointer (CFA),
//! - the Frame Pointer (FP), and,
//! - the Return Address (RA).
//!
//! Its goal is to provide a simple, fast, and low-overhead mechanism to
//! generate stack traces.
//!
//! [0]: https://sourceware.org/binutils/docs-2.41/sframe-spec.html
//!
//! # Modules
//! - Types to decode a SFrame section are available in the crate root.
//! - [`fde`] - Function descriptor entries and searching a table of them.
//! - [`raw`] - Raw SFrame types as they are defined in the specification.
//! - [`write`][mod@write] - Generate and write out a new sframe section.
//!
//! # Debugging
//! Setting the `SFRAME_DEBUG` environment variable makes the library emit
//! trace messages through the [`log`] crate when a section is rejected or a
//! lookup fails.
//!
//! # Example
//! ```
//! use sframe::raw::v2::{FdeInfo, FdeType, FreBaseRegId, FreType};
//! use sframe::write::{SFrameEncoder, SFrameOptions};
//! use sframe::{FrameRowEntry, SFrame};
//!
//! let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
//! let info = FdeInfo::new(FreType::for_function_size(64), FdeType::PcInc);
//! let func = encoder.add_function(0x1000, 64, info)?;
//! encoder.add_fre(func, FrameRowEntry::with_offsets(0, FreBaseRegId::Sp, &[8])?)?;
//!
//! let sframe = SFrame::decode(&encoder.write()?)?;
//! let fre = sframe.find_fre(0x1000 + 32)?;
//! assert_eq!(fre.cfa_offset()?, 8);
//! # Ok::<(), sframe::Error>(())
//! ```

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod debug;
mod endian;
mod error;
pub mod fde;
mod fre;
mod header;
pub mod raw;
mod read;
mod table;
pub mod write;

pub use zerocopy::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

pub use self::debug::DEBUG_ENV;
pub use self::endian::{convert_section, ByteOrderConvertible, Direction, Endianness};
pub use self::error::Error;
pub use self::fde::FuncDesc;
pub use self::fre::{
    entry_size, sanity_check, FrameRowEntry, CFA_OFFSET_IDX, FP_OFFSET_IDX, MAX_OFFSETS,
    RA_OFFSET_IDX,
};
pub use self::header::HEADER_SIZE;
pub use self::read::*;
