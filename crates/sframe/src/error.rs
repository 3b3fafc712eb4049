use thiserror::Error;

/// Errors produced while decoding, encoding or querying an SFrame section.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Error)]
pub enum Error {
    /// An argument was malformed or is not allowed in this context.
    #[error("an argument is invalid")]
    Invalid,

    /// The section is too short, has a bad magic or failed the header sanity
    /// checks.
    #[error("buffer does not contain SFrame data")]
    BufferInvalid,

    /// An allocation for one of the internal tables failed.
    #[error("out of memory")]
    NoMemory,

    /// The requested SFrame version is not supported.
    #[error("SFrame version not supported")]
    VersionInvalid,

    /// A FDE is malformed, or the FRE scan of a FDE found no row for the
    /// requested address.
    #[error("corrupt SFrame function descriptor entry")]
    FdeInvalid,

    /// No FDE covers the requested address, or an FDE index was out of range.
    #[error("SFrame function descriptor entry not found")]
    FdeNotFound,

    /// The FDE table is not sorted so it cannot be searched.
    #[error("SFrame function descriptor entries are not sorted")]
    FdeNotSorted,

    /// A FRE is malformed.
    #[error("corrupt SFrame frame row entry")]
    FreInvalid,

    /// A FRE index was out of range.
    #[error("SFrame frame row entry not found")]
    FreNotFound,

    /// The requested stack offset is not carried by the FRE.
    #[error("SFrame frame row entry offset not present")]
    FreOffsetNotPresent,
}
