use std::fmt;

/// Structural problems found by the `verify` methods of function bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// An edge points at a block index with no block.
    MissingEdgeTarget { src: u32, dest: u32 },
    /// The entry or exit block is absent.
    MissingFixedBlock { index: u32 },
    /// The block chain names a missing block, repeats one, or skips one.
    BadBlockOrder { index: u32 },
    /// An EH slot points at a region that neither has that number nor lists
    /// it as an alias.
    EhSlotMismatch { slot: u32, region: u32 },
    /// A region link names a region id outside the table.
    EhDanglingLink { region: u32 },
    /// A statement or phi names an SSA version outside the table.
    SsaVersionOutOfRange { version: u32 },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::MissingEdgeTarget { src, dest } => {
                write!(f, "edge {src} -> {dest} targets a missing block")
            }
            VerifyError::MissingFixedBlock { index } => {
                write!(f, "fixed block {index} is missing")
            }
            VerifyError::BadBlockOrder { index } => {
                write!(f, "block chain is inconsistent at block {index}")
            }
            VerifyError::EhSlotMismatch { slot, region } => {
                write!(f, "EH slot {slot} points at region {region}")
            }
            VerifyError::EhDanglingLink { region } => {
                write!(f, "EH region {region} has a dangling link")
            }
            VerifyError::SsaVersionOutOfRange { version } => {
                write!(f, "SSA version {version} is out of range")
            }
        }
    }
}

impl std::error::Error for VerifyError {}
