use std::error;
use std::fmt;
use std::path::PathBuf;

/// An error enum used throughout the CubeChip crate to communicate details of
/// runtime failures that have occurred.
///
/// Instances of [CoreError] are bubbled up to the hosting application through
/// the public API methods. Faults raised *inside* a running core never cross
/// the worker thread boundary as errors; they flip the `HALTED`/`FATAL` bits
/// on the shared system state instead.
#[derive(Debug, PartialEq)]
pub enum CoreError {
    /// An unrecognised opcode was fetched by an interpreter core
    UnknownInstruction { opcode: u16 },
    /// A program file failed validation against every registered core
    NoEligibleCore { extension: String },
    /// A core descriptor was selected but its constructor failed
    CoreConstructionFailed { name: String },
    /// An index into the eligible-cores list was out of range
    EligibleIndexOutOfRange { index: usize },
    /// A program file could not be read, or is not a regular file
    FileError { path: PathBuf },
    /// The home directory service could not establish a writable location
    HomeDirUnavailable { path: PathBuf },
    /// The main application config could not be parsed or written
    ConfigError { reason: String },
    /// An audio stream could not be opened with the requested spec
    AudioStreamFailed { key: i32 },
}

impl error::Error for CoreError {}

impl fmt::Display for CoreError {
    /// Returns a textual description of each enum variant for display purposes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::UnknownInstruction { opcode } => {
                write!(f, "an unrecognised opcode {:#06X} was decoded", opcode)
            }
            CoreError::NoEligibleCore { extension } => {
                write!(
                    f,
                    "no registered core accepted a program with extension '{}'",
                    extension
                )
            }
            CoreError::CoreConstructionFailed { name } => {
                write!(f, "the '{}' core failed to construct", name)
            }
            CoreError::EligibleIndexOutOfRange { index } => {
                write!(f, "eligible core index {} is out of range", index)
            }
            CoreError::FileError { path } => {
                write!(f, "file '{}' could not be accessed", path.display())
            }
            CoreError::HomeDirUnavailable { path } => {
                write!(
                    f,
                    "home directory '{}' is not available or not writable",
                    path.display()
                )
            }
            CoreError::ConfigError { reason } => {
                write!(f, "application config error: {}", reason)
            }
            CoreError::AudioStreamFailed { key } => {
                write!(f, "audio stream {} could not be opened", key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_instruction() {
        let error = CoreError::UnknownInstruction { opcode: 0x5FF2 };
        assert_eq!(
            error.to_string(),
            "an unrecognised opcode 0x5FF2 was decoded"
        );
    }

    #[test]
    fn test_display_no_eligible_core() {
        let error = CoreError::NoEligibleCore {
            extension: ".ch8".to_string(),
        };
        assert!(error.to_string().contains(".ch8"));
    }
}
