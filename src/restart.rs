//! Restart records holding the rigid velocities of all structures.
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{Read, Write};

/// The version of the restart record layout. Records of any other version are rejected.
pub const CIBFE_METHOD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StructureRestartData {
    pub translational_velocity: [f64; 3],
    pub rotational_velocity: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub object_name: String,
    pub version: u32,
    pub structures: Vec<StructureRestartData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestartError {
    VersionMismatch { found: u32, expected: u32 },
    ObjectNameMismatch { found: String, expected: String },
    StructureCountMismatch { found: usize, expected: usize },
    Malformed(String),
    Io(String),
}

impl Display for RestartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartError::VersionMismatch { found, expected } => write!(
                f,
                "Restart file version {found} is different from class version {expected}."
            ),
            RestartError::ObjectNameMismatch { found, expected } => {
                write!(f, "Restart record belongs to `{found}`, expected `{expected}`.")
            }
            RestartError::StructureCountMismatch { found, expected } => write!(
                f,
                "Restart record contains {found} structures, but {expected} are registered."
            ),
            RestartError::Malformed(message) => write!(f, "Malformed restart record: {message}"),
            RestartError::Io(message) => write!(f, "I/O error while accessing restart record: {message}"),
        }
    }
}

impl Error for RestartError {}

impl RestartRecord {
    /// A record with the current version.
    pub fn new(object_name: impl Into<String>, structures: Vec<StructureRestartData>) -> Self {
        Self {
            object_name: object_name.into(),
            version: CIBFE_METHOD_VERSION,
            structures,
        }
    }

    pub fn to_json(&self) -> Result<String, RestartError> {
        serde_json::to_string_pretty(self).map_err(|err| RestartError::Malformed(err.to_string()))
    }

    /// Parses a record and checks its version.
    pub fn from_json(json: &str) -> Result<Self, RestartError> {
        let record: Self = serde_json::from_str(json).map_err(|err| RestartError::Malformed(err.to_string()))?;
        record.check_version()?;
        Ok(record)
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result<(), RestartError> {
        serde_json::to_writer_pretty(&mut writer, self).map_err(|err| RestartError::Io(err.to_string()))?;
        writer.flush().map_err(|err| RestartError::Io(err.to_string()))?;
        info!(
            "wrote restart record for `{}` with {} structures",
            self.object_name,
            self.structures.len()
        );
        Ok(())
    }

    pub fn read_from(reader: impl Read) -> Result<Self, RestartError> {
        let record: Self = serde_json::from_reader(reader).map_err(|err| {
            if err.is_io() {
                RestartError::Io(err.to_string())
            } else {
                RestartError::Malformed(err.to_string())
            }
        })?;
        record.check_version()?;
        info!(
            "read restart record for `{}` with {} structures",
            record.object_name,
            record.structures.len()
        );
        Ok(record)
    }

    pub fn check_version(&self) -> Result<(), RestartError> {
        if self.version != CIBFE_METHOD_VERSION {
            Err(RestartError::VersionMismatch {
                found: self.version,
                expected: CIBFE_METHOD_VERSION,
            })
        } else {
            Ok(())
        }
    }

    /// Checks that the record can be restored into an object with the given name and number of
    /// structures.
    pub fn check_compatible(&self, object_name: &str, num_structures: usize) -> Result<(), RestartError> {
        self.check_version()?;
        if self.object_name != object_name {
            return Err(RestartError::ObjectNameMismatch {
                found: self.object_name.clone(),
                expected: object_name.to_string(),
            });
        }
        if self.structures.len() != num_structures {
            return Err(RestartError::StructureCountMismatch {
                found: self.structures.len(),
                expected: num_structures,
            });
        }
        Ok(())
    }
}
