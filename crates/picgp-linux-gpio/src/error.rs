//! Error types for the Linux GPIO backend

use picgp_core::gpio::Offset;
use thiserror::Error;

/// Linux GPIO specific errors
#[derive(Debug, Error)]
pub enum LinuxGpioError {
    /// Failed to open GPIO chip
    #[error("Failed to open GPIO chip '{path}': {source}")]
    ChipOpenFailed {
        path: String,
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed to request a GPIO line
    #[error("Failed to request GPIO line {offset}: {source}")]
    LineRequestFailed {
        offset: Offset,
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed to set GPIO line value
    #[error("Failed to set GPIO line value: {0}")]
    SetValueFailed(#[source] gpiocdev::Error),

    /// Failed to get GPIO line value
    #[error("Failed to get GPIO line value: {0}")]
    GetValueFailed(#[source] gpiocdev::Error),

    /// Failed to reconfigure GPIO line
    #[error("Failed to reconfigure GPIO line: {0}")]
    ReconfigureFailed(#[source] gpiocdev::Error),

    /// Line offset past the end of the chip
    #[error("GPIO line {offset} does not exist on {chip} ({lines} lines)")]
    NoSuchLine {
        chip: String,
        offset: Offset,
        lines: u32,
    },

    /// Line used before it was requested
    #[error("GPIO line {0} has not been requested")]
    NotRequested(Offset),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// GPIO chip or device not specified
    #[error("No GPIO chip specified. Use dev=/dev/gpiochipN or gpiochip=N")]
    NoDevice,

    /// Invalid GPIO line number
    #[error("Invalid GPIO line number for {name}: {value}")]
    InvalidLineNumber { name: &'static str, value: String },

    /// Two ICSP signals on the same line
    #[error("GPIO line {0} is assigned to more than one signal")]
    DuplicateLine(Offset),
}

impl LinuxGpioError {
    /// Line the error refers to, when it names one
    pub fn offset(&self) -> Option<Offset> {
        match self {
            Self::LineRequestFailed { offset, .. } | Self::NoSuchLine { offset, .. } => Some(*offset),
            Self::NotRequested(offset) | Self::DuplicateLine(offset) => Some(*offset),
            _ => None,
        }
    }

    /// Convert into the core error for a line on `chip`
    ///
    /// Failures to open the chip or acquire a line, including bad line
    /// options, are `DeviceUnavailable`; failures on a line already held are
    /// plain I/O errors.
    pub fn into_core(self, chip: &str, offset: Offset) -> picgp_core::Error {
        match self {
            Self::SetValueFailed(_) | Self::GetValueFailed(_) | Self::ReconfigureFailed(_) => {
                picgp_core::Error::Io(self.to_string())
            }
            other => picgp_core::Error::DeviceUnavailable {
                chip: chip.to_string(),
                offset: other.offset().unwrap_or(offset),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for Linux GPIO operations
pub type Result<T> = std::result::Result<T, LinuxGpioError>;

#[cfg(test)]
mod tests {
    use super::*;
    use picgp_core::ErrorKind;

    #[test]
    fn test_acquisition_errors_are_device_unavailable() {
        let err = LinuxGpioError::NoSuchLine {
            chip: "/dev/gpiochip0".to_string(),
            offset: 60,
            lines: 54,
        }
        .into_core("/dev/gpiochip0", 22);
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert!(matches!(err, picgp_core::Error::DeviceUnavailable { offset: 60, .. }));

        let err = LinuxGpioError::InvalidLineNumber {
            name: "pgd",
            value: "x".to_string(),
        }
        .into_core("/dev/gpiochip0", 22);
        assert!(matches!(err, picgp_core::Error::DeviceUnavailable { offset: 22, .. }));
    }

    #[test]
    fn test_duplicate_line_names_its_offset() {
        let err = LinuxGpioError::DuplicateLine(17).into_core("/dev/gpiochip0", 22);
        assert!(matches!(err, picgp_core::Error::DeviceUnavailable { offset: 17, .. }));
    }
}
