use std::io;

use thiserror::Error;

/// `errno` for "Device or resource busy".
const EBUSY: i32 = 16;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("access to {0} was denied")]
    PermissionDenied(String),
    #[error("no camera found at {0}")]
    NoDevice(String),
    #[error("camera {0} is busy")]
    Busy(String),
    #[error("camera {device} does not support {what}")]
    Unsupported { device: String, what: String },
    #[error("no camera device configured")]
    NoneConfigured,
    #[error("failed to capture frame: {0}")]
    Capture(#[source] io::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("frame source was released")]
    Released,
}

impl CameraError {
    /// Classify an I/O error raised while opening or starting `device`.
    pub fn from_io(device: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(device.to_owned()),
            io::ErrorKind::NotFound => CameraError::NoDevice(device.to_owned()),
            _ if err.raw_os_error() == Some(EBUSY) => CameraError::Busy(device.to_owned()),
            _ => CameraError::Unsupported {
                device: device.to_owned(),
                what: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn io_errors_map_to_setup_kinds() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            CameraError::from_io("/dev/video0", denied),
            CameraError::PermissionDenied(dev) if dev == "/dev/video0"
        ));

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(
            CameraError::from_io("/dev/video3", missing),
            CameraError::NoDevice(_)
        ));

        let busy = io::Error::from_raw_os_error(EBUSY);
        assert!(matches!(
            CameraError::from_io("/dev/video0", busy),
            CameraError::Busy(_)
        ));
    }
}
