//! Sensors module.
//!
use image::{ImageBuffer, ImageFormat, RgbImage};
use rscam::{Camera, Config, IntervalInfo, ResolutionInfo};

use crate::{CameraError, FrameSource};

/// Requested capture parameters. `None` picks the highest value the device supports.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub format: String,
    pub resolution: Option<(u32, u32)>,
    pub frame_rate: Option<(u32, u32)>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
        }
    }
}

/// Started V4L2 camera.
pub struct V4lCamera {
    device: String,
    cam: Option<Camera>,
    format: [u8; 4],
    resolution: (u32, u32),
}

/// Open the first device of `devices` which can be started.
///
/// Devices are tried in order, so put the preferred (e.g. back-facing) camera first. If none can
/// be started, the error of the last attempt is returned.
pub fn open_first(devices: &[String], settings: &CameraSettings) -> Result<V4lCamera, CameraError> {
    let mut last_err = CameraError::NoneConfigured;
    for device in devices {
        match V4lCamera::open(device, settings) {
            Ok(cam) => return Ok(cam),
            Err(err) => {
                log::warn!("Could not start camera {}: {}", device, err);
                last_err = err;
            }
        }
    }

    Err(last_err)
}

impl V4lCamera {
    /// Open and start `device_name`, returning once the first frame arrived.
    pub fn open(device_name: &str, settings: &CameraSettings) -> Result<Self, CameraError> {
        let mut cam =
            Camera::new(device_name).map_err(|err| CameraError::from_io(device_name, err))?;
        log_supported_formats(&cam, &settings.format);

        let format = parse_fourcc(device_name, &settings.format)?;
        log::info!("Using camera {}", device_name);

        let resolution = match settings.resolution {
            Some(resolution) => resolution,
            None => {
                let info = cam
                    .resolutions(&format)
                    .map_err(|err| map_rscam_err(device_name, err))?;
                log::debug!("Found resolutions: {:?}", &info);
                max_resolution(&info).ok_or_else(|| CameraError::Unsupported {
                    device: device_name.to_owned(),
                    what: "any resolution".to_owned(),
                })?
            }
        };

        let frame_rate = match settings.frame_rate {
            Some(frame_rate) => frame_rate,
            None => {
                let info = cam
                    .intervals(&format, resolution)
                    .map_err(|err| map_rscam_err(device_name, err))?;
                log::debug!("Found frame rates: {:?}", &info);
                max_frame_rate(&info).ok_or_else(|| CameraError::Unsupported {
                    device: device_name.to_owned(),
                    what: "any frame interval".to_owned(),
                })?
            }
        };

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format: &format,
            ..Default::default()
        })
        .map_err(|err| map_rscam_err(device_name, err))?;

        // The driver may adjust the resolution, trust the first frame instead of the request
        let first = cam.capture().map_err(CameraError::Capture)?;
        let resolution = first.resolution;
        log::info!(
            "Camera {} ready at {}x{}, interval {}/{} s",
            device_name,
            resolution.0,
            resolution.1,
            frame_rate.0,
            frame_rate.1
        );

        Ok(Self {
            device: device_name.to_owned(),
            cam: Some(cam),
            format,
            resolution,
        })
    }
}

impl FrameSource for V4lCamera {
    fn describe(&self) -> String {
        format!(
            "{} ({})",
            self.device,
            String::from_utf8_lossy(&self.format)
        )
    }

    fn dimensions(&self) -> (u32, u32) {
        self.resolution
    }

    fn capture(&mut self) -> Result<RgbImage, CameraError> {
        let cam = self.cam.as_ref().ok_or(CameraError::Released)?;
        let frame = cam.capture().map_err(CameraError::Capture)?;

        match &self.format {
            b"MJPG" => Ok(image::load_from_memory_with_format(&frame[..], ImageFormat::Jpeg)?
                .to_rgb8()),
            _ => {
                let (width, height) = frame.resolution;
                ImageBuffer::from_raw(width, height, frame[..].to_vec()).ok_or_else(|| {
                    CameraError::Unsupported {
                        device: self.device.clone(),
                        what: format!("frame buffer of {} bytes", frame.len()),
                    }
                })
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            if let Err(err) = cam.stop() {
                log::warn!("Error stopping camera {}: {}", self.device, err);
            }
            log::info!("Released camera {}", self.device);
        }
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Only formats we can turn into RGB frames are accepted.
fn parse_fourcc(device: &str, format: &str) -> Result<[u8; 4], CameraError> {
    match format.as_bytes() {
        b"MJPG" => Ok(*b"MJPG"),
        b"RGB3" => Ok(*b"RGB3"),
        _ => Err(CameraError::Unsupported {
            device: device.to_owned(),
            what: format!("format {format}"),
        }),
    }
}

fn map_rscam_err(device: &str, err: rscam::Error) -> CameraError {
    match err {
        rscam::Error::Io(err) => CameraError::from_io(device, err),
        other => CameraError::Unsupported {
            device: device.to_owned(),
            what: other.to_string(),
        },
    }
}

/// Get the maximum supported resolution.
fn max_resolution(resolution_info: &ResolutionInfo) -> Option<(u32, u32)> {
    match resolution_info {
        ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        ResolutionInfo::Stepwise { max, .. } => Some(*max),
    }
}

/// Get the highest frame rate as a `(numerator, denominator)` frame interval.
fn max_frame_rate(interval_info: &IntervalInfo) -> Option<(u32, u32)> {
    match interval_info {
        IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, _)| *numerator > 0)
            // The shortest interval is the highest frame rate
            .max_by(|a, b| {
                let rate_a = a.1 as f64 / a.0 as f64;
                let rate_b = b.1 as f64 / b.0 as f64;
                rate_a.total_cmp(&rate_b)
            })
            .copied(),
        // Stepwise intervals are given as seconds per frame, so `min` is the fastest
        IntervalInfo::Stepwise { min, .. } => Some(*min),
    }
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(Result::ok).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
