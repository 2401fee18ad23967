use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::DeviceBus;
use crate::indi::{BlobMode, IndiError, IndiResult, PropertyState};

const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
const CCD_EXPOSURE_VALUE: &str = "CCD_EXPOSURE_VALUE";
/// BLOB vector carrying the primary sensor image.
const CCD1: &str = "CCD1";

/// Default time allowed for readout and transfer after the shutter closes.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the exposure state is checked while waiting for the image.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// INDI CCD/CMOS camera delivering frames as BLOBs.
pub struct Camera {
    bus: Arc<dyn DeviceBus>,
    device: String,
    download_timeout: Duration,
}

impl Camera {
    pub fn new(bus: Arc<dyn DeviceBus>, device: &str) -> Self {
        Self {
            bus,
            device: device.to_string(),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Take one exposure of `seconds` and write the image to `path`.
    ///
    /// Returns the number of bytes written.
    pub fn expose(&self, seconds: f64, path: &Path) -> IndiResult<usize> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(IndiError::InvalidArgument(format!(
                "exposure time must be positive, got {seconds}"
            )));
        }

        self.bus.enable_blob(&self.device, BlobMode::Also)?;
        self.bus.drain_blobs();

        let after = self.bus.update_count(&self.device, CCD_EXPOSURE);
        self.bus
            .set_number(&self.device, CCD_EXPOSURE, &[(CCD_EXPOSURE_VALUE, seconds)])?;
        debug!("{} exposing {seconds}s", self.device);

        let deadline = Instant::now() + Duration::from_secs_f64(seconds) + self.download_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.bus.receive_blob(remaining.min(POLL_INTERVAL)) {
                Ok(blob) if blob.device == self.device && blob.property == CCD1 => {
                    std::fs::write(path, &blob.data)?;
                    info!("Captured {}", path.display());
                    return Ok(blob.data.len());
                }
                Ok(blob) => debug!("Ignoring BLOB {}.{}", blob.device, blob.property),
                Err(IndiError::Timeout { .. }) => {
                    self.check_exposure_alert(after)?;
                    if remaining.is_zero() {
                        return Err(IndiError::Timeout {
                            device: self.device.clone(),
                            property: CCD_EXPOSURE.to_string(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_exposure_alert(&self, after: u64) -> IndiResult<()> {
        if self.bus.update_count(&self.device, CCD_EXPOSURE) <= after {
            return Ok(());
        }
        match self.bus.property(&self.device, CCD_EXPOSURE) {
            Some(prop) if prop.state == PropertyState::Alert => Err(IndiError::PropertyAlert {
                device: self.device.clone(),
                property: CCD_EXPOSURE.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mock::{MockBus, SentCommand};

    const CAMERA: &str = "ZWO CCD ASI183MM Pro";

    #[test]
    fn test_expose_writes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R_20240807_2230UT_0001.fits");
        let bus = Arc::new(MockBus::new().with_exposure_blob(b"SIMPLE  =".to_vec()));
        let camera = Camera::new(bus.clone(), CAMERA);

        let written = camera.expose(30.0, &path).unwrap();
        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&path).unwrap(), b"SIMPLE  =");
        assert!(bus
            .sent()
            .iter()
            .any(|cmd| matches!(cmd, SentCommand::EnableBlob { mode: BlobMode::Also, .. })));
    }

    #[test]
    fn test_expose_skips_guide_chip_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("L_0001.fits");
        let bus = Arc::new(
            MockBus::new()
                .with_exposure_blob_on("CCD2", b"guide".to_vec())
                .with_exposure_blob(b"SIMPLE  =".to_vec()),
        );
        let camera = Camera::new(bus, CAMERA);

        assert_eq!(camera.expose(1.0, &path).unwrap(), 9);
        assert_eq!(std::fs::read(&path).unwrap(), b"SIMPLE  =");
    }

    #[test]
    fn test_expose_alert_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MockBus::new().with_alert(CAMERA, CCD_EXPOSURE));
        let camera = Camera::new(bus, CAMERA);
        let err = camera.expose(1.0, &dir.path().join("x.fits")).unwrap_err();
        assert!(matches!(err, IndiError::PropertyAlert { .. }));
    }

    #[test]
    fn test_non_positive_exposure_rejected() {
        let camera = Camera::new(Arc::new(MockBus::new()), CAMERA);
        assert!(camera.expose(0.0, Path::new("/tmp/x.fits")).is_err());
        assert!(camera.expose(f64::NAN, Path::new("/tmp/x.fits")).is_err());
    }

    #[test]
    fn test_missing_image_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Camera::new(Arc::new(MockBus::new()), CAMERA)
            .with_download_timeout(Duration::from_millis(10));
        let err = camera.expose(0.01, &dir.path().join("x.fits")).unwrap_err();
        assert!(matches!(err, IndiError::Timeout { .. }));
    }
}
