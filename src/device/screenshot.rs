//! Screenshot capture with bounded retries and a deterministic fallback.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, RgbImage};

use super::runner::CommandOutput;
use super::DeviceError;
use crate::retry::RetryPolicy;

/// Fallback image width.
pub const FALLBACK_WIDTH: u32 = 1080;
/// Fallback image height.
pub const FALLBACK_HEIGHT: u32 = 2400;

/// Represents a captured screenshot, always PNG-encoded.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// A placeholder was substituted because capture failed.
    pub is_fallback: bool,
    /// The device refused capture (payment or other protected screens).
    pub is_sensitive: bool,
}

impl Screenshot {
    /// Create a screenshot from PNG bytes and known dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data,
            is_fallback: false,
            is_sensitive: false,
        }
    }

    /// Decode any supported image format and re-encode it as PNG.
    ///
    /// The format is sniffed from content, so a JPEG saved as `.png` works.
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self, DeviceError> {
        let img = image::load_from_memory(bytes)?;
        let (width, height) = (img.width(), img.height());

        let data = if image::guess_format(bytes)? == ImageFormat::Png {
            bytes.to_vec()
        } else {
            encode_png(&img)?
        };

        Ok(Self::new(data, width, height))
    }

    /// Create a black fallback image when capture fails.
    pub fn fallback(is_sensitive: bool) -> Result<Self, DeviceError> {
        let black = RgbImage::from_pixel(FALLBACK_WIDTH, FALLBACK_HEIGHT, image::Rgb([0, 0, 0]));
        let data = encode_png(&DynamicImage::ImageRgb8(black))?;

        Ok(Self {
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            data,
            is_fallback: true,
            is_sensitive,
        })
    }

    /// Base64 of the PNG bytes.
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// Decode back into an image.
    pub fn to_image(&self) -> Result<DynamicImage, DeviceError> {
        Ok(image::load_from_memory_with_format(&self.data, ImageFormat::Png)?)
    }
}

pub(crate) fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, DeviceError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Capture timing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Bound on each device-side capture command.
    pub timeout: Duration,
    /// Bound on pulling the file to the host.
    pub pull_timeout: Duration,
    /// Attempts and the fixed delay between them.
    pub retry: RetryPolicy,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(10),
            retry: RetryPolicy::fixed(3, Duration::from_secs(1)),
        }
    }
}

impl CaptureOptions {
    /// Set the capture command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of attempts.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry = self.retry.with_max_attempts(retry_count);
        self
    }

    /// Set the fixed delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry = RetryPolicy::fixed(self.retry.max_attempts, delay);
        self
    }

    /// Set the pull timeout.
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }
}

/// Which device-side capture command to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureVariant {
    Primary,
    Alternate,
}

/// Device-specific capture steps driven by [`capture_with_retry`].
#[async_trait]
pub trait CaptureTarget: Send + Sync {
    /// Write a screenshot to the device-side path.
    async fn run_capture(
        &self,
        variant: CaptureVariant,
        timeout: Duration,
    ) -> Result<CommandOutput, DeviceError>;

    /// Copy the device-side file to `local`.
    async fn pull(&self, local: &Path, timeout: Duration) -> Result<(), DeviceError>;
}

/// Whether capture output reports a failure.
pub fn output_indicates_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("fail") || lower.contains("error") || lower.contains("not found")
}

/// Capture a screenshot, retrying with a fixed delay.
///
/// Never fails because of the device: after the last failed attempt a
/// fallback image with `is_fallback = true` is returned. An `Err` means the
/// fallback itself could not be produced.
pub async fn capture_with_retry(
    target: &dyn CaptureTarget,
    options: &CaptureOptions,
) -> Result<Screenshot, DeviceError> {
    let max_attempts = options.retry.max_attempts.max(1);
    let mut last_blocked = false;

    for attempt in 1..=max_attempts {
        let local = temp_screenshot_path();

        match capture_once(target, options, &local).await {
            Ok(screenshot) => {
                remove_quietly(&local).await;
                return Ok(screenshot);
            }
            Err(e) => {
                remove_quietly(&local).await;
                last_blocked = matches!(e, DeviceError::CaptureBlocked(_));

                if attempt < max_attempts {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "screenshot attempt failed, retrying"
                    );
                    options.retry.wait(attempt).await;
                } else {
                    tracing::error!(
                        attempts = max_attempts,
                        error = %e,
                        "screenshot failed, using fallback image"
                    );
                }
            }
        }
    }

    Screenshot::fallback(last_blocked)
}

async fn capture_once(
    target: &dyn CaptureTarget,
    options: &CaptureOptions,
    local: &Path,
) -> Result<Screenshot, DeviceError> {
    let output = target
        .run_capture(CaptureVariant::Primary, options.timeout)
        .await?
        .combined();

    if output_indicates_failure(&output) {
        tracing::debug!(output = %output.trim(), "primary capture failed, trying alternate");
        let output = target
            .run_capture(CaptureVariant::Alternate, options.timeout)
            .await?
            .combined();
        if output_indicates_failure(&output) {
            return Err(DeviceError::CaptureBlocked(output.trim().to_string()));
        }
    }

    target.pull(local, options.pull_timeout).await?;

    let bytes = tokio::fs::read(local).await?;
    tokio::task::spawn_blocking(move || Screenshot::from_image_bytes(&bytes)).await?
}

fn temp_screenshot_path() -> PathBuf {
    std::env::temp_dir().join(format!("screenshot_{}.png", uuid::Uuid::new_v4()))
}

async fn remove_quietly(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp screenshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_options(retry_count: u32) -> CaptureOptions {
        CaptureOptions::default()
            .with_retry_count(retry_count)
            .with_retry_delay(Duration::ZERO)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();
        buffer.into_inner()
    }

    /// Fails every capture with a transport error.
    struct AlwaysFails {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CaptureTarget for AlwaysFails {
        async fn run_capture(
            &self,
            variant: CaptureVariant,
            _timeout: Duration,
        ) -> Result<CommandOutput, DeviceError> {
            if variant == CaptureVariant::Primary {
                self.attempts.fetch_add(1, Ordering::SeqCst);
            }
            Err(DeviceError::Connection("device offline".to_string()))
        }

        async fn pull(&self, _local: &Path, _timeout: Duration) -> Result<(), DeviceError> {
            unreachable!("pull must not run when capture fails")
        }
    }

    /// Primary command reports failure, alternate works, pull writes `bytes`.
    struct AlternateWorks {
        bytes: Vec<u8>,
        alternate_calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CaptureTarget for AlternateWorks {
        async fn run_capture(
            &self,
            variant: CaptureVariant,
            _timeout: Duration,
        ) -> Result<CommandOutput, DeviceError> {
            match variant {
                CaptureVariant::Primary => Ok(CommandOutput::ok("/system/bin/sh: screenshot: not found")),
                CaptureVariant::Alternate => {
                    self.alternate_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(CommandOutput::ok("ok"))
                }
            }
        }

        async fn pull(&self, local: &Path, _timeout: Duration) -> Result<(), DeviceError> {
            tokio::fs::write(local, &self.bytes).await?;
            Ok(())
        }
    }

    /// Both variants report a blocked screen.
    struct Blocked;

    #[async_trait]
    impl CaptureTarget for Blocked {
        async fn run_capture(
            &self,
            _variant: CaptureVariant,
            _timeout: Duration,
        ) -> Result<CommandOutput, DeviceError> {
            Ok(CommandOutput::ok("Screenshot failed: secure layer"))
        }

        async fn pull(&self, _local: &Path, _timeout: Duration) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn test_fallback_screenshot() {
        let screenshot = Screenshot::fallback(true).unwrap();
        assert_eq!(screenshot.width, 1080);
        assert_eq!(screenshot.height, 2400);
        assert!(screenshot.is_fallback);
        assert!(screenshot.is_sensitive);
        assert!(!screenshot.base64().is_empty());
    }

    #[test]
    fn test_decode_ignores_extension_and_converts_jpeg() {
        let screenshot = Screenshot::from_image_bytes(&jpeg_bytes(40, 80)).unwrap();
        assert_eq!((screenshot.width, screenshot.height), (40, 80));
        assert_eq!(image::guess_format(&screenshot.data).unwrap(), ImageFormat::Png);
        assert!(!screenshot.is_fallback);
    }

    #[test]
    fn test_failure_tokens() {
        assert!(output_indicates_failure("Screenshot FAILED"));
        assert!(output_indicates_failure("error: device offline"));
        assert!(output_indicates_failure("command not found"));
        assert!(!output_indicates_failure("ScreenCapture success"));
    }

    #[tokio::test]
    async fn test_capture_retry_bound_returns_fallback() {
        let attempts = Arc::new(AtomicU32::new(0));
        let target = AlwaysFails { attempts: attempts.clone() };

        let screenshot = capture_with_retry(&target, &fast_options(3)).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(screenshot.is_fallback);
        assert!(!screenshot.is_sensitive);
    }

    #[tokio::test]
    async fn test_alternate_variant_used_after_primary_failure() {
        let alternate_calls = Arc::new(AtomicU32::new(0));
        let target = AlternateWorks {
            bytes: png_bytes(28, 56),
            alternate_calls: alternate_calls.clone(),
        };

        let screenshot = capture_with_retry(&target, &fast_options(3)).await.unwrap();

        assert_eq!(alternate_calls.load(Ordering::SeqCst), 1);
        assert!(!screenshot.is_fallback);
        assert_eq!((screenshot.width, screenshot.height), (28, 56));
    }

    #[tokio::test]
    async fn test_blocked_screen_yields_sensitive_fallback() {
        let screenshot = capture_with_retry(&Blocked, &fast_options(2)).await.unwrap();
        assert!(screenshot.is_fallback);
        assert!(screenshot.is_sensitive);
    }
}
