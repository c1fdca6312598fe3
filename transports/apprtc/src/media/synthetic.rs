//! Synthetic test-pattern capture source

use super::source::{CaptureProvider, CaptureProviderFactory, RawFrame, VideoSize};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Moving luma gradient in I420, one frame per call
pub struct TestPatternCapture {
    size: VideoSize,
    frame_index: u64,
    closed: bool,
}

impl TestPatternCapture {
    /// Create a source producing frames of `size`
    pub fn new(size: VideoSize) -> Result<Self> {
        if size.width == 0 || size.height == 0 || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(Error::CaptureError(format!(
                "test pattern needs even, non-zero dimensions, got {}",
                size
            )));
        }

        Ok(Self {
            size,
            frame_index: 0,
            closed: false,
        })
    }

    /// Frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.frame_index
    }
}

impl CaptureProvider for TestPatternCapture {
    fn acquire_frame(&mut self) -> Result<RawFrame> {
        if self.closed {
            return Err(Error::CaptureError("capture source is closed".to_string()));
        }

        let width = self.size.width as usize;
        let height = self.size.height as usize;
        let luma = width * height;
        let chroma = luma / 4;

        let mut data = BytesMut::with_capacity(luma + 2 * chroma);
        let shift = self.frame_index as usize;
        for y in 0..height {
            for x in 0..width {
                data.put_u8(((x + y + shift) % 256) as u8);
            }
        }
        data.resize(luma + 2 * chroma, 128);

        self.frame_index += 1;
        Ok(RawFrame::new(self.size, data.freeze()))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Opens a fresh test pattern per connection
#[derive(Debug, Clone, Copy)]
pub struct TestPatternFactory {
    size: VideoSize,
}

impl TestPatternFactory {
    /// Factory for sources of `size`
    pub fn new(size: VideoSize) -> Self {
        Self { size }
    }
}

impl CaptureProviderFactory for TestPatternFactory {
    fn create(&self) -> Result<Box<dyn CaptureProvider>> {
        Ok(Box::new(TestPatternCapture::new(self.size)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut capture = TestPatternCapture::new(VideoSize::new(4, 2)).unwrap();
        let frame = capture.acquire_frame().unwrap();

        assert_eq!(frame.size, VideoSize::new(4, 2));
        assert_eq!(frame.data.len(), 8 + 2 + 2);
        assert_eq!(&frame.data[..4], &[0, 1, 2, 3]);
        assert_eq!(&frame.data[8..], &[128; 4]);

        let next = capture.acquire_frame().unwrap();
        assert_eq!(&next.data[..4], &[1, 2, 3, 4]);
        assert_eq!(capture.frames_produced(), 2);
    }

    #[test]
    fn test_closed_source_fails() {
        let mut capture = TestPatternFactory::new(VideoSize::new(2, 2)).create().unwrap();
        capture.close().unwrap();
        assert!(matches!(capture.acquire_frame(), Err(Error::CaptureError(_))));
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        assert!(TestPatternCapture::new(VideoSize::new(3, 2)).is_err());
        assert!(TestPatternCapture::new(VideoSize::new(0, 2)).is_err());
    }
}
