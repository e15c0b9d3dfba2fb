//! Interleaved audio facades over ring buffer roles
//!
//! Send interleaved audio frames to another thread, wait-free. The writer
//! lives on the real-time side and can only enqueue; the reader lives on a
//! worker and can only dequeue. Neither can change role after setup.

use crate::audio::buffer::{Consumer, Producer, SharedRing};
use crate::error::BufferError;

/// Producer-only facade for interleaved `f32` audio
pub struct AudioWriter {
    producer: Producer<f32>,
}

impl AudioWriter {
    pub fn new(producer: Producer<f32>) -> Self {
        Self { producer }
    }

    /// Claim the producer role of a shared region
    ///
    /// Fails when the region does not hold `f32` samples or already has a
    /// producer.
    pub fn from_shared(ring: &SharedRing) -> Result<Self, BufferError> {
        Ok(Self::new(ring.producer::<f32>()?))
    }

    /// Enqueue interleaved frames
    ///
    /// Returns how many samples were accepted. A count below `frame.len()`
    /// means the consumer is not keeping up: the caller logs it and moves
    /// on, it never retries. The frame should hold a whole number of
    /// channel frames.
    pub fn enqueue(&mut self, frame: &[f32]) -> usize {
        self.producer.push(frame)
    }

    /// Samples that can be enqueued right now. Advisory, may be stale.
    pub fn available_write(&self) -> usize {
        self.producer.available_write()
    }
}

/// Consumer-only facade for interleaved `f32` audio
pub struct AudioReader {
    consumer: Consumer<f32>,
}

impl AudioReader {
    pub fn new(consumer: Consumer<f32>) -> Self {
        Self { consumer }
    }

    /// Claim the consumer role of a shared region
    pub fn from_shared(ring: &SharedRing) -> Result<Self, BufferError> {
        Ok(Self::new(ring.consumer::<f32>()?))
    }

    /// Dequeue up to `out.len()` samples, returns the count read
    pub fn dequeue(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop(out)
    }

    /// Samples waiting to be dequeued. Advisory, may be stale.
    pub fn available_read(&self) -> usize {
        self.consumer.available_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::SampleFormat;

    #[test]
    fn test_enqueue_reports_overrun() {
        let ring = SharedRing::with_capacity::<f32>(300).unwrap();
        let mut writer = AudioWriter::from_shared(&ring).unwrap();
        let mut reader = AudioReader::from_shared(&ring).unwrap();

        let frame = [0.5f32; 256];
        assert_eq!(writer.enqueue(&frame), 256);
        assert_eq!(writer.available_write(), 44);

        let written = writer.enqueue(&frame);
        assert!(written < frame.len());
        assert_eq!(written, 44);

        let mut out = vec![0.0f32; 512];
        assert_eq!(reader.dequeue(&mut out), 300);
        assert_eq!(reader.available_read(), 0);
    }

    #[test]
    fn test_writer_requires_f32_region() {
        let ring = SharedRing::with_capacity::<i16>(64).unwrap();
        assert_eq!(
            AudioWriter::from_shared(&ring).err(),
            Some(BufferError::ElementMismatch {
                expected: SampleFormat::F32,
                found: SampleFormat::I16,
            })
        );
    }
}
