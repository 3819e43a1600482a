//! # Pre-record buffer

use crate::frame::Frame;
use std::collections::VecDeque;

/// Bounded FIFO of the most recently seen frames.
///
/// The capacity is passed in on every push, so that a live change of the
/// `pre-motion-record-duration` parameter takes effect on the next frame.
#[derive(Default)]
pub struct PreRecordBuffer {
    frames: VecDeque<Frame>,
}

impl PreRecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame, evicting the oldest ones so that at most `capacity` frames are kept.
    ///
    /// With a capacity of 0 the frame is dropped and the buffer emptied.
    pub fn push(&mut self, frame: Frame, capacity: usize) {
        if capacity == 0 {
            self.frames.clear();
            return;
        }

        while self.frames.len() >= capacity {
            self.frames.pop_front();
        }

        self.frames.push_back(frame);
    }

    /// Hand off all buffered frames, oldest first, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> Frame {
        Frame::from_rgb(ts, 1, 1, vec![0, 0, 0]).unwrap()
    }

    #[test]
    fn bounded() {
        let mut buf = PreRecordBuffer::new();

        for ts in 0..20 {
            buf.push(frame(ts), 5);
            assert!(buf.len() <= 5);
        }

        let frames = buf.take();
        assert!(buf.is_empty());
        assert_eq!(
            frames.iter().map(Frame::ts).collect::<Vec<_>>(),
            vec![15, 16, 17, 18, 19]
        );
    }

    #[test]
    fn shrinking_capacity() {
        let mut buf = PreRecordBuffer::new();

        for ts in 0..10 {
            buf.push(frame(ts), 10);
        }

        buf.push(frame(10), 3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.take().last().map(Frame::ts), Some(10));
    }

    #[test]
    fn zero_capacity_discards() {
        let mut buf = PreRecordBuffer::new();
        buf.push(frame(0), 2);
        buf.push(frame(1), 0);
        assert!(buf.is_empty());
    }
}
