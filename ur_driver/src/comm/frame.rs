//! Fixed-size frames of big-endian `i32` values.
//!
//! Every driver-hosted socket (reverse, trajectory, script command) speaks
//! this framing. Floating point values travel as fixed point, multiplied by
//! [`MULT_JOINTSTATE`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DriverError, Result};

/// Fixed point multiplier for floating point values on the wire.
pub const MULT_JOINTSTATE: f64 = 1_000_000.0;

/// Converts `value` to fixed point. Values that are not finite or do not
/// fit an `i32` once scaled are refused rather than clamped.
pub fn scale(value: f64) -> Result<i32> {
    let scaled = (value * MULT_JOINTSTATE).round();
    if scaled.is_finite() && scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64 {
        Ok(scaled as i32)
    } else {
        Err(DriverError::InvalidArgument(format!(
            "{value} cannot be sent, the wire carries at most +/-{:.6}",
            i32::MAX as f64 / MULT_JOINTSTATE
        )))
    }
}

pub fn unscale(value: i32) -> f64 {
    value as f64 / MULT_JOINTSTATE
}

/// Builds one frame of `slots` values, zero padding whatever is left.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    slots: usize,
    written: usize,
}

impl FrameWriter {
    pub fn new(slots: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(slots * 4),
            slots,
            written: 0,
        }
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        debug_assert!(self.written < self.slots, "frame overflow");
        if self.written < self.slots {
            self.buf.put_i32(value);
            self.written += 1;
        }
        self
    }

    pub fn put_scaled(&mut self, value: f64) -> Result<&mut Self> {
        Ok(self.put_i32(scale(value)?))
    }

    pub fn put_scaled_all(&mut self, values: &[f64]) -> Result<&mut Self> {
        for value in values {
            self.put_scaled(*value)?;
        }
        Ok(self)
    }

    pub fn put_i32_all(&mut self, values: &[i32]) -> &mut Self {
        for value in values {
            self.put_i32(*value);
        }
        self
    }

    /// Slots not written yet.
    pub fn remaining(&self) -> usize {
        self.slots - self.written
    }

    pub fn finish(mut self) -> Bytes {
        while self.written < self.slots {
            self.buf.put_i32(0);
            self.written += 1;
        }
        self.buf.freeze()
    }
}

/// Splits one complete frame of `slots` values off the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched while the frame is incomplete.
pub fn take_i32_frame(buf: &mut BytesMut, slots: usize) -> Option<Vec<i32>> {
    let len = slots * 4;
    if buf.len() < len {
        return None;
    }
    let mut frame = buf.split_to(len);
    Some((0..slots).map(|_| frame.get_i32()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_zero_padded() {
        let mut writer = FrameWriter::new(4);
        writer.put_i32(7).put_scaled(0.5).unwrap();
        let frame = writer.finish();
        assert_eq!(frame.len(), 16);

        let mut buf = BytesMut::from(&frame[..]);
        let values = take_i32_frame(&mut buf, 4).unwrap();
        assert_eq!(values, vec![7, 500_000, 0, 0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut buf = BytesMut::new();
        buf.put_i32(1);
        buf.put_u8(0);
        assert!(take_i32_frame(&mut buf, 2).is_none());
        assert_eq!(buf.len(), 5);

        buf.put_slice(&[0, 0, 2]);
        assert_eq!(take_i32_frame(&mut buf, 2), Some(vec![1, 2]));
    }

    #[test]
    fn test_scale_rounds_to_nearest_micro_unit() {
        assert_eq!(scale(-1.5707963).unwrap(), -1_570_796);
        assert_eq!(scale(0.0000004).unwrap(), 0);
        assert!((unscale(scale(2.25).unwrap()) - 2.25).abs() < 1e-9);
        assert_eq!(scale(-2147.483648).unwrap(), i32::MIN);
    }

    #[test]
    fn test_unrepresentable_values_are_refused() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 2147.484, -3000.0, 5000.0] {
            assert!(
                matches!(scale(value), Err(DriverError::InvalidArgument(_))),
                "{value} should be refused"
            );
        }
    }

    #[test]
    fn test_refused_value_stops_the_frame() {
        let mut writer = FrameWriter::new(3);
        assert!(writer.put_scaled_all(&[1.0, f64::NAN, 2.0]).is_err());
        // only the value before the bad one was written
        assert_eq!(writer.remaining(), 2);
    }
}
