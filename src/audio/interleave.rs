//! Planar <-> interleaved sample conversion
//!
//! The render context works on planar blocks (one slice per channel) while
//! ring buffers and device streams carry interleaved frames.

use crate::error::InterleaveError;

/// Interleave planar `input` into `output`
///
/// `output[i * channels + c] = input[c][i]`. Fails when the channels differ
/// in length or `output` is not exactly `channels * block_len` long.
pub fn interleave<T: Copy>(input: &[&[T]], output: &mut [T]) -> Result<(), InterleaveError> {
    let channels = input.len();
    let block_len = check_block(input.iter().map(|c| c.len()))?;
    let expected = channels * block_len;
    if output.len() != expected {
        return Err(InterleaveError::SizeMismatch {
            expected,
            actual: output.len(),
        });
    }

    for (c, channel) in input.iter().enumerate() {
        for (i, &sample) in channel.iter().enumerate() {
            output[i * channels + c] = sample;
        }
    }
    Ok(())
}

/// Split interleaved `input` into planar `output`
pub fn deinterleave<T: Copy>(input: &[T], output: &mut [&mut [T]]) -> Result<(), InterleaveError> {
    let channels = output.len();
    let block_len = check_block(output.iter().map(|c| c.len()))?;
    let expected = channels * block_len;
    if input.len() != expected {
        return Err(InterleaveError::SizeMismatch {
            expected,
            actual: input.len(),
        });
    }

    for (c, channel) in output.iter_mut().enumerate() {
        for (i, sample) in channel.iter_mut().enumerate() {
            *sample = input[i * channels + c];
        }
    }
    Ok(())
}

fn check_block(mut lengths: impl Iterator<Item = usize>) -> Result<usize, InterleaveError> {
    let Some(block_len) = lengths.next() else {
        return Ok(0);
    };
    for (offset, len) in lengths.enumerate() {
        if len != block_len {
            return Err(InterleaveError::RaggedChannel {
                channel: offset + 1,
                expected: block_len,
                actual: len,
            });
        }
    }
    Ok(block_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_stereo_block() {
        let left: Vec<f32> = (0..128).map(|i| i as f32).collect();
        let right: Vec<f32> = (0..128).map(|i| -(i as f32)).collect();
        let mut output = vec![0.0f32; 256];

        interleave(&[&left[..], &right[..]], &mut output).unwrap();

        for i in 0..128 {
            assert_eq!(output[2 * i], left[i]);
            assert_eq!(output[2 * i + 1], right[i]);
        }
    }

    #[test]
    fn test_interleave_rejects_wrong_output_len() {
        let left = [0.0f32; 128];
        let right = [0.0f32; 128];
        let mut output = vec![0.0f32; 255];

        let err = interleave(&[&left[..], &right[..]], &mut output).unwrap_err();
        assert_eq!(
            err,
            InterleaveError::SizeMismatch {
                expected: 256,
                actual: 255
            }
        );
    }

    #[test]
    fn test_interleave_rejects_ragged_channels() {
        let left = [0.0f32; 4];
        let right = [0.0f32; 3];
        let mut output = [0.0f32; 8];

        assert!(matches!(
            interleave(&[&left[..], &right[..]], &mut output),
            Err(InterleaveError::RaggedChannel { channel: 1, .. })
        ));
    }

    #[test]
    fn test_deinterleave_inverts_interleave() {
        let interleaved = [1, 10, 2, 20, 3, 30];
        let mut left = [0; 3];
        let mut right = [0; 3];

        deinterleave(&interleaved, &mut [&mut left[..], &mut right[..]]).unwrap();
        assert_eq!(left, [1, 2, 3]);
        assert_eq!(right, [10, 20, 30]);
    }
}
