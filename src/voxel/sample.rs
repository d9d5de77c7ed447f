//! Voxel surface sample type and its fixed-width codec

use std::io::{self, Read, Write};

use bytemuck::{Pod, Zeroable};

/// Convert an 8-bit sRGB-ish channel triple to linear [0, 1] floats
pub fn rgb8_to_f32(r: u8, g: u8, b: u8) -> [f32; 3] {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
}

/// Single voxel sample - exactly 16 bytes, laid out for GPU storage buffers
///
/// Negative distance = inside the surface, positive = outside.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Sample {
    /// Signed distance to the surface
    pub distance: f32,
    /// Linear RGB color carried to the mesh
    pub color: [f32; 3],
}

impl Sample {
    /// Padding value for absent neighbors: as far outside as representable
    pub const OUTSIDE: Sample = Sample {
        distance: f32::MAX,
        color: [0.0; 3],
    };

    /// Create a sample from a distance and linear color
    pub fn new(distance: f32, color: [f32; 3]) -> Self {
        Self { distance, color }
    }

    /// Create a sample from a distance and 8-bit color
    pub fn from_rgb8(distance: f32, r: u8, g: u8, b: u8) -> Self {
        Self {
            distance,
            color: rgb8_to_f32(r, g, b),
        }
    }

    /// Check if this sample lies inside the surface
    pub fn is_inside(&self) -> bool {
        self.distance < 0.0
    }
}

/// Encoded size of a sample in a delta stream
pub const ENCODED_SAMPLE_SIZE: usize = 16;

/// Leaf encoder for delta streams: distance, r, g, b as little-endian f32
pub fn encode_sample<W: Write>(sample: &Sample, writer: &mut W) -> io::Result<()> {
    let mut bytes = [0u8; ENCODED_SAMPLE_SIZE];
    bytes[0..4].copy_from_slice(&sample.distance.to_le_bytes());
    for (i, channel) in sample.color.iter().enumerate() {
        let start = 4 + i * 4;
        bytes[start..start + 4].copy_from_slice(&channel.to_le_bytes());
    }
    writer.write_all(&bytes)
}

/// Leaf decoder matching [`encode_sample`]
pub fn decode_sample<R: Read>(reader: &mut R) -> io::Result<Sample> {
    let mut bytes = [0u8; ENCODED_SAMPLE_SIZE];
    reader.read_exact(&mut bytes)?;
    let f = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    Ok(Sample {
        distance: f(0),
        color: [f(4), f(8), f(12)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size() {
        assert_eq!(std::mem::size_of::<Sample>(), 16);
        assert_eq!(std::mem::size_of::<Sample>(), ENCODED_SAMPLE_SIZE);
    }

    #[test]
    fn test_outside() {
        assert!(!Sample::OUTSIDE.is_inside());
        assert_eq!(Sample::OUTSIDE.distance, f32::MAX);
        assert!(Sample::new(-0.5, [1.0, 0.0, 0.0]).is_inside());
    }

    #[test]
    fn test_codec_is_little_endian() {
        let sample = Sample::new(1.0, [0.0, 0.5, -2.0]);
        let mut bytes = Vec::new();
        encode_sample(&sample, &mut bytes).unwrap();

        assert_eq!(bytes.len(), ENCODED_SAMPLE_SIZE);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-2.0f32).to_le_bytes());

        let decoded = decode_sample(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_decode_short_input() {
        let bytes = [0u8; 7];
        let err = decode_sample(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_from_rgb8() {
        let sample = Sample::from_rgb8(0.25, 255, 0, 51);
        assert_eq!(sample.color, [1.0, 0.0, 0.2]);
        assert_eq!(sample.distance, 0.25);
    }
}
