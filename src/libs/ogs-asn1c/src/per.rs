//! PER (Packed Encoding Rules) encoding/decoding
//!
//! Aligned PER (APER) as used by NGAP, ITU-T X.691. Only the subset of
//! encodings needed by the NG application protocol is provided: constrained
//! and semi-constrained whole numbers, length determinants, enumerations,
//! choice indices, octet/bit strings and open types.

use bitvec::prelude::*;
use bytes::Bytes;
use thiserror::Error;

/// PER codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PerError {
    #[error("Buffer underflow: need {needed} bits, have {available}")]
    BufferUnderflow { needed: usize, available: usize },
    #[error("Invalid constraint: value {value} not in range {min}..={max}")]
    ConstraintViolation { value: i64, min: i64, max: i64 },
    #[error("Invalid choice index: {index} (max {max})")]
    InvalidChoiceIndex { index: usize, max: usize },
    #[error("Invalid length: {length}")]
    InvalidLength { length: usize },
    #[error("Unsupported extension")]
    UnsupportedExtension,
    #[error("Decode error: {0}")]
    DecodeError(String),
}

pub type PerResult<T> = Result<T, PerError>;

/// Constraint definition for constrained integers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub min: i64,
    pub max: i64,
    pub extensible: bool,
}

impl Constraint {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max, extensible: false }
    }

    pub const fn extensible(min: i64, max: i64) -> Self {
        Self { min, max, extensible: true }
    }

    /// Number of values in the range
    pub fn range(&self) -> u64 {
        if self.max >= self.min {
            (self.max - self.min) as u64 + 1
        } else {
            0
        }
    }

    /// Bits needed to encode an offset in this range
    pub fn bits_needed(&self) -> usize {
        let range = self.range();
        if range <= 1 {
            0
        } else {
            64 - (range - 1).leading_zeros() as usize
        }
    }

    /// Octets needed to hold the largest offset (indefinite-length case)
    fn octets_needed(&self) -> usize {
        let top = self.range().saturating_sub(1);
        (((64 - top.leading_zeros() as usize) + 7) / 8).max(1)
    }
}

/// Minimal big-endian octets for a non-negative value (at least one octet)
fn minimal_octets(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

/// APER (Aligned PER) Encoder
pub struct AperEncoder {
    buffer: BitVec<u8, Msb0>,
}

impl AperEncoder {
    pub fn new() -> Self {
        Self { buffer: BitVec::new() }
    }

    /// Get the encoded bytes
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buffer.into_vec())
    }

    /// Aligned, owned byte vector (convenience for open types)
    pub fn into_aligned_vec(mut self) -> Vec<u8> {
        self.align();
        self.buffer.into_vec()
    }

    pub fn bit_position(&self) -> usize {
        self.buffer.len()
    }

    /// Align to octet boundary
    pub fn align(&mut self) {
        let remainder = self.buffer.len() % 8;
        if remainder != 0 {
            for _ in 0..(8 - remainder) {
                self.buffer.push(false);
            }
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.buffer.push(bit);
    }

    /// Write `num_bits` low bits of `value`, MSB first
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        for i in (0..num_bits).rev() {
            self.buffer.push((value >> i) & 1 == 1);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.write_bits(*byte as u64, 8);
        }
    }

    /// Encode constrained whole number (X.691 10.5)
    pub fn encode_constrained_whole_number(
        &mut self,
        value: i64,
        constraint: &Constraint,
    ) -> PerResult<()> {
        if value < constraint.min || value > constraint.max {
            return Err(PerError::ConstraintViolation {
                value,
                min: constraint.min,
                max: constraint.max,
            });
        }

        let range = constraint.range();
        let offset = (value - constraint.min) as u64;

        if range == 1 {
            return Ok(());
        }

        if range <= 255 {
            self.write_bits(offset, constraint.bits_needed());
        } else if range == 256 {
            self.align();
            self.write_bits(offset, 8);
        } else if range <= 65536 {
            self.align();
            self.write_bits(offset, 16);
        } else {
            // Indefinite length: octet count as constrained 1..=max_octets, then aligned octets
            let octets = minimal_octets(offset);
            let count = Constraint::new(1, constraint.octets_needed() as i64);
            self.encode_constrained_whole_number(octets.len() as i64, &count)?;
            self.align();
            self.write_bytes(&octets);
        }

        Ok(())
    }

    /// Encode semi-constrained whole number with a lower bound (X.691 10.7)
    pub fn encode_semi_constrained_whole_number(&mut self, value: u64, min: u64) -> PerResult<()> {
        if value < min {
            return Err(PerError::ConstraintViolation {
                value: value as i64,
                min: min as i64,
                max: i64::MAX,
            });
        }
        let octets = minimal_octets(value - min);
        self.encode_length_determinant(octets.len())?;
        self.write_bytes(&octets);
        Ok(())
    }

    /// Encode unconstrained whole number (X.691 10.8)
    pub fn encode_unconstrained_whole_number(&mut self, value: i64) -> PerResult<()> {
        let raw = value.to_be_bytes();
        // Two's complement, shortest form that keeps the sign bit
        let mut start = 0;
        while start < 7 {
            let (cur, next) = (raw[start], raw[start + 1]);
            let redundant = (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        let bytes = &raw[start..];
        self.encode_length_determinant(bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    /// Encode unconstrained length determinant (X.691 10.9), lengths up to 16383
    pub fn encode_length_determinant(&mut self, length: usize) -> PerResult<()> {
        self.align();
        if length <= 127 {
            self.write_bits(length as u64, 8);
        } else if length <= 16383 {
            self.write_bits(0x8000 | length as u64, 16);
        } else {
            return Err(PerError::InvalidLength { length });
        }
        Ok(())
    }

    /// Encode constrained length determinant
    pub fn encode_constrained_length(
        &mut self,
        length: usize,
        min: usize,
        max: usize,
    ) -> PerResult<()> {
        if max >= 65536 {
            if length < min || length > max {
                return Err(PerError::InvalidLength { length });
            }
            return self.encode_length_determinant(length);
        }
        let constraint = Constraint::new(min as i64, max as i64);
        self.encode_constrained_whole_number(length as i64, &constraint)
    }

    /// Encode ENUMERATED (X.691 13)
    pub fn encode_enumerated(&mut self, value: i64, constraint: &Constraint) -> PerResult<()> {
        if constraint.extensible {
            let in_root = value >= constraint.min && value <= constraint.max;
            self.write_bit(!in_root);
            if in_root {
                self.encode_constrained_whole_number(value, constraint)?;
            } else {
                let ext = (value - constraint.max - 1).max(0) as u64;
                self.encode_normally_small_non_negative(ext)?;
            }
        } else {
            self.encode_constrained_whole_number(value, constraint)?;
        }
        Ok(())
    }

    /// Encode normally small non-negative whole number (X.691 10.6)
    pub fn encode_normally_small_non_negative(&mut self, value: u64) -> PerResult<()> {
        if value <= 63 {
            self.write_bit(false);
            self.write_bits(value, 6);
        } else {
            self.write_bit(true);
            self.encode_semi_constrained_whole_number(value, 0)?;
        }
        Ok(())
    }

    /// Encode CHOICE index (X.691 22)
    pub fn encode_choice_index(
        &mut self,
        index: usize,
        num_alternatives: usize,
        extensible: bool,
    ) -> PerResult<()> {
        let root = Constraint::new(0, num_alternatives.saturating_sub(1) as i64);
        if extensible {
            let in_root = index < num_alternatives;
            self.write_bit(!in_root);
            if in_root {
                self.encode_constrained_whole_number(index as i64, &root)?;
            } else {
                self.encode_normally_small_non_negative((index - num_alternatives) as u64)?;
            }
        } else {
            if index >= num_alternatives {
                return Err(PerError::InvalidChoiceIndex {
                    index,
                    max: num_alternatives.saturating_sub(1),
                });
            }
            self.encode_constrained_whole_number(index as i64, &root)?;
        }
        Ok(())
    }

    /// Encode OCTET STRING (X.691 17)
    pub fn encode_octet_string(
        &mut self,
        data: &[u8],
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> PerResult<()> {
        let len = data.len();

        match (min_len, max_len) {
            (Some(min), Some(max)) if min == max => {
                if len != min {
                    return Err(PerError::InvalidLength { length: len });
                }
                if min > 2 {
                    self.align();
                }
                self.write_bytes(data);
            }
            (Some(min), Some(max)) => {
                self.encode_constrained_length(len, min, max)?;
                self.align();
                self.write_bytes(data);
            }
            _ => {
                self.encode_length_determinant(len)?;
                self.write_bytes(data);
            }
        }
        Ok(())
    }

    /// Encode BIT STRING (X.691 16) from the leading `num_bits` bits of `data`
    pub fn encode_bit_string(
        &mut self,
        data: &[u8],
        num_bits: usize,
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> PerResult<()> {
        if num_bits > data.len() * 8 {
            return Err(PerError::InvalidLength { length: num_bits });
        }
        let bits = &data.view_bits::<Msb0>()[..num_bits];

        match (min_len, max_len) {
            (Some(min), Some(max)) if min == max => {
                if num_bits != min {
                    return Err(PerError::InvalidLength { length: num_bits });
                }
                if min > 16 {
                    self.align();
                }
            }
            (Some(min), Some(max)) => {
                self.encode_constrained_length(num_bits, min, max)?;
                self.align();
            }
            _ => {
                self.encode_length_determinant(num_bits)?;
            }
        }
        for bit in bits {
            self.write_bit(*bit);
        }
        Ok(())
    }

    /// Encode an open type: a complete, aligned inner encoding wrapped in a length
    pub fn encode_open_type(&mut self, inner: &[u8]) -> PerResult<()> {
        self.encode_length_determinant(inner.len())?;
        self.write_bytes(inner);
        Ok(())
    }
}

impl Default for AperEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// APER (Aligned PER) Decoder
pub struct AperDecoder<'a> {
    data: &'a BitSlice<u8, Msb0>,
    position: usize,
}

impl<'a> AperDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: BitSlice::from_slice(data),
            position: 0,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.position
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn align(&mut self) {
        let remainder = self.position % 8;
        if remainder != 0 {
            self.position += 8 - remainder;
        }
    }

    pub fn read_bit(&mut self) -> PerResult<bool> {
        if self.position >= self.data.len() {
            return Err(PerError::BufferUnderflow { needed: 1, available: 0 });
        }
        let bit = self.data[self.position];
        self.position += 1;
        Ok(bit)
    }

    /// Read `num_bits` (at most 64) as a value, MSB first
    pub fn read_bits(&mut self, num_bits: usize) -> PerResult<u64> {
        if num_bits > 64 || self.position + num_bits > self.data.len() {
            return Err(PerError::BufferUnderflow {
                needed: num_bits,
                available: self.remaining_bits(),
            });
        }

        let mut value: u64 = 0;
        for _ in 0..num_bits {
            value = (value << 1) | (self.data[self.position] as u64);
            self.position += 1;
        }
        Ok(value)
    }

    pub fn read_bytes(&mut self, num_bytes: usize) -> PerResult<Vec<u8>> {
        if self.remaining_bits() < num_bytes.saturating_mul(8) {
            return Err(PerError::BufferUnderflow {
                needed: num_bytes.saturating_mul(8),
                available: self.remaining_bits(),
            });
        }
        let mut bytes = Vec::with_capacity(num_bytes);
        for _ in 0..num_bytes {
            bytes.push(self.read_bits(8)? as u8);
        }
        Ok(bytes)
    }

    /// Decode constrained whole number (X.691 10.5)
    pub fn decode_constrained_whole_number(&mut self, constraint: &Constraint) -> PerResult<i64> {
        let range = constraint.range();

        if range == 1 {
            return Ok(constraint.min);
        }

        let offset = if range <= 255 {
            self.read_bits(constraint.bits_needed())?
        } else if range == 256 {
            self.align();
            self.read_bits(8)?
        } else if range <= 65536 {
            self.align();
            self.read_bits(16)?
        } else {
            let count = Constraint::new(1, constraint.octets_needed() as i64);
            let len = self.decode_constrained_whole_number(&count)? as usize;
            self.align();
            let bytes = self.read_bytes(len)?;
            bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
        };

        let value = constraint.min.saturating_add(offset as i64);
        if value > constraint.max {
            return Err(PerError::ConstraintViolation {
                value,
                min: constraint.min,
                max: constraint.max,
            });
        }
        Ok(value)
    }

    /// Decode semi-constrained whole number with a lower bound (X.691 10.7)
    pub fn decode_semi_constrained_whole_number(&mut self, min: u64) -> PerResult<u64> {
        let len = self.decode_length_determinant()?;
        if len == 0 || len > 8 {
            return Err(PerError::InvalidLength { length: len });
        }
        let bytes = self.read_bytes(len)?;
        let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        Ok(value.saturating_add(min))
    }

    /// Decode unconstrained whole number (X.691 10.8)
    pub fn decode_unconstrained_whole_number(&mut self) -> PerResult<i64> {
        let len = self.decode_length_determinant()?;
        if len > 8 {
            return Err(PerError::InvalidLength { length: len });
        }
        let bytes = self.read_bytes(len)?;

        let Some(first) = bytes.first() else {
            return Ok(0);
        };
        let mut value: i64 = if first & 0x80 != 0 { -1 } else { 0 };
        for byte in bytes {
            value = (value << 8) | (byte as i64);
        }
        Ok(value)
    }

    /// Decode unconstrained length determinant (X.691 10.9)
    pub fn decode_length_determinant(&mut self) -> PerResult<usize> {
        self.align();
        let first = self.read_bits(8)? as u8;

        if first & 0x80 == 0 {
            Ok(first as usize)
        } else if first & 0x40 == 0 {
            let second = self.read_bits(8)? as u8;
            Ok((((first & 0x3F) as usize) << 8) | second as usize)
        } else {
            // Fragmented lengths never appear in NGAP messages of this size
            Err(PerError::UnsupportedExtension)
        }
    }

    /// Decode constrained length determinant
    pub fn decode_constrained_length(&mut self, min: usize, max: usize) -> PerResult<usize> {
        if max >= 65536 {
            let len = self.decode_length_determinant()?;
            if len < min || len > max {
                return Err(PerError::InvalidLength { length: len });
            }
            return Ok(len);
        }
        let constraint = Constraint::new(min as i64, max as i64);
        self.decode_constrained_whole_number(&constraint).map(|v| v as usize)
    }

    /// Decode ENUMERATED (X.691 13). Extension values come back above `max`.
    pub fn decode_enumerated(&mut self, constraint: &Constraint) -> PerResult<i64> {
        if constraint.extensible && self.read_bit()? {
            let ext = self.decode_normally_small_non_negative()?;
            return Ok(constraint.max + 1 + ext as i64);
        }
        self.decode_constrained_whole_number(constraint)
    }

    /// Decode normally small non-negative whole number (X.691 10.6)
    pub fn decode_normally_small_non_negative(&mut self) -> PerResult<u64> {
        if self.read_bit()? {
            self.decode_semi_constrained_whole_number(0)
        } else {
            self.read_bits(6)
        }
    }

    /// Decode CHOICE index (X.691 22). Extension alternatives come back at or above `num_alternatives`.
    pub fn decode_choice_index(
        &mut self,
        num_alternatives: usize,
        extensible: bool,
    ) -> PerResult<usize> {
        if extensible && self.read_bit()? {
            let ext_index = self.decode_normally_small_non_negative()?;
            return Ok(num_alternatives + ext_index as usize);
        }
        let constraint = Constraint::new(0, num_alternatives.saturating_sub(1) as i64);
        self.decode_constrained_whole_number(&constraint).map(|v| v as usize)
    }

    /// Decode OCTET STRING (X.691 17)
    pub fn decode_octet_string(
        &mut self,
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> PerResult<Vec<u8>> {
        let len = match (min_len, max_len) {
            (Some(min), Some(max)) if min == max => {
                if min > 2 {
                    self.align();
                }
                min
            }
            (Some(min), Some(max)) => {
                let len = self.decode_constrained_length(min, max)?;
                self.align();
                len
            }
            _ => self.decode_length_determinant()?,
        };

        self.read_bytes(len)
    }

    /// Decode BIT STRING (X.691 16); returns the packed bytes and the bit count
    pub fn decode_bit_string(
        &mut self,
        min_len: Option<usize>,
        max_len: Option<usize>,
    ) -> PerResult<(Vec<u8>, usize)> {
        let len = match (min_len, max_len) {
            (Some(min), Some(max)) if min == max => {
                if min > 16 {
                    self.align();
                }
                min
            }
            (Some(min), Some(max)) => {
                let len = self.decode_constrained_length(min, max)?;
                self.align();
                len
            }
            _ => self.decode_length_determinant()?,
        };

        let mut bits: BitVec<u8, Msb0> = BitVec::with_capacity(len);
        for _ in 0..len {
            bits.push(self.read_bit()?);
        }
        Ok((bits.into_vec(), len))
    }

    /// Decode an open type, returning its raw inner encoding
    pub fn decode_open_type(&mut self) -> PerResult<Vec<u8>> {
        let len = self.decode_length_determinant()?;
        self.read_bytes(len)
    }
}

/// Trait for types that can be encoded with APER
pub trait AperEncode {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()>;
}

/// Trait for types that can be decoded with APER
pub trait AperDecode: Sized {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_bits_needed() {
        assert_eq!(Constraint::new(0, 0).bits_needed(), 0);
        assert_eq!(Constraint::new(0, 1).bits_needed(), 1);
        assert_eq!(Constraint::new(0, 2).bits_needed(), 2);
        assert_eq!(Constraint::new(0, 7).bits_needed(), 3);
        assert_eq!(Constraint::new(0, 255).bits_needed(), 8);
    }

    #[test]
    fn test_encode_decode_constrained() {
        let constraint = Constraint::new(0, 2);
        for value in 0..=2 {
            let mut encoder = AperEncoder::new();
            encoder.encode_constrained_whole_number(value, &constraint).unwrap();
            let bytes = encoder.into_aligned_vec();
            let mut decoder = AperDecoder::new(&bytes);
            assert_eq!(decoder.decode_constrained_whole_number(&constraint).unwrap(), value);
        }
    }

    #[test]
    fn test_large_range_uses_octet_count() {
        // RAN-UE-NGAP-ID style range: 2 bits of count, aligned octets
        let constraint = Constraint::new(0, 4294967295);
        let mut encoder = AperEncoder::new();
        encoder.encode_constrained_whole_number(0x0102, &constraint).unwrap();
        let bytes = encoder.into_aligned_vec();
        assert_eq!(bytes, vec![0x40, 0x01, 0x02]);

        let mut decoder = AperDecoder::new(&bytes);
        assert_eq!(decoder.decode_constrained_whole_number(&constraint).unwrap(), 0x0102);
    }

    #[test]
    fn test_forty_bit_range() {
        let constraint = Constraint::new(0, 1099511627775);
        let mut encoder = AperEncoder::new();
        encoder.encode_constrained_whole_number(1099511627775, &constraint).unwrap();
        let bytes = encoder.into_aligned_vec();
        // count 5 -> offset 4 in 3 bits
        assert_eq!(bytes[0], 0x80);
        assert_eq!(&bytes[1..], &[0xFF; 5]);
    }

    #[test]
    fn test_encode_decode_length() {
        for len in [0, 1, 127, 128, 255, 1000, 16383] {
            let mut encoder = AperEncoder::new();
            encoder.encode_length_determinant(len).unwrap();
            let bytes = encoder.into_bytes();
            let mut decoder = AperDecoder::new(&bytes);
            assert_eq!(decoder.decode_length_determinant().unwrap(), len);
        }
        let mut encoder = AperEncoder::new();
        assert!(encoder.encode_length_determinant(16384).is_err());
    }

    #[test]
    fn test_unconstrained_sign() {
        for value in [0i64, 127, 128, -1, -129, 4_000_000_000_000] {
            let mut encoder = AperEncoder::new();
            encoder.encode_unconstrained_whole_number(value).unwrap();
            let bytes = encoder.into_aligned_vec();
            let mut decoder = AperDecoder::new(&bytes);
            assert_eq!(decoder.decode_unconstrained_whole_number().unwrap(), value);
        }
    }

    #[test]
    fn test_bit_string_fixed() {
        let key = [0xA5u8; 32];
        let mut encoder = AperEncoder::new();
        encoder.write_bit(true);
        encoder.encode_bit_string(&key, 256, Some(256), Some(256)).unwrap();
        let bytes = encoder.into_aligned_vec();
        assert_eq!(bytes.len(), 33);

        let mut decoder = AperDecoder::new(&bytes);
        assert!(decoder.read_bit().unwrap());
        let (decoded, len) = decoder.decode_bit_string(Some(256), Some(256)).unwrap();
        assert_eq!(len, 256);
        assert_eq!(decoded, key.to_vec());
    }

    #[test]
    fn test_truncated_input() {
        let mut decoder = AperDecoder::new(&[0x05, 0x01]);
        assert!(decoder.decode_octet_string(None, None).is_err());
    }
}
