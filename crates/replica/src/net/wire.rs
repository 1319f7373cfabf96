use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};

use super::NetworkId;
use crate::error::ReplicaError;

/// Largest value representable by the 4-byte variable-length encoding.
pub const MAX_VLE_VALUE: u32 = (1 << 29) - 1;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct WireWriter {
    buffer: BytesMut,
}

impl Default for WireWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl WireWriter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.put_f32_le(value);
    }

    /// 7 bits per byte with a continuation flag, the fourth byte carries 8 bits.
    pub fn write_vle(&mut self, value: u32) {
        debug_assert!(value <= MAX_VLE_VALUE, "VLE value {value} exceeds 29 bits");

        if value < 0x80 {
            self.buffer.put_u8(value as u8);
        } else if value < 0x4000 {
            self.buffer.put_u8((value | 0x80) as u8);
            self.buffer.put_u8((value >> 7) as u8);
        } else if value < 0x20_0000 {
            self.buffer.put_u8((value | 0x80) as u8);
            self.buffer.put_u8(((value >> 7) | 0x80) as u8);
            self.buffer.put_u8((value >> 14) as u8);
        } else {
            self.buffer.put_u8((value | 0x80) as u8);
            self.buffer.put_u8(((value >> 7) | 0x80) as u8);
            self.buffer.put_u8(((value >> 14) | 0x80) as u8);
            self.buffer.put_u8((value >> 21) as u8);
        }
    }

    pub fn write_network_id(&mut self, id: Option<NetworkId>) {
        self.write_u32(NetworkId::to_wire(id));
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Length-prefixed byte block.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_vle(value.len() as u32);
        self.buffer.put_slice(value);
    }
}

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { buf: data }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<(), ReplicaError> {
        if self.buf.remaining() < needed {
            return Err(ReplicaError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ReplicaError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, ReplicaError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, ReplicaError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, ReplicaError> {
        self.ensure(4)?;
        let value = self.buf.get_f32_le();
        if !value.is_finite() {
            return Err(ReplicaError::NonFinite);
        }
        Ok(value)
    }

    pub fn read_vle(&mut self) -> Result<u32, ReplicaError> {
        let mut byte = self.read_u8()? as u32;
        let mut value = byte & 0x7f;
        if byte < 0x80 {
            return Ok(value);
        }

        byte = self.read_vle_continuation()?;
        value |= (byte & 0x7f) << 7;
        if byte < 0x80 {
            return Ok(value);
        }

        byte = self.read_vle_continuation()?;
        value |= (byte & 0x7f) << 14;
        if byte < 0x80 {
            return Ok(value);
        }

        byte = self.read_vle_continuation()?;
        value |= byte << 21;
        Ok(value)
    }

    fn read_vle_continuation(&mut self) -> Result<u32, ReplicaError> {
        self.read_u8()
            .map(u32::from)
            .map_err(|_| ReplicaError::MalformedVle)
    }

    pub fn read_network_id(&mut self) -> Result<Option<NetworkId>, ReplicaError> {
        Ok(NetworkId::from_wire(self.read_u32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, ReplicaError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, ReplicaError> {
        let quat = Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        );
        if quat.length_squared() > f32::EPSILON {
            Ok(quat.normalize())
        } else {
            Ok(Quat::IDENTITY)
        }
    }

    pub fn read_string(&mut self) -> Result<String, ReplicaError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ReplicaError::InvalidUtf8)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], ReplicaError> {
        let len = self.read_vle()? as usize;
        self.ensure(len)?;
        let data: &'a [u8] = self.buf;
        let (head, tail) = data.split_at(len);
        self.buf = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_vle(value: u32) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_vle(value);
        writer.as_slice().to_vec()
    }

    #[test]
    fn vle_byte_lengths() {
        assert_eq!(encode_vle(0x7f), vec![0x7f]);
        assert_eq!(encode_vle(0x80).len(), 2);
        assert_eq!(encode_vle(0x3fff).len(), 2);
        assert_eq!(encode_vle(0x4000).len(), 3);
        assert_eq!(encode_vle(0x1f_ffff).len(), 3);
        assert_eq!(encode_vle(0x20_0000).len(), 4);
        assert_eq!(encode_vle(MAX_VLE_VALUE).len(), 4);
    }

    #[test]
    fn vle_boundaries_decode() {
        for value in [0, 1, 0x7f, 0x80, 0x3fff, 0x4000, 0x1f_ffff, 0x20_0000, MAX_VLE_VALUE] {
            let bytes = encode_vle(value);
            let mut reader = WireReader::new(&bytes);
            assert_eq!(reader.read_vle().unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn truncated_vle_is_malformed() {
        let mut bytes = encode_vle(0x20_0000);
        bytes.truncate(2);
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_vle(), Err(ReplicaError::MalformedVle));
    }

    #[test]
    fn empty_stream_reports_eof() {
        let mut reader = WireReader::new(&[]);
        assert_eq!(
            reader.read_u32(),
            Err(ReplicaError::UnexpectedEof {
                needed: 4,
                remaining: 0
            })
        );
    }

    #[test]
    fn field_order_is_preserved() {
        let mut writer = WireWriter::new();
        writer.write_network_id(None);
        writer.write_str("Objects/Crate.xml");
        writer.write_vec3(Vec3::new(1.0, 2.0, 3.0));
        writer.write_quat(Quat::from_rotation_y(1.0));

        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_network_id().unwrap(), None);
        assert_eq!(reader.read_string().unwrap(), "Objects/Crate.xml");
        assert_eq!(reader.read_vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        let rotation = reader.read_quat().unwrap();
        assert!(rotation.angle_between(Quat::from_rotation_y(1.0)) < 1e-4);
        assert!(reader.is_empty());
    }

    #[test]
    fn rejects_non_finite_floats() {
        let mut writer = WireWriter::new();
        writer.write_f32(f32::NAN);
        let bytes = writer.into_bytes();
        assert_eq!(
            WireReader::new(&bytes).read_f32(),
            Err(ReplicaError::NonFinite)
        );
    }
}
