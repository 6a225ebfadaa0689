use std::convert::TryInto;

use crate::error::{GraphError, Result};
use crate::model::PropertyValue;

const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;

/// Unsigned LEB128: 7 value bits per byte, high bit marks continuation.
pub fn write_varlong(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_bool(buf: &mut Vec<u8>, value: bool) {
    buf.push(if value { 1 } else { 0 });
}

pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varlong(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_bytes(buf, value.as_bytes());
}

pub fn write_property_value(buf: &mut Vec<u8>, value: &PropertyValue) {
    match value {
        PropertyValue::Bool(v) => {
            buf.push(TAG_BOOL);
            write_bool(buf, *v);
        }
        PropertyValue::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyValue::String(s) => {
            buf.push(TAG_STRING);
            write_string(buf, s);
        }
        PropertyValue::Bytes(b) => {
            buf.push(TAG_BYTES);
            write_bytes(buf, b);
        }
    }
}

pub struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.index + len > self.data.len() {
            return Err(GraphError::Corruption("unexpected end of payload".into()));
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self
            .read_exact(8)?
            .try_into()
            .expect("slice has exactly 8 bytes");
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self
            .read_exact(8)?
            .try_into()
            .expect("slice has exactly 8 bytes");
        Ok(i64::from_be_bytes(bytes))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(GraphError::Corruption(format!(
                "invalid boolean encoding: {other}"
            ))),
        }
    }

    pub fn read_varlong(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 || (shift == 63 && byte > 1) {
                return Err(GraphError::Corruption("varlong overflows u64".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varlong()? as usize;
        Ok(self.read_exact(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| GraphError::Corruption("invalid UTF-8 string".into()))
    }

    pub fn read_property_value(&mut self) -> Result<PropertyValue> {
        let tag = self.read_u8()?;
        match tag {
            TAG_BOOL => Ok(PropertyValue::Bool(self.read_bool()?)),
            TAG_INT => {
                let bytes: [u8; 8] = self
                    .read_exact(8)?
                    .try_into()
                    .expect("slice has exactly 8 bytes");
                Ok(PropertyValue::Int(i64::from_be_bytes(bytes)))
            }
            TAG_FLOAT => {
                let bytes: [u8; 8] = self
                    .read_exact(8)?
                    .try_into()
                    .expect("slice has exactly 8 bytes");
                Ok(PropertyValue::Float(f64::from_be_bytes(bytes)))
            }
            TAG_STRING => Ok(PropertyValue::String(self.read_string()?)),
            TAG_BYTES => Ok(PropertyValue::Bytes(self.read_bytes()?)),
            other => Err(GraphError::Corruption(format!(
                "unknown property value tag: 0x{other:02X}"
            ))),
        }
    }

    pub fn ensure_consumed(&self) -> Result<()> {
        if self.index != self.data.len() {
            return Err(GraphError::Corruption(
                "unexpected trailing bytes in payload".into(),
            ));
        }
        Ok(())
    }
}
