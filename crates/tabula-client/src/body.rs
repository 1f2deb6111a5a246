//! Message body primitives: `[string]`, `[bytes]`, `[inet]` and friends.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tabula_codec::CqlType;

use crate::error::{ClientError, ClientResult};

/// Bounds-checked cursor over a message body.
#[derive(Debug, Clone)]
pub struct BodyReader {
    buf: Bytes,
}

impl BodyReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> ClientResult<()> {
        if self.buf.remaining() < n {
            return Err(ClientError::protocol(format!(
                "truncated {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> ClientResult<u8> {
        self.need(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> ClientResult<u16> {
        self.need(2, "short")?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i32(&mut self) -> ClientResult<i32> {
        self.need(4, "int")?;
        Ok(self.buf.get_i32())
    }

    pub fn read_raw(&mut self, n: usize) -> ClientResult<Bytes> {
        self.need(n, "body")?;
        Ok(self.buf.split_to(n))
    }

    pub fn read_string(&mut self) -> ClientResult<String> {
        let len = usize::from(self.read_u16()?);
        let raw = self.read_raw(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| ClientError::protocol("string is not valid UTF-8"))
    }

    pub fn read_long_string(&mut self) -> ClientResult<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| ClientError::protocol(format!("negative string length {len}")))?;
        let raw = self.read_raw(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| ClientError::protocol("string is not valid UTF-8"))
    }

    pub fn read_string_list(&mut self) -> ClientResult<Vec<String>> {
        let n = self.read_u16()?;
        (0..n).map(|_| self.read_string()).collect()
    }

    /// `[bytes]`: a negative length is null.
    pub fn read_bytes(&mut self) -> ClientResult<Option<Bytes>> {
        let len = self.read_i32()?;
        match usize::try_from(len) {
            Ok(len) => self.read_raw(len).map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn read_short_bytes(&mut self) -> ClientResult<Bytes> {
        let len = usize::from(self.read_u16()?);
        self.read_raw(len)
    }

    pub fn read_bytes_map(&mut self) -> ClientResult<HashMap<String, Option<Bytes>>> {
        let n = self.read_u16()?;
        let mut map = HashMap::with_capacity(usize::from(n));
        for _ in 0..n {
            let key = self.read_string()?;
            let value = self.read_bytes()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    pub fn read_string_multimap(&mut self) -> ClientResult<HashMap<String, Vec<String>>> {
        let n = self.read_u16()?;
        let mut map = HashMap::with_capacity(usize::from(n));
        for _ in 0..n {
            let key = self.read_string()?;
            let values = self.read_string_list()?;
            map.insert(key, values);
        }
        Ok(map)
    }

    /// `[inet]`: address length, address bytes, port.
    pub fn read_inet(&mut self) -> ClientResult<SocketAddr> {
        let len = self.read_u8()?;
        let ip = match len {
            4 => {
                let raw = self.read_raw(4)?;
                IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.read_raw(16)?);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(ClientError::protocol(format!(
                    "invalid inet address length {other}"
                )));
            }
        };
        let port = self.read_i32()?;
        let port = u16::try_from(port)
            .map_err(|_| ClientError::protocol(format!("invalid port {port}")))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// `[option]`: a column type in result or prepared metadata.
    pub fn read_option(&mut self) -> ClientResult<CqlType> {
        Ok(CqlType::read_option(&mut self.buf)?)
    }
}

/// `[bytes]`: `None` is written as length -1.
pub fn write_bytes(buf: &mut BytesMut, b: Option<&[u8]>) -> ClientResult<()> {
    let Some(b) = b else {
        buf.put_i32(-1);
        return Ok(());
    };
    let len = i32::try_from(b.len())
        .map_err(|_| ClientError::protocol(format!("{} bytes exceed an int length", b.len())))?;
    buf.put_i32(len);
    buf.put_slice(b);
    Ok(())
}

pub fn write_string(buf: &mut BytesMut, s: &str) -> ClientResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| ClientError::protocol(format!("string of {} bytes is too long", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_long_string(buf: &mut BytesMut, s: &str) -> ClientResult<()> {
    let len = i32::try_from(s.len())
        .map_err(|_| ClientError::protocol(format!("string of {} bytes is too long", s.len())))?;
    buf.put_i32(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_short_bytes(buf: &mut BytesMut, b: &[u8]) -> ClientResult<()> {
    let len = u16::try_from(b.len())
        .map_err(|_| ClientError::protocol(format!("{} bytes exceed a short length", b.len())))?;
    buf.put_u16(len);
    buf.put_slice(b);
    Ok(())
}

fn write_count(buf: &mut BytesMut, n: usize) -> ClientResult<()> {
    let n = u16::try_from(n)
        .map_err(|_| ClientError::protocol(format!("{n} entries exceed a short count")))?;
    buf.put_u16(n);
    Ok(())
}

pub fn write_string_map(buf: &mut BytesMut, map: &[(&str, &str)]) -> ClientResult<()> {
    write_count(buf, map.len())?;
    for (key, value) in map {
        write_string(buf, key)?;
        write_string(buf, value)?;
    }
    Ok(())
}

pub fn write_string_list(buf: &mut BytesMut, list: &[&str]) -> ClientResult<()> {
    write_count(buf, list.len())?;
    for item in list {
        write_string(buf, item)?;
    }
    Ok(())
}
