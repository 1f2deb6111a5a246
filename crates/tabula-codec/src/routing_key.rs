//! Partition-key serialization for token computation.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};

/// Joins the encoded partition-key components into the routing key.
///
/// A single component is used as-is. Several components are each written
/// as `be16(len) ‖ bytes ‖ 0x00`.
pub fn compose_routing_key(components: &[Bytes]) -> CodecResult<Bytes> {
    if let [single] = components {
        return Ok(single.clone());
    }
    let capacity = components.iter().map(|c| c.len() + 3).sum();
    let mut buf = BytesMut::with_capacity(capacity);
    for component in components {
        let len = u16::try_from(component.len())
            .map_err(|_| CodecError::out_of_range(component.len(), "routing key component"))?;
        buf.put_u16(len);
        buf.put_slice(component);
        buf.put_u8(0);
    }
    Ok(buf.freeze())
}
