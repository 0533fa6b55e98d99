//! Wire protocol for process-flavoured primitives.
//!
//! Every connection starts with one attach frame naming a role, then streams
//! role-specific frames. Frames are length-prefixed JSON: a 4-byte
//! little-endian length followed by the serialised frame. JSON matches the
//! payload contract of process buffers (values must be serde-serialisable)
//! and keeps captured wire traffic inspectable.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Fault;

/// Upper bound on a single frame; anything larger is a protocol violation.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Frame {
    /// Hello: the peer will publish to the buffer.
    AttachPublisher { buffer: u64 },
    /// Hello: the peer takes the buffer's subscription slot.
    AttachSubscriber { buffer: u64 },
    /// Hello: the peer wants get/set access to a shared value.
    AttachShared { value: u64 },
    /// Attach accepted.
    Ack,
    /// Attach rejected; `label` is the stable [`BufferError`](crate::BufferError)
    /// label so the client can reconstruct the typed error.
    Reject {
        label: String,
        message: String,
        fault: Option<Fault>,
    },
    /// A published or relayed value.
    Value(serde_json::Value),
    /// Terminal completion marker.
    Complete(Option<Fault>),
    /// Host notice to a publisher: the buffer has been terminated, further
    /// values are being rejected.
    Completed,
    /// Orderly detach of the peer's role.
    Detach,
    /// Shared value read request.
    Get,
    /// Shared value write request.
    Set(serde_json::Value),
}

pub(crate) fn write_frame(writer: &mut impl Write, frame: &Frame) -> io::Result<()> {
    let body = serde_json::to_vec(frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

pub(crate) fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Frame::AttachPublisher { buffer: 42 }).unwrap();
        write_frame(&mut wire, &Frame::Value(serde_json::json!([1, 2, 3]))).unwrap();
        write_frame(&mut wire, &Frame::Complete(Some(Fault::new("p", "done")))).unwrap();

        let mut cursor = wire.as_slice();
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            Frame::AttachPublisher { buffer: 42 }
        ));
        match read_frame(&mut cursor).unwrap() {
            Frame::Value(v) => assert_eq!(v, serde_json::json!([1, 2, 3])),
            other => panic!("unexpected frame {other:?}"),
        }
        match read_frame(&mut cursor).unwrap() {
            Frame::Complete(Some(fault)) => assert_eq!(fault.origin, "p"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let err = read_frame(&mut wire.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
