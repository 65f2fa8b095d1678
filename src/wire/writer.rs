//! Payload encoding and async writing

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    ARRAY_PREFIX, BOOL_PREFIX, CRLF, ERR_PREFIX, INT_PREFIX, NIL_PREFIX, Payload, VALUE_PREFIX,
};

/// Appends the wire encoding of a payload to `buf`.
pub fn encode(payload: &Payload, buf: &mut Vec<u8>) {
    match payload {
        Payload::Nil => {
            buf.push(NIL_PREFIX);
            buf.extend_from_slice(CRLF);
        }
        Payload::Bool(b) => {
            buf.push(BOOL_PREFIX);
            buf.push(if *b { b'1' } else { b'0' });
            buf.extend_from_slice(CRLF);
        }
        Payload::Int(i) => {
            buf.push(INT_PREFIX);
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.extend_from_slice(CRLF);
        }
        Payload::Value(v) => {
            buf.push(VALUE_PREFIX);
            buf.extend_from_slice(v.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(v.as_bytes());
            buf.extend_from_slice(CRLF);
        }
        Payload::Array(items) => {
            buf.push(ARRAY_PREFIX);
            buf.extend_from_slice(items.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            for item in items {
                encode(item, buf);
            }
        }
        Payload::Error(msg) => {
            buf.push(ERR_PREFIX);
            buf.extend_from_slice(msg.as_bytes());
            buf.extend_from_slice(CRLF);
        }
    }
}

/// Encodes a payload into a fresh buffer.
pub fn encode_to_vec(payload: &Payload) -> Vec<u8> {
    let mut buf = Vec::new();
    encode(payload, &mut buf);
    buf
}

/// Writes one payload. The caller owns flushing so replies can share a
/// buffered writer.
pub async fn write_payload<W>(w: &mut W, payload: &Payload) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let buf = encode_to_vec(payload);
    w.write_all(&buf).await
}
