//! Async payload reader

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::{
    ARRAY_PREFIX, BOOL_PREFIX, ERR_PREFIX, INT_PREFIX, MAX_VALUE_SIZE, NIL_PREFIX, Payload,
    VALUE_PREFIX, WireError,
};
use crate::value::Value;

/// Reads the next tag byte, skipping stray CR/LF between frames so a client
/// on a terminal may end its requests with CRLF.
async fn read_tag<R>(r: &mut R) -> Result<u8, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    loop {
        let b = r.read_u8().await?;
        if b != b'\r' && b != b'\n' {
            return Ok(b);
        }
    }
}

/// Reads up to and including LF and strips the CRLF terminator. A line that
/// ends without one is a torn frame.
async fn read_line<R>(r: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = Vec::new();
    let n = r.read_until(b'\n', &mut line).await?;
    if n == 0 || !line.ends_with(super::CRLF) {
        return Err(WireError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(line: &[u8]) -> Result<i64, WireError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(WireError::IntExpected)
}

/// Length/count header: a non-negative ASCII decimal integer.
async fn read_len<R>(r: &mut R) -> Result<usize, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(r).await?;
    if line.is_empty() {
        return Err(WireError::InvalidBody);
    }
    let n = parse_int(&line)?;
    if n < 0 {
        return Err(WireError::NonPositiveInt);
    }
    Ok(n as usize)
}

async fn read_value_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let size = read_len(r).await?;
    if size > MAX_VALUE_SIZE {
        return Err(WireError::TooLarge);
    }

    // body plus its CRLF terminator, e.g. V2\r\nAB\r\n
    let mut body = vec![0u8; size + 2];
    r.read_exact(&mut body).await?;
    if &body[size..] != super::CRLF {
        return Err(WireError::InvalidBody);
    }
    body.truncate(size);
    Ok(Payload::Value(Value::new(body)))
}

async fn read_int_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(r).await?;
    if line.is_empty() {
        return Err(WireError::InvalidBody);
    }
    Ok(Payload::Int(parse_int(&line)?))
}

async fn read_bool_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(r).await?;
    if line.len() != 1 {
        return Err(WireError::InvalidBody);
    }
    Ok(Payload::Bool(line[0] != b'0'))
}

async fn read_nil_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(r).await?;
    if !line.is_empty() {
        return Err(WireError::InvalidBody);
    }
    Ok(Payload::Nil)
}

async fn read_err_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(r).await?;
    Ok(Payload::Error(
        String::from_utf8_lossy(&line).into_owned(),
    ))
}

/// Arrays recurse through the boxed form to keep the future finite.
fn read_payload_by_tag<'a, R>(
    r: &'a mut R,
    tag: u8,
) -> Pin<Box<dyn Future<Output = Result<Payload, WireError>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        match tag {
            VALUE_PREFIX => read_value_payload(r).await,
            INT_PREFIX => read_int_payload(r).await,
            ARRAY_PREFIX => {
                let count = read_len(r).await?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(read_payload(r).await?);
                }
                Ok(Payload::Array(items))
            }
            BOOL_PREFIX => read_bool_payload(r).await,
            NIL_PREFIX => read_nil_payload(r).await,
            ERR_PREFIX => read_err_payload(r).await,
            _ => Err(WireError::InvalidBody),
        }
    })
}

/// Reads one payload of any kind.
pub async fn read_payload<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let tag = read_tag(r).await?;
    read_payload_by_tag(r, tag).await
}

/// Reads one payload that must be an array — the shape of every request.
pub async fn read_array<R>(r: &mut R) -> Result<Payload, WireError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let tag = read_tag(r).await?;
    if tag != ARRAY_PREFIX {
        return Err(WireError::UnexpectedPrefix {
            expected: ARRAY_PREFIX as char,
            got: tag as char,
        });
    }
    read_payload_by_tag(r, tag).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(bytes: &[u8]) -> Result<Payload, WireError> {
        let mut r = bytes;
        read_payload(&mut r).await
    }

    #[tokio::test]
    async fn test_read_value() {
        assert_eq!(
            read(b"V3\r\nfoo\r\n").await.unwrap(),
            Payload::Value(Value::from("foo"))
        );
        assert_eq!(
            read(b"V0\r\n\r\n").await.unwrap(),
            Payload::Value(Value::default())
        );
    }

    #[tokio::test]
    async fn test_read_value_with_crlf_body() {
        // the length, not the terminator, delimits the body
        assert_eq!(
            read(b"V4\r\na\r\nb\r\n").await.unwrap(),
            Payload::Value(Value::new(b"a\r\nb".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_read_int() {
        assert_eq!(read(b"I42\r\n").await.unwrap(), Payload::Int(42));
        assert_eq!(read(b"I-2\r\n").await.unwrap(), Payload::Int(-2));
        assert!(matches!(
            read(b"Iabc\r\n").await,
            Err(WireError::IntExpected)
        ));
        assert!(matches!(read(b"I\r\n").await, Err(WireError::InvalidBody)));
    }

    #[tokio::test]
    async fn test_read_bool_and_nil() {
        assert_eq!(read(b"B1\r\n").await.unwrap(), Payload::Bool(true));
        assert_eq!(read(b"B0\r\n").await.unwrap(), Payload::Bool(false));
        assert_eq!(read(b"Bx\r\n").await.unwrap(), Payload::Bool(true));
        assert!(matches!(read(b"B10\r\n").await, Err(WireError::InvalidBody)));

        assert_eq!(read(b"N\r\n").await.unwrap(), Payload::Nil);
        assert!(matches!(read(b"Nx\r\n").await, Err(WireError::InvalidBody)));
    }

    #[tokio::test]
    async fn test_read_error_payload() {
        assert_eq!(
            read(b"Eboom\r\n").await.unwrap(),
            Payload::Error("boom".into())
        );
    }

    #[tokio::test]
    async fn test_read_nested_array() {
        let got = read(b"A3\r\nV1\r\na\r\nI7\r\nA1\r\nN\r\n").await.unwrap();
        assert_eq!(
            got,
            Payload::Array(vec![
                Payload::Value(Value::from("a")),
                Payload::Int(7),
                Payload::Array(vec![Payload::Nil]),
            ])
        );
    }

    #[tokio::test]
    async fn test_interframe_crlf_is_skipped() {
        assert_eq!(read(b"\r\n\r\nI1\r\n").await.unwrap(), Payload::Int(1));
    }

    #[tokio::test]
    async fn test_value_missing_terminator_is_invalid_body() {
        assert!(matches!(
            read(b"V3\r\nfooxy").await,
            Err(WireError::InvalidBody)
        ));
    }

    #[tokio::test]
    async fn test_negative_and_oversized_lengths() {
        assert!(matches!(
            read(b"V-1\r\n").await,
            Err(WireError::NonPositiveInt)
        ));
        assert!(matches!(
            read(b"V268435457\r\n").await,
            Err(WireError::TooLarge)
        ));
        // overflow in the length header is a parse failure
        assert!(matches!(
            read(b"V99999999999999999999\r\n").await,
            Err(WireError::IntExpected)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tag_and_eof() {
        assert!(matches!(read(b"X\r\n").await, Err(WireError::InvalidBody)));
        assert!(matches!(read(b"V3\r\nfo").await, Err(WireError::Io(_))));
        assert!(matches!(read(b"").await, Err(WireError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_array_rejects_other_prefixes() {
        let mut r: &[u8] = b"I1\r\n";
        assert!(matches!(
            read_array(&mut r).await,
            Err(WireError::UnexpectedPrefix { expected: 'A', got: 'I' })
        ));
    }
}
