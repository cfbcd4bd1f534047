use quay_crypto::Cipher;
use quay_types::network::LoginRequest;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::RelayError;

/// Encode a login request into its on-wire handshake frame.
///
/// Wire format: `[4-byte BE length][encrypted login payload]`
pub fn encode_login_frame(cipher: &Cipher, req: &LoginRequest) -> Result<Vec<u8>, RelayError> {
    let payload = cipher.encrypt(&req.to_bytes()?)?;
    let len = u32::try_from(payload.len()).map_err(|_| RelayError::CodecError {
        reason: format!("login frame of {} bytes is too large", payload.len()),
    })?;

    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decrypt and deserialize the body of a login frame (without its length prefix).
pub fn decode_login_payload(cipher: &Cipher, payload: &[u8]) -> Result<LoginRequest, RelayError> {
    let plain = cipher.decrypt(payload)?;
    LoginRequest::from_bytes(&plain).map_err(|e| RelayError::DecryptError {
        reason: e.to_string(),
    })
}

/// Read the 4-byte big-endian length prefix of a login frame.
///
/// Zero and anything above `max` are rejected before the body is read.
pub async fn read_length_prefix<T>(io: &mut T, max: usize) -> Result<usize, RelayError>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await.map_err(short_read)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(RelayError::FrameError {
            reason: "empty login frame".to_string(),
        });
    }
    if len > max {
        return Err(RelayError::FrameError {
            reason: format!("login frame too large: {} bytes (max {})", len, max),
        });
    }
    Ok(len)
}

/// Read exactly `len` bytes of frame body.
pub async fn read_frame_body<T>(io: &mut T, len: usize) -> Result<Vec<u8>, RelayError>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await.map_err(short_read)?;
    Ok(buf)
}

fn short_read(e: std::io::Error) -> RelayError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RelayError::FrameError {
            reason: "short read".to_string(),
        }
    } else {
        RelayError::Io(e)
    }
}
