use tokio::io::{AsyncRead, AsyncWrite};

/// A connected, bidirectional byte stream.
///
/// Blanket-implemented for anything that reads and writes asynchronously, so a
/// `TcpStream`, a TLS stream or an in-memory `DuplexStream` can all carry a
/// handshake or a session.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased [`Transport`], the form handed across collaborator boundaries.
pub type BoxTransport = Box<dyn Transport>;
