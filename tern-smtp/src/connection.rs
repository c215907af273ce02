//! The duplex byte pipe a session talks through.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tern_common::{internal, outgoing};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

use crate::{
    error::{ConnectionError, ConnectionResult, TlsError, TlsResult},
    response::Response,
};

/// Longest line accepted, terminator included.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

enum Connection<Stream> {
    Plain(Stream),
    Tls(Box<TlsStream<Stream>>),
    /// Left behind while an upgrade is in progress, or after one failed.
    Closed,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    async fn read_buf(&mut self, buffer: &mut BytesMut) -> ConnectionResult<usize> {
        Ok(match self {
            Self::Plain(stream) => stream.read_buf(buffer).await?,
            Self::Tls(stream) => stream.read_buf(buffer).await?,
            Self::Closed => return Err(ConnectionError::InvalidState("read on closed pipe")),
        })
    }

    async fn write_all(&mut self, data: &[u8]) -> ConnectionResult<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Closed => return Err(ConnectionError::InvalidState("write on closed pipe")),
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> ConnectionResult<()> {
        match self {
            Self::Plain(stream) => stream.shutdown().await?,
            Self::Tls(stream) => stream.shutdown().await?,
            Self::Closed => {}
        }

        Ok(())
    }
}

/// A connection plus the bytes read from it but not yet consumed.
///
/// Received data is kept as the segments it arrived in; a line handed out
/// by [`Pipe::read_line`] may span several of them.
pub struct Pipe<Stream> {
    connection: Connection<Stream>,
    segments: VecDeque<Bytes>,
    buffered: usize,
    /// Bytes already searched for a line terminator.
    scanned: usize,
    read_size: usize,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Pipe<Stream> {
    #[must_use]
    pub fn new(stream: Stream, read_size: usize) -> Self {
        Self {
            connection: Connection::Plain(stream),
            segments: VecDeque::new(),
            buffered: 0,
            scanned: 0,
            read_size: read_size.max(64),
        }
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self.connection, Connection::Tls(_))
    }

    async fn fill(&mut self) -> ConnectionResult<usize> {
        let mut buffer = BytesMut::with_capacity(self.read_size);
        let read = self.connection.read_buf(&mut buffer).await?;

        if read > 0 {
            self.buffered += read;
            self.segments.push_back(buffer.freeze());
        }

        Ok(read)
    }

    /// Length of the first line, terminator included, if one is buffered.
    fn line_length(&mut self) -> Option<usize> {
        let mut offset = 0;

        for segment in &self.segments {
            let end = offset + segment.len();
            if end > self.scanned {
                let start = self.scanned.saturating_sub(offset);
                if let Some(position) = segment[start..].iter().position(|&b| b == b'\n') {
                    self.scanned = 0;
                    return Some(offset + start + position + 1);
                }
            }
            offset = end;
        }

        self.scanned = offset;
        None
    }

    /// Remove the first `length` buffered bytes, keeping segment boundaries.
    fn split_front(&mut self, mut length: usize) -> Vec<Bytes> {
        let mut line = Vec::new();
        self.buffered -= length;

        while length > 0 {
            let Some(mut segment) = self.segments.pop_front() else {
                break;
            };

            if segment.len() > length {
                let rest = segment.split_off(length);
                self.segments.push_front(rest);
            }

            length -= segment.len();
            line.push(segment);
        }

        line
    }

    /// Read up to and including the next LF.
    ///
    /// Returns `Ok(None)` if the peer closed the connection cleanly between
    /// lines.
    ///
    /// # Errors
    /// [`ConnectionError::Closed`] if the peer closed mid-line,
    /// [`ConnectionError::LineTooLong`] if no terminator arrives in time, or
    /// the underlying I/O error.
    pub async fn read_line(&mut self) -> ConnectionResult<Option<Vec<Bytes>>> {
        loop {
            if let Some(length) = self.line_length() {
                return Ok(Some(self.split_front(length)));
            }

            if self.buffered > MAX_LINE_LENGTH {
                return Err(ConnectionError::LineTooLong(MAX_LINE_LENGTH));
            }

            if self.fill().await? == 0 {
                return if self.buffered == 0 {
                    Ok(None)
                } else {
                    Err(ConnectionError::Closed)
                };
            }
        }
    }

    /// Write `response` in wire format.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    pub async fn write_response(&mut self, response: &Response) -> ConnectionResult<()> {
        outgoing!("{response}");
        self.connection.write_all(response.to_wire().as_bytes()).await
    }

    /// Drop everything buffered, returning how many bytes were discarded.
    pub fn discard_buffered(&mut self) -> usize {
        let discarded = self.buffered;
        self.segments.clear();
        self.buffered = 0;
        self.scanned = 0;
        discarded
    }

    /// Replace the plaintext transport with TLS, in place.
    ///
    /// Plaintext buffered past the line that requested the upgrade is
    /// discarded. Upgrading twice is an error.
    ///
    /// # Errors
    /// [`TlsError::AlreadySecure`] on a second upgrade, or
    /// [`TlsError::UpgradeFailed`] if the handshake fails, in which case the
    /// pipe is unusable afterwards.
    pub async fn upgrade(&mut self, acceptor: &TlsAcceptor) -> TlsResult<()> {
        let stream = match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Plain(stream) => stream,
            connection @ Connection::Tls(_) => {
                self.connection = connection;
                return Err(TlsError::AlreadySecure);
            }
            Connection::Closed => {
                return Err(TlsError::UpgradeFailed("connection closed".to_string()));
            }
        };

        let discarded = self.discard_buffered();
        if discarded > 0 {
            internal!(
                level = WARN,
                "Discarding {discarded} bytes of plaintext sent before the TLS handshake"
            );
        }

        let stream = acceptor
            .accept(stream)
            .await
            .map_err(|err| TlsError::UpgradeFailed(err.to_string()))?;

        if let (Some(version), Some(suite)) = (
            stream.get_ref().1.protocol_version(),
            stream.get_ref().1.negotiated_cipher_suite(),
        ) {
            tracing::debug!("Upgraded connection to {version:?} using {:?}", suite.suite());
        }

        self.connection = Connection::Tls(Box::new(stream));
        Ok(())
    }

    /// Flush and close the write half.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.connection.shutdown().await
    }
}

/// Accumulates a DATA block line by line, undoing dot-stuffing.
#[derive(Debug)]
pub struct DotUnstuffer {
    content: BytesMut,
    size: usize,
    limit: usize,
    exceeded: bool,
}

impl DotUnstuffer {
    /// `limit` is the largest content accepted in bytes; 0 means unlimited.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            content: BytesMut::new(),
            size: 0,
            limit,
            exceeded: false,
        }
    }

    /// Feed one line, terminator included. Returns `true` on the lone `.`
    /// that ends the block; that line is not part of the content.
    pub fn push_line(&mut self, segments: &[Bytes]) -> bool {
        let mut line = BytesMut::with_capacity(segments.iter().map(Bytes::len).sum());
        for segment in segments {
            line.extend_from_slice(segment);
        }

        if matches!(&line[..], b".\r\n" | b".\n" | b".") {
            return true;
        }

        let line = if line.first() == Some(&b'.') {
            &line[1..]
        } else {
            &line[..]
        };

        self.size += line.len();
        if self.limit > 0 && self.size > self.limit {
            self.exceeded = true;
            self.content.clear();
        }

        if !self.exceeded {
            self.content.extend_from_slice(line);
        }

        false
    }

    /// Total unstuffed bytes seen, including any dropped for size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn exceeded(&self) -> bool {
        self.exceeded
    }

    #[must_use]
    pub fn finish(self) -> Bytes {
        self.content.freeze()
    }
}
