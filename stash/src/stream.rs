//! Byte stream helpers, including a stream whose source is resolved after it
//! has been handed out.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{CacheError, Result};
use crate::value::{ByteStream, Encoding, Value};

const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// A stream that yields `bytes` once and ends.
pub(crate) fn once(bytes: Bytes) -> ByteStream {
  stream::once(async move { Ok(bytes) }).boxed()
}

/// A stream over a file starting at `offset`. The file is opened on first poll.
pub(crate) fn file_stream(path: PathBuf, offset: u64) -> ByteStream {
  open_stream(async move {
    let mut file = tokio::fs::File::open(&path).await?;
    if offset > 0 {
      file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(file)
  })
}

/// A stream over the remainder of the file `open` resolves to. `open` runs on
/// first poll; its error, if any, is the stream's only item.
pub(crate) fn open_stream<F>(open: F) -> ByteStream
where
  F: Future<Output = io::Result<tokio::fs::File>> + Send + 'static,
{
  enum FileState {
    Unopened(BoxFuture<'static, io::Result<tokio::fs::File>>),
    Open(tokio::fs::File),
  }

  stream::try_unfold(FileState::Unopened(open.boxed()), |state| async move {
    let mut file = match state {
      FileState::Unopened(open) => open.await?,
      FileState::Open(file) => file,
    };

    let mut buf = BytesMut::with_capacity(FILE_CHUNK_SIZE);
    let read = file.read_buf(&mut buf).await?;
    if read == 0 {
      return Ok::<_, io::Error>(None);
    }
    Ok(Some((buf.freeze(), FileState::Open(file))))
  })
  .boxed()
}

/// Reads a stream to the end, concatenating its chunks.
pub(crate) async fn collect(stream: ByteStream) -> io::Result<Bytes> {
  let buf = stream
    .try_fold(BytesMut::new(), |mut buf, chunk| async move {
      buf.extend_from_slice(&chunk);
      Ok(buf)
    })
    .await?;
  Ok(buf.freeze())
}

/// Drains a stream into a `Value` according to `encoding`.
pub(crate) async fn drain(stream: ByteStream, encoding: Encoding) -> io::Result<Value> {
  let bytes = collect(stream).await?;
  match encoding {
    Encoding::Binary => Ok(Value::Binary(bytes)),
    Encoding::Utf8 => String::from_utf8(bytes.to_vec())
      .map(Value::Text)
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
  }
}

enum DelayedState {
  Resolving(BoxFuture<'static, Result<ByteStream>>),
  Streaming(ByteStream),
  Done,
}

/// A read stream returned before its source is known.
///
/// The lookup that produces the real stream runs when the `DelayedStream` is
/// first polled. If the lookup fails, the stream yields that error once and
/// then ends.
pub struct DelayedStream {
  state: DelayedState,
}

impl DelayedStream {
  pub(crate) fn new<F>(source: F) -> Self
  where
    F: Future<Output = Result<ByteStream>> + Send + 'static,
  {
    Self {
      state: DelayedState::Resolving(source.boxed()),
    }
  }
}

fn to_io_error(err: CacheError) -> io::Error {
  match err {
    CacheError::Io(inner) => io::Error::new(inner.kind(), CacheError::Io(inner)),
    other => io::Error::other(other),
  }
}

impl Stream for DelayedStream {
  type Item = io::Result<Bytes>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    loop {
      match &mut this.state {
        DelayedState::Resolving(source) => match source.as_mut().poll(cx) {
          Poll::Pending => return Poll::Pending,
          Poll::Ready(Ok(inner)) => this.state = DelayedState::Streaming(inner),
          Poll::Ready(Err(err)) => {
            this.state = DelayedState::Done;
            return Poll::Ready(Some(Err(to_io_error(err))));
          }
        },
        DelayedState::Streaming(inner) => {
          let next = inner.as_mut().poll_next(cx);
          if let Poll::Ready(None) = next {
            this.state = DelayedState::Done;
          }
          return next;
        }
        DelayedState::Done => return Poll::Ready(None),
      }
    }
  }
}

impl std::fmt::Debug for DelayedStream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = match self.state {
      DelayedState::Resolving(_) => "resolving",
      DelayedState::Streaming(_) => "streaming",
      DelayedState::Done => "done",
    };
    f.debug_struct("DelayedStream").field("state", &state).finish()
  }
}
