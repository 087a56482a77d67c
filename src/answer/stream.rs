use futures::stream::{FusedStream, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::connection::transaction::TransactionShared;
use crate::error::{DriverError, Result};
use crate::protocol::{AnswerRecord, StreamFrame};
use crate::transport::FrameStream;

type Decoder<T> = fn(AnswerRecord) -> Result<T>;

/// Lazily pulled answers of one query
///
/// Every pull first checks that the owning transaction is still open. The
/// stream ends at the service's completion marker and stays ended; a
/// service error fails the transaction and is yielded once before the end.
pub struct ResultStream<T> {
    transaction: Arc<TransactionShared>,
    frames: Option<FrameStream>,
    decode: Decoder<T>,
}

impl<T> ResultStream<T> {
    pub(crate) fn new(
        transaction: Arc<TransactionShared>,
        frames: FrameStream,
        decode: Decoder<T>,
    ) -> Self {
        Self {
            transaction,
            frames: Some(frames),
            decode,
        }
    }

    /// Pull every remaining answer and return how many there were.
    pub async fn drain(mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(answer) = self.next().await {
            answer?;
            count += 1;
        }
        Ok(count)
    }

    /// Pull every remaining answer into a vector.
    pub async fn collect_vec(self) -> Result<Vec<T>> {
        self.try_collect().await
    }

    fn finish(&mut self) {
        self.frames = None;
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(frames) = this.frames.as_mut() else {
            return Poll::Ready(None);
        };

        if let Err(err) = this.transaction.check_open() {
            this.finish();
            return Poll::Ready(Some(Err(err)));
        }

        match frames.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(StreamFrame::Answer(record)))) => {
                Poll::Ready(Some((this.decode)(record)))
            }
            Poll::Ready(Some(Ok(StreamFrame::Done))) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Ok(StreamFrame::Error(error)))) => {
                this.finish();
                this.transaction.fail(error.clone());
                Poll::Ready(Some(Err(DriverError::Server(error))))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(Some(Err(DriverError::IteratorInvalidated)))
            }
        }
    }
}

impl<T> FusedStream for ResultStream<T> {
    fn is_terminated(&self) -> bool {
        self.frames.is_none()
    }
}

impl<T> fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("transaction", &self.transaction.id())
            .field("finished", &self.frames.is_none())
            .finish()
    }
}
