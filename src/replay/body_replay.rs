use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::transport::{Body, BoxStream};

/// Keeps a copy of a request body while the first attempt consumes it.
///
/// `capture` hands back the body to send now; `replay` builds the body for a
/// retry from whatever the first attempt read, followed by whatever it left
/// unread. The unread tail is taken away from the first attempt at that
/// point, so the retry does not depend on when the first transport lets go of
/// its copy.
#[derive(Debug)]
pub enum BodyReplayBuffer {
    None,
    Full(Bytes),
    Stream(Arc<Mutex<TeeState>>),
}

#[derive(Default)]
pub struct TeeState {
    captured: BytesMut,
    inner: Option<BoxStream>,
    finished: bool,
    waker: Option<Waker>,
}

impl std::fmt::Debug for TeeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeState")
            .field("captured", &self.captured.len())
            .field("unread", &self.inner.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

impl BodyReplayBuffer {
    pub fn capture(body: Body) -> (Body, Self) {
        match body {
            Body::Empty => (Body::Empty, BodyReplayBuffer::None),
            Body::Full(bytes) => (Body::Full(bytes.clone()), BodyReplayBuffer::Full(bytes)),
            Body::Stream(stream) => {
                let state = Arc::new(Mutex::new(TeeState {
                    inner: Some(stream),
                    ..TeeState::default()
                }));
                let tee = TeeStream {
                    state: state.clone(),
                };
                (Body::wrap_stream(tee), BodyReplayBuffer::Stream(state))
            }
        }
    }

    /// Body for the retried attempt.
    pub fn replay(self) -> Body {
        match self {
            BodyReplayBuffer::None => Body::Empty,
            BodyReplayBuffer::Full(bytes) => Body::Full(bytes),
            BodyReplayBuffer::Stream(state) => {
                let mut state = lock(&state);
                let captured = std::mem::take(&mut state.captured).freeze();
                let rest = state.inner.take();
                if let Some(waker) = state.waker.take() {
                    waker.wake();
                }
                match rest {
                    Some(rest) if !state.finished => {
                        let head = futures::stream::once(async move { Ok(captured) });
                        Body::wrap_stream(head.chain(rest))
                    }
                    _ => Body::Full(captured),
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn captured_len(&self) -> usize {
        match self {
            BodyReplayBuffer::None => 0,
            BodyReplayBuffer::Full(bytes) => bytes.len(),
            BodyReplayBuffer::Stream(state) => lock(state).captured.len(),
        }
    }
}

fn lock(state: &Mutex<TeeState>) -> MutexGuard<'_, TeeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pass-through stream copying every chunk into the shared buffer.
struct TeeStream {
    state: Arc<Mutex<TeeState>>,
}

impl Stream for TeeStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = lock(&self.state);
        if state.finished {
            return Poll::Ready(None);
        }
        let Some(inner) = state.inner.as_mut() else {
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "request body was handed over to the retry",
            ))));
        };
        let polled = inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => state.captured.extend_from_slice(chunk),
            Poll::Ready(None) => {
                state.finished = true;
                state.inner = None;
            }
            Poll::Pending => state.waker = Some(cx.waker().clone()),
            Poll::Ready(Some(Err(_))) => {}
        }
        polled
    }
}
