//! # Session Boundary
//!
//! A [`Session`] is the typed message pipe the overlay runs on top of: an
//! inbound queue the remote side fills and an outbound queue the local side
//! fills. Termination of the underlying connection is visible only as the
//! inbound queue closing; the overlay never sees socket errors directly.
//!
//! Two constructors are provided:
//!
//! - [`Session::pair`]: two connected in-memory endpoints.
//! - [`Session::framed`]: adapts any async byte stream (TCP, Unix socket,
//!   in-memory duplex) using `u32` big-endian length prefixed bincode frames.
//!
//! Frame handling on the framed adapter:
//!
//! | Condition | Effect |
//! |-----------|--------|
//! | frame decodes | delivered inbound |
//! | body fails to decode | logged and skipped, stream stays up |
//! | length above [`MAX_FRAME_SIZE`] | stream torn down, inbound closes |
//! | read error / EOF | inbound closes |
//! | outbound queue closed | write half shut down |

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::messages::{self, Message, MAX_FRAME_SIZE};

#[derive(Debug)]
pub struct Session {
    pub inbound: mpsc::Receiver<Message>,
    pub outbound: mpsc::Sender<Message>,
}

impl Session {
    pub fn new(inbound: mpsc::Receiver<Message>, outbound: mpsc::Sender<Message>) -> Self {
        Self { inbound, outbound }
    }

    /// Two in-memory endpoints wired back to back.
    pub fn pair(buffer: usize) -> (Session, Session) {
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);
        (Session::new(b_rx, a_tx), Session::new(a_rx, b_tx))
    }

    /// Run a session over a byte stream. Spawns one reader and one writer task;
    /// both end on their own when the stream or the queues close.
    pub fn framed<S>(stream: S, buffer: usize) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::channel(buffer);

        tokio::spawn(async move {
            if let Err(e) = read_frames(reader, in_tx).await {
                debug!(error = %e, "session reader stopped");
            }
        });
        tokio::spawn(async move {
            if let Err(e) = write_frames(writer, out_rx).await {
                debug!(error = %e, "session writer stopped");
            }
        });

        Session::new(in_rx, out_tx)
    }

    pub fn split(self) -> (mpsc::Receiver<Message>, mpsc::Sender<Message>) {
        (self.inbound, self.outbound)
    }
}

async fn read_frames<R>(mut reader: R, inbound: mpsc::Sender<Message>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            trace!("session stream closed");
            return Ok(());
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            warn!(size = len, max = MAX_FRAME_SIZE, "peer sent oversized frame");
            anyhow::bail!("frame too large: {} bytes (max {})", len, MAX_FRAME_SIZE);
        }

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .context("truncated frame")?;

        let msg: Message = match messages::decode(&body) {
            Ok(msg) => msg,
            Err(e) => {
                // Framing is intact, so the stream is still usable.
                warn!(error = %e, size = len, "dropping undecodable frame");
                continue;
            }
        };
        if inbound.send(msg).await.is_err() {
            return Ok(());
        }
    }
}

async fn write_frames<W>(mut writer: W, mut outbound: mpsc::Receiver<Message>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        // Encoding is size-limited, so an oversized message fails here.
        let bytes = match messages::encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, max = MAX_FRAME_SIZE, "refusing to send unencodable message");
                continue;
            }
        };
        let len = bytes.len() as u32;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::identity::NodeId;
    use crate::messages::{Header, StateMessage};

    const WAIT: Duration = Duration::from_secs(2);

    fn beat(updated: u64) -> Message {
        Message::new(
            Header::state(NodeId::from(1), StateMessage::beat(updated, false)),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn pair_delivers_both_ways() {
        let (mut a, mut b) = Session::pair(4);

        a.outbound.send(beat(1)).await.unwrap();
        b.outbound.send(beat(2)).await.unwrap();

        assert_eq!(b.inbound.recv().await.unwrap(), beat(1));
        assert_eq!(a.inbound.recv().await.unwrap(), beat(2));
    }

    #[tokio::test]
    async fn pair_closes_when_remote_goes_away() {
        let (mut a, b) = Session::pair(4);
        drop(b);
        assert!(a.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn framed_session_round_trips() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let a = Session::framed(left, 8);
        let mut b = Session::framed(right, 8);

        for i in 0..5 {
            a.outbound.send(beat(i)).await.unwrap();
        }
        for i in 0..5 {
            let got = timeout(WAIT, b.inbound.recv()).await.unwrap().unwrap();
            assert_eq!(got, beat(i));
        }
    }

    #[tokio::test]
    async fn framed_session_skips_undecodable_frame() {
        let (left, mut right) = tokio::io::duplex(64 * 1024);
        let mut session = Session::framed(left, 8);

        let garbage = [0xFFu8, 0xFE, 0xFD];
        right.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        right.write_all(&garbage).await.unwrap();

        let good = messages::encode(&beat(9)).unwrap();
        right.write_all(&(good.len() as u32).to_be_bytes()).await.unwrap();
        right.write_all(&good).await.unwrap();

        let got = timeout(WAIT, session.inbound.recv()).await.unwrap().unwrap();
        assert_eq!(got, beat(9));
    }

    #[tokio::test]
    async fn framed_session_closes_on_oversized_frame() {
        let (left, mut right) = tokio::io::duplex(64 * 1024);
        let mut session = Session::framed(left, 8);

        let len = (MAX_FRAME_SIZE as u32) + 1;
        right.write_all(&len.to_be_bytes()).await.unwrap();

        let got = timeout(WAIT, session.inbound.recv()).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn framed_session_closes_on_eof() {
        let (left, right) = tokio::io::duplex(1024);
        let mut session = Session::framed(left, 8);
        drop(right);

        let got = timeout(WAIT, session.inbound.recv()).await.unwrap();
        assert!(got.is_none());
    }
}
