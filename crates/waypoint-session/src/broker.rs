use futures::Stream;
use tokio::sync::mpsc;
use waypoint_types::StreamFrame;

/// Orders outbound frames and closes the stream deterministically.
///
/// Frames are relayed in exactly the order they are sent; a bounded channel
/// applies backpressure to the sender. After a terminal frame (`done`,
/// `stopped`, `error`) every further send is dropped, so a consumer can
/// treat the first terminal frame as the end of the turn.
pub struct StreamBroker {
    tx: mpsc::Sender<StreamFrame>,
    terminated: bool,
}

impl StreamBroker {
    /// Create a broker and the receiving half of its frame channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                terminated: false,
            },
            rx,
        )
    }

    /// Relay one frame. Returns whether the consumer received it.
    ///
    /// A closed receiver is not an error: the turn keeps running so its
    /// result is still committed, and the disconnected client re-queries
    /// history to learn the outcome.
    pub async fn send(&mut self, frame: StreamFrame) -> bool {
        if self.terminated {
            tracing::warn!(?frame, "dropping frame after terminal event");
            return false;
        }
        if frame.is_terminal() {
            self.terminated = true;
        }
        match self.tx.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(frame = ?e.0, "frame receiver dropped");
                false
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Adapt a frame receiver into an ordered byte stream, one encoded
/// newline-delimited JSON frame per event.
pub fn byte_stream(rx: mpsc::Receiver<StreamFrame>) -> impl Stream<Item = Vec<u8>> {
    async_stream::stream! {
        let mut rx = rx;
        while let Some(frame) = rx.recv().await {
            match frame.encode() {
                Ok(bytes) => yield bytes,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode frame");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn preserves_order_and_closes_after_terminal() {
        let (mut broker, mut rx) = StreamBroker::channel(8);

        assert!(
            broker
                .send(StreamFrame::Content {
                    text: "a".to_string()
                })
                .await
        );
        assert!(
            broker
                .send(StreamFrame::Content {
                    text: "b".to_string()
                })
                .await
        );
        assert!(broker.send(StreamFrame::Done).await);

        // Frames after the terminal are dropped.
        assert!(
            !broker
                .send(StreamFrame::Content {
                    text: "late".to_string()
                })
                .await
        );
        drop(broker);

        let mut kinds = Vec::new();
        while let Some(frame) = rx.recv().await {
            kinds.push(frame);
        }
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[0], StreamFrame::Content { ref text } if text == "a"));
        assert!(matches!(kinds[1], StreamFrame::Content { ref text } if text == "b"));
        assert!(kinds[2].is_terminal());
    }

    #[tokio::test]
    async fn send_survives_dropped_receiver() {
        let (mut broker, rx) = StreamBroker::channel(8);
        drop(rx);
        assert!(
            !broker
                .send(StreamFrame::Content {
                    text: "x".to_string()
                })
                .await
        );
        // Terminal bookkeeping still applies.
        assert!(!broker.send(StreamFrame::Done).await);
        assert!(broker.is_terminated());
    }

    #[tokio::test]
    async fn byte_stream_emits_one_line_per_frame() {
        let (mut broker, rx) = StreamBroker::channel(8);
        let lines = tokio::spawn(async move { byte_stream(rx).collect::<Vec<_>>().await });

        broker
            .send(StreamFrame::Content {
                text: "hi".to_string(),
            })
            .await;
        broker.send(StreamFrame::Done).await;
        drop(broker);

        let lines = lines.await.unwrap();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.last(), Some(&b'\n'));
            let frame: StreamFrame = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
            let _ = frame;
        }
    }
}
