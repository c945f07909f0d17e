//! Stdio transport — reads observations from stdin, writes events to stdout.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use lbs_locator::{LocatorEvent, LocatorHandle, RequestState};

use crate::error::{DaemonError, DaemonResult};

use super::framing::{self, FeedMessage};

/// Line-oriented feed between a host process and a running locator.
pub struct StdioTransport {
    handle: LocatorHandle,
}

impl StdioTransport {
    pub fn new(handle: LocatorHandle) -> Self {
        Self { handle }
    }

    /// Run the transport loop over the process stdin and stdout.
    pub async fn run(&self) -> DaemonResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        self.run_with(stdin, tokio::io::stdout()).await
    }

    /// Run the transport loop until the input reaches EOF.
    pub async fn run_with<R, W>(&self, reader: R, mut writer: W) -> DaemonResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut events = self.handle.subscribe();

        tracing::info!("Stdio transport started");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("EOF on stdin, shutting down");
                        break;
                    };
                    self.handle_line(&line)?;
                }
                event = events.recv() => {
                    if !forward(event, &mut writer).await? {
                        return Ok(());
                    }
                }
            }
        }

        self.drain(&mut events, &mut writer).await
    }

    /// Write out events until the locator has no lookup outstanding.
    ///
    /// The lifecycle timeout bounds the wait: an issued lookup always ends in
    /// exactly one terminal event.
    async fn drain<W>(
        &self,
        events: &mut broadcast::Receiver<LocatorEvent>,
        writer: &mut W,
    ) -> DaemonResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            while let Some(event) = ready(events) {
                if !forward(event, writer).await? {
                    return Ok(());
                }
            }
            // Events emitted before the status reply are already buffered.
            let idle = match self.handle.status().await {
                Some(status) => status.request_state == RequestState::Idle,
                None => true,
            };
            if idle {
                break;
            }
            tracing::debug!("Waiting for outstanding lookup");
            if !forward(events.recv().await, writer).await? {
                return Ok(());
            }
        }

        while let Some(event) = ready(events) {
            if !forward(event, writer).await? {
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&self, line: &str) -> DaemonResult<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        let delivered = match framing::parse_message(trimmed) {
            Ok(FeedMessage::Environment(raw)) => self.handle.environment_changed(raw),
            Ok(FeedMessage::WlanPermission { wlan_data_allowed }) => {
                tracing::debug!(wlan_data_allowed, "Wi-Fi permission changed");
                self.handle.set_wlan_data_allowed(wlan_data_allowed)
            }
            Err(e) => {
                tracing::warn!("Skipping input line: {e}");
                true
            }
        };

        if delivered {
            Ok(())
        } else {
            Err(DaemonError::LocatorStopped)
        }
    }
}

/// An already-buffered event, if any.
fn ready(
    events: &mut broadcast::Receiver<LocatorEvent>,
) -> Option<Result<LocatorEvent, RecvError>> {
    match events.try_recv() {
        Ok(event) => Some(Ok(event)),
        Err(TryRecvError::Lagged(missed)) => Some(Err(RecvError::Lagged(missed))),
        Err(TryRecvError::Closed) => Some(Err(RecvError::Closed)),
        Err(TryRecvError::Empty) => None,
    }
}

/// Write one received event. Returns `false` once the bus is closed.
async fn forward<W>(event: Result<LocatorEvent, RecvError>, writer: &mut W) -> DaemonResult<bool>
where
    W: AsyncWrite + Unpin,
{
    match event {
        Ok(event) => {
            let framed = framing::frame_event(&event)?;
            writer.write_all(framed.as_bytes()).await?;
            writer.flush().await?;
            Ok(true)
        }
        Err(RecvError::Lagged(missed)) => {
            tracing::warn!("Output fell behind, dropped {missed} events");
            Ok(true)
        }
        Err(RecvError::Closed) => Ok(false),
    }
}
