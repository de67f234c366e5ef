//! Serialized capture queue.
//!
//! A single worker task owns the [`Capturer`], so operations from any number
//! of callers (or one batch over many targets) run strictly one at a time and
//! share one capture rate limit.

use crate::orchestrator::{CancelHandle, CaptureRequest, Capturer, ProgressFn};
use crate::{CaptureConfig, CaptureResult, Error, Host, Rect, Result, ScrollSurface};
use log::debug;
use tokio::sync::{mpsc, oneshot};

enum Command<H> {
    Capture {
        target: H,
        request: CaptureRequest,
        progress: Option<ProgressFn>,
        resp: oneshot::Sender<Result<CaptureResult>>,
    },
    Close(oneshot::Sender<()>),
}

/// An async capture service backed by a dedicated worker task.
///
/// The worker owns a single [`Capturer`] and runs queued operations strictly
/// one after another, even when they target different documents, so only one
/// viewport is ever being scrolled and the capture rate limit is shared.
pub struct CaptureQueue<H: Host> {
    cmd_tx: mpsc::UnboundedSender<Command<H>>,
    cancel: CancelHandle,
}

impl<H: Host> Clone for CaptureQueue<H> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<H: Host> CaptureQueue<H> {
    /// Spawn the worker on the current tokio runtime.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let mut capturer = Capturer::new(config);
        let cancel = capturer.cancel_handle();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command<H>>();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    Command::Capture { target, request, progress, resp } => {
                        let res = capturer.run(&target, request, progress).await;
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(());
                        break;
                    }
                }
            }
            debug!("capture queue worker stopped");
        });

        Ok(Self { cmd_tx, cancel })
    }

    /// Queue one operation and wait for its result.
    pub async fn capture(&self, target: H, request: CaptureRequest, progress: Option<ProgressFn>) -> Result<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Capture { target, request, progress, resp: tx })
            .map_err(|_| Error::Other("capture queue closed".into()))?;
        rx.await.map_err(|_| Error::Other("capture worker dropped".into()))?
    }

    pub async fn capture_visible(&self, target: H) -> Result<CaptureResult> {
        self.capture(target, CaptureRequest::Visible, None).await
    }

    pub async fn capture_full_page(&self, target: H, progress: Option<ProgressFn>) -> Result<CaptureResult> {
        self.capture(target, CaptureRequest::FullPage, progress).await
    }

    pub async fn capture_selection(&self, target: H, rect: Rect, container: Option<ScrollSurface>) -> Result<CaptureResult> {
        self.capture(target, CaptureRequest::Selection { rect, container }, None).await
    }

    /// Run `request` against every target in order. One failing target does
    /// not stop the rest.
    pub async fn capture_batch(&self, targets: Vec<H>, request: CaptureRequest) -> Vec<Result<CaptureResult>> {
        let mut pending = Vec::with_capacity(targets.len());
        for target in targets {
            let (tx, rx) = oneshot::channel();
            let sent = self.cmd_tx.send(Command::Capture {
                target,
                request: request.clone(),
                progress: None,
                resp: tx,
            });
            pending.push(sent.map(|_| rx));
        }

        let mut results = Vec::with_capacity(pending.len());
        for p in pending {
            let res = match p {
                Ok(rx) => rx.await.unwrap_or_else(|_| Err(Error::Other("capture worker dropped".into()))),
                Err(_) => Err(Error::Other("capture queue closed".into())),
            };
            results.push(res);
        }
        results
    }

    /// Cancel whichever operation is running right now.
    pub fn cancel_current(&self) {
        self.cancel.cancel();
    }

    /// Stop the worker after already-queued operations finish.
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(tx))
            .map_err(|_| Error::Other("capture queue closed".into()))?;
        rx.await.map_err(|_| Error::Other("capture worker dropped".into()))
    }
}
