//! WebSocket connection driver.
//!
//! The socket is split in two halves that run joined in one task. The reader
//! parses frames and calls the [`MessageHandler`]; the writer drains the
//! outgoing [`WriteQueue`]. The queue sits behind the send lock so handlers may
//! push messages from any task through a [`MessageSender`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{MutexGuard, Notify};
use tracing::{debug, trace};

use crate::buffer::{ReadBuffer, WriteQueue};
use crate::config::WebSocketConfig;
use crate::lifecycle::{BoxedStream, ConnectionBase, ConnectionControl, UpgradeContext};
use crate::ws::frame::{CloseReason, MAX_CONTROL_PAYLOAD, MessageKind, Opcode, header_len, write_header};
use crate::ws::framer::{FrameReader, Incoming};

pub const BUFFER_SIZE: usize = 4096;

/// Receives the events of one WebSocket connection.
///
/// Callbacks run on the connection task; a slow handler stalls reading.
#[async_trait]
pub trait MessageHandler: Send {
    /// Called once before the first message. The sender stays usable for the
    /// lifetime of the connection and may be moved to other tasks.
    async fn on_open(&mut self, _sender: MessageSender) {}

    async fn on_message(&mut self, kind: MessageKind, payload: &[u8]);

    /// Called once when the connection ends. No more messages can be sent.
    async fn on_close(&mut self, _reason: CloseReason) {}
}

struct Shared {
    queue: tokio::sync::Mutex<WriteQueue<BUFFER_SIZE>>,
    wake: Notify,
    closing: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    control: Arc<ConnectionControl>,
}

/// Handle for sending frames on a WebSocket connection.
#[derive(Clone)]
pub struct MessageSender {
    shared: Arc<Shared>,
}

impl MessageSender {
    fn new(control: Arc<ConnectionControl>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: tokio::sync::Mutex::new(WriteQueue::new()),
                wake: Notify::new(),
                closing: AtomicBool::new(false),
                close_reason: Mutex::new(None),
                control,
            }),
        }
    }

    /// Takes the send lock. Frames are queued in the order the lock is taken.
    pub async fn lock(&self) -> SendGuard<'_> {
        SendGuard {
            queue: self.shared.queue.lock().await,
            shared: &self.shared,
            allocated: false,
        }
    }

    /// Queues a complete message. Returns `false` once the connection is
    /// closing.
    pub async fn send(&self, kind: MessageKind, payload: &[u8]) -> bool {
        let mut guard = self.lock().await;
        guard.allocate(kind, payload.len()).copy_from_slice(payload);
        guard.send()
    }

    pub async fn ping(&self) {
        let mut guard = self.lock().await;
        if !self.is_closing() {
            guard.push_control(Opcode::Ping, &[]);
        }
    }

    pub(crate) async fn pong(&self, payload: &[u8]) {
        let mut guard = self.lock().await;
        if !self.is_closing() {
            guard.push_control(Opcode::Pong, payload);
        }
    }

    /// Sends a close frame. The connection ends once the queued frames are
    /// written. Later calls have no effect.
    pub async fn close(&self, reason: CloseReason) {
        let mut guard = self.lock().await;
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        *self
            .shared
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);

        let code = reason.code().to_be_bytes();
        let payload: &[u8] = if reason.is_local_only() { &[] } else { &code };
        guard.push_control(Opcode::Close, payload);
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        *self
            .shared
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to the outgoing queue.
///
/// An allocation that is neither sent nor deallocated is discarded when the
/// guard is dropped.
pub struct SendGuard<'a> {
    queue: MutexGuard<'a, WriteQueue<BUFFER_SIZE>>,
    shared: &'a Shared,
    allocated: bool,
}

impl SendGuard<'_> {
    /// Reserves a frame for a `len` byte message and returns its payload.
    pub fn allocate(&mut self, kind: MessageKind, len: usize) -> &mut [u8] {
        if self.allocated {
            self.queue.commit(0);
        }
        self.allocated = true;

        let header_len = header_len(len);
        let frame = self.queue.allocate(header_len + len);
        write_header(frame, kind.opcode(), len);
        &mut frame[header_len..]
    }

    /// Queues the allocated frame and wakes the writer. Returns `false` if the
    /// connection is closing; the frame is discarded then.
    pub fn send(mut self) -> bool {
        if !std::mem::take(&mut self.allocated) {
            return false;
        }
        if self.shared.closing.load(Ordering::Acquire) {
            self.queue.commit(0);
            return false;
        }
        self.queue.commit_all();
        self.shared.wake.notify_one();
        true
    }

    pub fn deallocate(mut self) {
        if std::mem::take(&mut self.allocated) {
            self.queue.commit(0);
        }
    }

    fn push_control(&mut self, opcode: Opcode, payload: &[u8]) {
        let payload = &payload[..payload.len().min(MAX_CONTROL_PAYLOAD)];
        let frame = self.queue.allocate(header_len(payload.len()) + payload.len());
        let header_len = write_header(frame, opcode, payload.len());
        frame[header_len..].copy_from_slice(payload);
        self.queue.commit_all();
        self.shared.wake.notify_one();
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if self.allocated {
            self.queue.commit(0);
        }
    }
}

/// Starts the driver for an upgraded socket on its own task.
pub fn spawn(
    stream: BoxedStream,
    leftover: Vec<u8>,
    handler: Box<dyn MessageHandler>,
    config: WebSocketConfig,
    ctx: UpgradeContext,
) -> Arc<dyn ConnectionBase> {
    let control = ConnectionControl::new(config.silent_limit());
    let sender = MessageSender::new(control.clone());
    tokio::spawn(run(stream, leftover, handler, config, sender, ctx));
    control
}

async fn run(
    stream: BoxedStream,
    leftover: Vec<u8>,
    mut handler: Box<dyn MessageHandler>,
    config: WebSocketConfig,
    sender: MessageSender,
    ctx: UpgradeContext,
) {
    let control = sender.shared.control.clone();
    ctx.log.on_connection(control.id(), ctx.peer);

    let (read_half, write_half) = tokio::io::split(stream);
    handler.on_open(sender.clone()).await;

    let reading = async {
        let reason = read_frames(read_half, leftover, handler.as_mut(), &sender, &config).await;
        handler.on_close(reason).await;
        reason
    };
    let (reason, ()) = tokio::join!(reading, write_frames(write_half, &sender.shared));

    debug!(
        connection = control.id(),
        upgraded_from = ctx.connection_id,
        code = reason.code(),
        "WebSocket closed"
    );
    control.mark_finished();
    ctx.log.on_connection_finished(control.id());
}

enum ReadEvent {
    Data(usize),
    Closed,
    Stopped,
    PingDue,
}

async fn read_frames(
    mut stream: ReadHalf<BoxedStream>,
    leftover: Vec<u8>,
    handler: &mut dyn MessageHandler,
    sender: &MessageSender,
    config: &WebSocketConfig,
) -> CloseReason {
    let control = &sender.shared.control;
    let mut buf = ReadBuffer::<BUFFER_SIZE>::new();
    buf.extend_from_slice(&leftover);
    let mut reader = FrameReader::new(config);
    let mut pinged = false;

    loop {
        loop {
            let header = match reader.poll_frame(&mut buf) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(violation) => return fail(sender, violation).await,
            };
            match reader.dispatch(header, &mut buf) {
                Ok(Incoming::Message(kind, payload)) => handler.on_message(kind, payload).await,
                Ok(Incoming::Ping(payload)) => sender.pong(payload).await,
                Ok(Incoming::Pong | Incoming::Fragment) => {}
                Ok(Incoming::Close(reason)) => {
                    trace!(code = reason.code(), "Close frame received");
                    sender.close(reason).await;
                    return reason;
                }
                Err(violation) => return fail(sender, violation).await,
            }
            reader.finish(&mut buf);
        }

        if buf.free_len() == 0 {
            buf.request_data(buf.available_len() + 1);
        }
        let event = tokio::select! {
            res = stream.read(buf.read_space()) => match res {
                Ok(0) => ReadEvent::Closed,
                Ok(len) => ReadEvent::Data(len),
                Err(e) => {
                    debug!(error = %e, "WebSocket read failed");
                    ReadEvent::Closed
                }
            },
            _ = control.stopped() => ReadEvent::Stopped,
            _ = tokio::time::sleep(config.ping_period()), if !pinged => ReadEvent::PingDue,
        };

        match event {
            ReadEvent::Data(len) => {
                buf.on_new_data(len);
                control.touch();
                pinged = false;
            }
            ReadEvent::PingDue => {
                sender.ping().await;
                pinged = true;
            }
            ReadEvent::Closed => {
                control.stop();
                return sender.close_reason().unwrap_or(CloseReason::Abnormal);
            }
            ReadEvent::Stopped => {
                return sender.close_reason().unwrap_or(CloseReason::GoingAway);
            }
        }
    }
}

async fn fail(sender: &MessageSender, violation: CloseReason) -> CloseReason {
    debug!(code = violation.code(), "WebSocket protocol violation");
    sender.close(violation).await;
    violation
}

async fn write_frames(mut stream: WriteHalf<BoxedStream>, shared: &Shared) {
    let control = &shared.control;
    // Frames are copied out under the send lock and written after it is
    // released, so senders never wait on the socket.
    let mut batch = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let closing = {
            let mut queue = shared.queue.lock().await;
            while let Some(bytes) = queue.pop() {
                batch.extend_from_slice(bytes);
                queue.release();
            }
            shared.closing.load(Ordering::Acquire)
        };

        if !batch.is_empty() {
            let res = tokio::select! {
                res = stream.write_all(&batch) => res,
                _ = control.stopped() => break,
            };
            if let Err(e) = res {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
            batch.clear();
            control.touch();
            if stream.flush().await.is_err() {
                break;
            }
        }
        if closing {
            break;
        }

        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = control.stopped() => break,
        }
    }

    let _ = stream.shutdown().await;
    control.stop();
}

/// Sends every message back to the peer.
#[derive(Debug, Default)]
pub struct EchoHandler {
    sender: Option<MessageSender>,
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_open(&mut self, sender: MessageSender) {
        self.sender = Some(sender);
    }

    async fn on_message(&mut self, kind: MessageKind, payload: &[u8]) {
        if let Some(sender) = &self.sender {
            sender.send(kind, payload).await;
        }
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("connection", &self.shared.control.id())
            .field("closing", &self.is_closing())
            .finish()
    }
}
