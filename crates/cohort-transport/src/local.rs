//! In-process transport for tests and simulation.
//!
//! A process-wide [`LocalDirectory`] maps each listening address to its
//! entity and accept queue. A connection is a pair of bounded FIFO
//! queues, one per direction; `send` enqueues, `recv` waits until a
//! frame is available or the queue terminates. The directory stamps
//! every endpoint with a monotonically increasing 64-bit uid so two
//! connections between the same address pair stay distinguishable.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{mpsc, Notify};

use crate::error::CohortTransportError;
use crate::frame::Frame;
use crate::transport::{Connection, Transport};
use crate::{Address, Entity};

/// Frames a single direction buffers before `send` blocks.
const QUEUE_CAPACITY: usize = 1024;

// ── Directory ─────────────────────────────────────────────────────────

struct ListenerEntry {
    entity: Entity,
    accept_tx: mpsc::UnboundedSender<Arc<LocalConn>>,
}

struct DirInner {
    listeners: HashMap<Address, ListenerEntry>,
    next_uid: u64,
}

/// Registry of in-process listeners.
///
/// Tests usually create a private directory per test so parallel tests
/// do not see each other's addresses; [`LocalDirectory::global`] exists
/// for the single-overlay case.
pub struct LocalDirectory {
    inner: Mutex<DirInner>,
}

impl LocalDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DirInner {
                listeners: HashMap::new(),
                next_uid: 0,
            }),
        })
    }

    /// The process-wide default directory.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<LocalDirectory>> = OnceLock::new();
        GLOBAL.get_or_init(LocalDirectory::new).clone()
    }

    /// Bind `entity` on its first address and start accepting.
    ///
    /// Fails with `AlreadyListening` if the address is taken and
    /// `NoAddress` if the entity carries none.
    pub fn bind(
        self: &Arc<Self>,
        entity: Entity,
    ) -> Result<LocalTransport, CohortTransportError> {
        let addr = entity
            .first_address()
            .cloned()
            .ok_or(CohortTransportError::NoAddress)?;

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().expect("directory poisoned");
            if inner.listeners.contains_key(&addr) {
                return Err(CohortTransportError::AlreadyListening { addr });
            }
            inner.listeners.insert(
                addr.clone(),
                ListenerEntry {
                    entity: entity.clone(),
                    accept_tx,
                },
            );
        }

        Ok(LocalTransport {
            dir: self.clone(),
            entity,
            addr,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            closed: AtomicBool::new(false),
        })
    }

    fn unbind(&self, addr: &Address) {
        let mut inner = self.inner.lock().expect("directory poisoned");
        inner.listeners.remove(addr);
    }

    /// Connect `local` to `remote`, handing the accept side its half.
    fn connect(
        &self,
        local: &Entity,
        remote: &Entity,
    ) -> Result<Arc<LocalConn>, CohortTransportError> {
        let mut inner = self.inner.lock().expect("directory poisoned");

        let mut addr_tried = None;
        for addr in &remote.addresses {
            let (listener, accept_tx) = match inner.listeners.get(addr) {
                Some(entry) if entry.entity == *remote => {
                    (entry.entity.clone(), entry.accept_tx.clone())
                }
                Some(_) => {
                    tracing::debug!(%addr, "address bound by a different entity");
                    addr_tried = Some(addr.clone());
                    continue;
                }
                None => {
                    addr_tried = Some(addr.clone());
                    continue;
                }
            };

            let out_uid = inner.next_uid;
            let in_uid = inner.next_uid + 1;
            inner.next_uid += 2;

            // One pipe per direction, shared by the two endpoints.
            let out_pipe = Arc::new(Pipe::new());
            let in_pipe = Arc::new(Pipe::new());

            let outgoing = Arc::new(LocalConn {
                uid: out_uid,
                peer: listener,
                rx: in_pipe.clone(),
                tx: out_pipe.clone(),
            });
            let incoming = Arc::new(LocalConn {
                uid: in_uid,
                peer: local.clone(),
                rx: out_pipe,
                tx: in_pipe,
            });

            if accept_tx.send(incoming).is_err() {
                // Listener is gone but not yet unbound.
                return Err(CohortTransportError::NotListening { addr: addr.clone() });
            }
            return Ok(outgoing);
        }

        let addr = addr_tried
            .or_else(|| remote.first_address().cloned())
            .ok_or(CohortTransportError::NoAddress)?;
        Err(CohortTransportError::NotListening { addr })
    }
}

// ── Pipe ──────────────────────────────────────────────────────────────

struct PipeState {
    queue: VecDeque<Frame>,
    /// The reading side closed; the pipe is dead in both directions.
    closed: bool,
    /// The writing side closed; drain the queue, then report Eof.
    finished: bool,
}

/// One direction of a local connection: a bounded FIFO with wakeups.
struct Pipe {
    state: Mutex<PipeState>,
    readable: Notify,
    writable: Notify,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                queue: VecDeque::new(),
                closed: false,
                finished: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    async fn push(&self, frame: Frame) -> Result<(), CohortTransportError> {
        let mut frame = Some(frame);
        loop {
            let writable = self.writable.notified();
            {
                let mut state = self.state.lock().expect("pipe poisoned");
                if state.closed || state.finished {
                    return Err(CohortTransportError::Closed);
                }
                if state.queue.len() < QUEUE_CAPACITY {
                    state.queue.push_back(frame.take().expect("frame consumed once"));
                    self.readable.notify_one();
                    return Ok(());
                }
            }
            writable.await;
        }
    }

    async fn pop(&self) -> Result<Frame, CohortTransportError> {
        loop {
            let readable = self.readable.notified();
            {
                let mut state = self.state.lock().expect("pipe poisoned");
                if state.closed {
                    return Err(CohortTransportError::Closed);
                }
                if let Some(frame) = state.queue.pop_front() {
                    self.writable.notify_one();
                    return Ok(frame);
                }
                if state.finished {
                    return Err(CohortTransportError::Eof);
                }
            }
            readable.await;
        }
    }

    /// Reader side gives up: kill the pipe and wake everyone.
    fn close(&self) {
        let mut state = self.state.lock().expect("pipe poisoned");
        state.closed = true;
        state.queue.clear();
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Writer side is done: no more frames after the queued ones.
    fn finish(&self) {
        let mut state = self.state.lock().expect("pipe poisoned");
        state.finished = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

// ── LocalConn ─────────────────────────────────────────────────────────

/// One endpoint of an in-process connection.
pub struct LocalConn {
    uid: u64,
    peer: Entity,
    /// Frames arriving from the peer.
    rx: Arc<Pipe>,
    /// Frames departing towards the peer.
    tx: Arc<Pipe>,
}

impl LocalConn {
    /// Directory-assigned endpoint identifier.
    pub fn uid(&self) -> u64 {
        self.uid
    }
}

#[async_trait::async_trait]
impl Connection for LocalConn {
    fn peer(&self) -> &Entity {
        &self.peer
    }

    async fn send(&self, frame: Frame) -> Result<(), CohortTransportError> {
        self.tx.push(frame).await
    }

    async fn recv(&self) -> Result<Frame, CohortTransportError> {
        self.rx.pop().await
    }

    async fn close(&self) {
        // Stop reading; the peer's next send fails with Closed.
        self.rx.close();
        // Let the peer drain what we already sent, then observe Eof.
        self.tx.finish();
    }
}

// ── LocalTransport ────────────────────────────────────────────────────

/// A bound in-process endpoint. Created via [`LocalDirectory::bind`].
pub struct LocalTransport {
    dir: Arc<LocalDirectory>,
    entity: Entity,
    addr: Address,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<LocalConn>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("entity", &self.entity)
            .field("addr", &self.addr)
            .finish()
    }
}

impl LocalTransport {
    /// [`Transport::open`] with the concrete connection type.
    pub async fn open_local(
        &self,
        remote: &Entity,
    ) -> Result<Arc<LocalConn>, CohortTransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CohortTransportError::Closed);
        }
        self.dir.connect(&self.entity, remote)
    }

    /// [`Transport::accept`] with the concrete connection type.
    pub async fn accept_local(&self) -> Result<Arc<LocalConn>, CohortTransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CohortTransportError::Closed);
        }
        let mut rx = self.accept_rx.lock().await;
        rx.recv().await.ok_or(CohortTransportError::Closed)
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn open(&self, remote: &Entity) -> Result<Arc<dyn Connection>, CohortTransportError> {
        let conn: Arc<dyn Connection> = self.open_local(remote).await?;
        Ok(conn)
    }

    async fn accept(&self) -> Result<Arc<dyn Connection>, CohortTransportError> {
        let conn: Arc<dyn Connection> = self.accept_local().await?;
        Ok(conn)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dir.unbind(&self.addr);
        // Wake a blocked accept() by draining the queue to rejection.
        self.accept_rx.lock().await.close();
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.dir.unbind(&self.addr);
        }
    }
}
