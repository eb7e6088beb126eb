//! In-memory transport for tests
//!
//! [`TestShare`] models a remote share as a path map behind the
//! [`Transport`] traits, with knobs for scripting faults: fail the next
//! N connects, fail the next N channel operations with a chosen status,
//! delay operations to widen race windows, or kill every live link at
//! once. Channel-fault statuses kill the faulted channel; by default they
//! also kill its session link, mirroring a transport whose session dies
//! under a broken channel, while the channel-only variant leaves the
//! session up with the channel dead beneath it.
//!
//! Fault injection and the op delay apply to channel method calls
//! (`stat`, `read_dir`, `open_read`, ...). Reader and writer handles only
//! check link liveness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ferry_core::path;
use ferry_core::{
    Credentials, EntryType, FileAttributes, RemoteEntry, ShareKey, StatusCode, TransportError,
};

use crate::transport::{Channel, RemoteReader, RemoteWriter, Session, Transport};

#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

struct FaultPlan {
    skip: u64,
    remaining: u64,
    code: StatusCode,
    kill_link: bool,
}

struct SessionLink {
    alive: AtomicBool,
}

#[derive(Default)]
struct Counters {
    sessions_created: AtomicU64,
    channels_opened: AtomicU64,
    open_channels: AtomicUsize,
    max_open_channels: AtomicUsize,
    current_ops: AtomicUsize,
    max_concurrent_ops: AtomicUsize,
}

struct TestShareState {
    fs: Mutex<HashMap<String, Node>>,
    links: Mutex<Vec<Arc<SessionLink>>>,
    password: Mutex<Option<String>>,
    counters: Counters,
    op_delay: Mutex<Option<Duration>>,
    connect_delay: Mutex<Option<Duration>>,
    connect_faults: AtomicU64,
    fault_plan: Mutex<Option<FaultPlan>>,
    mkdir_races: AtomicU64,
}

/// In-memory share reachable through the [`Transport`] traits.
#[derive(Clone)]
pub(crate) struct TestShare {
    state: Arc<TestShareState>,
}

impl TestShare {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(TestShareState {
                fs: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
                password: Mutex::new(None),
                counters: Counters::default(),
                op_delay: Mutex::new(None),
                connect_delay: Mutex::new(None),
                connect_faults: AtomicU64::new(0),
                fault_plan: Mutex::new(None),
                mkdir_races: AtomicU64::new(0),
            }),
        }
    }

    /// Only this password authenticates. By default any credentials do.
    pub(crate) fn with_password(self, password: impl Into<String>) -> Self {
        *self.state.password.lock() = Some(password.into());
        self
    }

    pub(crate) fn add_file(&self, path: &str, data: &[u8]) {
        let mut fs = self.state.fs.lock();
        if let Some(parent) = path::parent(path) {
            if parent != "/" {
                for dir in path::ancestors(parent) {
                    fs.entry(dir).or_insert(Node::Dir);
                }
            }
        }
        fs.insert(path.to_string(), Node::File(data.to_vec()));
    }

    pub(crate) fn add_dir(&self, path: &str) {
        let mut fs = self.state.fs.lock();
        for dir in path::ancestors(path) {
            fs.entry(dir).or_insert(Node::Dir);
        }
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.fs.lock().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub(crate) fn has_dir(&self, path: &str) -> bool {
        matches!(self.state.fs.lock().get(path), Some(Node::Dir))
    }

    pub(crate) fn has_entry(&self, path: &str) -> bool {
        self.state.fs.lock().contains_key(path)
    }

    pub(crate) fn set_op_delay(&self, delay: Duration) {
        *self.state.op_delay.lock() = Some(delay);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    /// Fail the next `n` connect attempts.
    pub(crate) fn fail_next_connects(&self, n: u64) {
        self.state.connect_faults.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` channel operations with `code`.
    pub(crate) fn fail_next_ops(&self, n: u64, code: StatusCode) {
        *self.state.fault_plan.lock() = Some(FaultPlan {
            skip: 0,
            remaining: n,
            code,
            kill_link: true,
        });
    }

    /// Fail the next `n` channel operations with `code`, killing only the
    /// faulted channel. Its session link stays up.
    pub(crate) fn fail_next_ops_channel_only(&self, n: u64, code: StatusCode) {
        *self.state.fault_plan.lock() = Some(FaultPlan {
            skip: 0,
            remaining: n,
            code,
            kill_link: false,
        });
    }

    /// Fail only the `n`th channel operation from now (1-based).
    pub(crate) fn fail_nth_op(&self, n: u64, code: StatusCode) {
        *self.state.fault_plan.lock() = Some(FaultPlan {
            skip: n.saturating_sub(1),
            remaining: 1,
            code,
            kill_link: true,
        });
    }

    /// Make the next `n` mkdir calls lose a creation race: the directory
    /// appears, but the call reports it already exists.
    pub(crate) fn race_next_mkdirs(&self, n: u64) {
        self.state.mkdir_races.store(n, Ordering::SeqCst);
    }

    /// Kill every live session link, and with them their channels.
    pub(crate) fn drop_links(&self) {
        for link in self.state.links.lock().iter() {
            link.alive.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn sessions_created(&self) -> u64 {
        self.state.counters.sessions_created.load(Ordering::SeqCst)
    }

    pub(crate) fn live_sessions(&self) -> usize {
        self.state
            .links
            .lock()
            .iter()
            .filter(|l| l.alive.load(Ordering::SeqCst))
            .count()
    }

    pub(crate) fn channels_opened(&self) -> u64 {
        self.state.counters.channels_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn open_channels(&self) -> usize {
        self.state.counters.open_channels.load(Ordering::SeqCst)
    }

    pub(crate) fn max_open_channels(&self) -> usize {
        self.state.counters.max_open_channels.load(Ordering::SeqCst)
    }

    /// Highest number of channel operations observed in flight at once.
    pub(crate) fn max_concurrent_ops(&self) -> usize {
        self.state.counters.max_concurrent_ops.load(Ordering::SeqCst)
    }
}

impl TestShareState {
    fn take_connect_fault(&self) -> bool {
        self.connect_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_mkdir_race(&self) -> bool {
        self.mkdir_races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_fault(&self) -> Option<(StatusCode, bool)> {
        let mut plan = self.fault_plan.lock();
        let slot = plan.as_mut()?;
        if slot.skip > 0 {
            slot.skip -= 1;
            return None;
        }
        let fault = (slot.code, slot.kill_link);
        slot.remaining -= 1;
        if slot.remaining == 0 {
            *plan = None;
        }
        Some(fault)
    }

    fn enter_op(self: &Arc<Self>) -> OpTicket {
        let current = self.counters.current_ops.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_concurrent_ops
            .fetch_max(current, Ordering::SeqCst);
        OpTicket {
            state: self.clone(),
        }
    }
}

struct OpTicket {
    state: Arc<TestShareState>,
}

impl Drop for OpTicket {
    fn drop(&mut self) {
        self.state.counters.current_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for TestShare {
    async fn connect(
        &self,
        _key: &ShareKey,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.take_connect_fault() {
            return Err(TransportError::Connect("injected connect failure".into()));
        }
        let expected = self.state.password.lock().clone();
        if let Some(expected) = expected {
            match credentials {
                Credentials::Password(p) if *p == expected => {}
                _ => return Err(TransportError::Auth("credentials rejected".into())),
            }
        }

        let link = Arc::new(SessionLink {
            alive: AtomicBool::new(true),
        });
        self.state.links.lock().push(link.clone());
        self.state
            .counters
            .sessions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestSession {
            share: self.clone(),
            link,
        }))
    }
}

struct TestSession {
    share: TestShare,
    link: Arc<SessionLink>,
}

#[async_trait]
impl Session for TestSession {
    fn is_alive(&self) -> bool {
        self.link.alive.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Box<dyn Channel>, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let counters = &self.share.state.counters;
        counters.channels_opened.fetch_add(1, Ordering::SeqCst);
        let open = counters.open_channels.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_open_channels.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(TestChannel {
            share: self.share.clone(),
            link: self.link.clone(),
            alive: Arc::new(AtomicBool::new(true)),
            counted: true,
        }))
    }

    async fn disconnect(&self) {
        self.link.alive.store(false, Ordering::SeqCst);
    }
}

struct TestChannel {
    share: TestShare,
    link: Arc<SessionLink>,
    alive: Arc<AtomicBool>,
    /// Still counted in `open_channels`; flips on close.
    counted: bool,
}

impl TestChannel {
    fn link_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.link.alive.load(Ordering::SeqCst)
    }

    /// Entry gate for every channel operation: concurrency accounting,
    /// scripted delay, liveness, then scripted faults.
    async fn begin_op(&self) -> Result<OpTicket, TransportError> {
        let ticket = self.share.state.enter_op();
        let delay = *self.share.state.op_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.link_alive() {
            return Err(TransportError::Closed);
        }
        if let Some((code, kill_link)) = self.share.state.take_fault() {
            if code.is_channel_fault() {
                self.alive.store(false, Ordering::SeqCst);
                if kill_link {
                    self.link.alive.store(false, Ordering::SeqCst);
                }
            }
            return Err(TransportError::status(code, "injected fault"));
        }
        Ok(ticket)
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn is_alive(&self) -> bool {
        self.link_alive()
    }

    async fn read_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let _ticket = self.begin_op().await?;
        let fs = self.share.state.fs.lock();
        match fs.get(dir) {
            Some(Node::Dir) => {}
            None if dir == "/" => {}
            Some(Node::File(_)) => {
                return Err(TransportError::status(StatusCode::Failure, "not a directory"))
            }
            None => return Err(TransportError::status(StatusCode::NoSuchFile, dir)),
        }

        let mut entries = vec![
            RemoteEntry::new(".", EntryType::Directory, 0),
            RemoteEntry::new("..", EntryType::Directory, 0),
        ];
        for (key, node) in fs.iter() {
            if path::parent(key) != Some(dir) {
                continue;
            }
            let Some(name) = path::file_name(key) else {
                continue;
            };
            entries.push(match node {
                Node::File(data) => RemoteEntry::new(name, EntryType::File, data.len() as u64),
                Node::Dir => RemoteEntry::new(name, EntryType::Directory, 0),
            });
        }
        Ok(entries)
    }

    async fn stat(&mut self, p: &str) -> Result<FileAttributes, TransportError> {
        let _ticket = self.begin_op().await?;
        let fs = self.share.state.fs.lock();
        match fs.get(p) {
            Some(Node::File(data)) => Ok(FileAttributes::file(data.len() as u64)),
            Some(Node::Dir) => Ok(FileAttributes::directory()),
            None if p == "/" => Ok(FileAttributes::directory()),
            None => Err(TransportError::status(StatusCode::NoSuchFile, p)),
        }
    }

    async fn mkdir(&mut self, p: &str) -> Result<(), TransportError> {
        let _ticket = self.begin_op().await?;
        if self.share.state.take_mkdir_race() {
            self.share
                .state
                .fs
                .lock()
                .entry(p.to_string())
                .or_insert(Node::Dir);
            return Err(TransportError::status(
                StatusCode::AlreadyExists,
                "created by another actor",
            ));
        }
        let mut fs = self.share.state.fs.lock();
        if fs.contains_key(p) {
            return Err(TransportError::status(StatusCode::AlreadyExists, p));
        }
        if let Some(parent) = path::parent(p) {
            if parent != "/" && !matches!(fs.get(parent), Some(Node::Dir)) {
                return Err(TransportError::status(StatusCode::NoSuchFile, parent));
            }
        }
        fs.insert(p.to_string(), Node::Dir);
        Ok(())
    }

    async fn remove_file(&mut self, p: &str) -> Result<(), TransportError> {
        let _ticket = self.begin_op().await?;
        let mut fs = self.share.state.fs.lock();
        match fs.get(p) {
            Some(Node::File(_)) => {
                fs.remove(p);
                Ok(())
            }
            Some(Node::Dir) => Err(TransportError::status(StatusCode::Failure, "is a directory")),
            None => Err(TransportError::status(StatusCode::NoSuchFile, p)),
        }
    }

    async fn remove_dir(&mut self, p: &str) -> Result<(), TransportError> {
        let _ticket = self.begin_op().await?;
        let mut fs = self.share.state.fs.lock();
        match fs.get(p) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(TransportError::status(StatusCode::Failure, "not a directory"))
            }
            None => return Err(TransportError::status(StatusCode::NoSuchFile, p)),
        }
        if fs.keys().any(|key| path::parent(key) == Some(p)) {
            return Err(TransportError::status(
                StatusCode::Failure,
                "directory not empty",
            ));
        }
        fs.remove(p);
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        let _ticket = self.begin_op().await?;
        let mut fs = self.share.state.fs.lock();
        if !fs.contains_key(from) {
            return Err(TransportError::status(StatusCode::NoSuchFile, from));
        }
        if fs.contains_key(to) {
            return Err(TransportError::status(
                StatusCode::Failure,
                "destination exists",
            ));
        }
        if let Some(parent) = path::parent(to) {
            if parent != "/" && !matches!(fs.get(parent), Some(Node::Dir)) {
                return Err(TransportError::status(StatusCode::NoSuchFile, parent));
            }
        }

        let prefix = format!("{from}/");
        let moved: Vec<(String, String)> = fs
            .keys()
            .filter(|key| *key == from || key.starts_with(&prefix))
            .map(|key| (key.clone(), format!("{to}{}", &key[from.len()..])))
            .collect();
        for (old, new) in moved {
            if let Some(node) = fs.remove(&old) {
                fs.insert(new, node);
            }
        }
        Ok(())
    }

    async fn open_read(
        &mut self,
        p: &str,
        offset: u64,
    ) -> Result<Box<dyn RemoteReader>, TransportError> {
        let _ticket = self.begin_op().await?;
        let fs = self.share.state.fs.lock();
        match fs.get(p) {
            Some(Node::File(data)) => {
                let pos = (offset as usize).min(data.len());
                Ok(Box::new(TestReader {
                    data: data.clone(),
                    pos,
                    link: self.link.clone(),
                    channel_alive: self.alive.clone(),
                }))
            }
            Some(Node::Dir) => Err(TransportError::status(StatusCode::Failure, "is a directory")),
            None => Err(TransportError::status(StatusCode::NoSuchFile, p)),
        }
    }

    async fn open_write(&mut self, p: &str) -> Result<Box<dyn RemoteWriter>, TransportError> {
        let _ticket = self.begin_op().await?;
        {
            let fs = self.share.state.fs.lock();
            if matches!(fs.get(p), Some(Node::Dir)) {
                return Err(TransportError::status(StatusCode::Failure, "is a directory"));
            }
            if let Some(parent) = path::parent(p) {
                if parent != "/" && !matches!(fs.get(parent), Some(Node::Dir)) {
                    return Err(TransportError::status(StatusCode::NoSuchFile, parent));
                }
            }
        }
        Ok(Box::new(TestWriter {
            share: self.share.clone(),
            path: p.to_string(),
            buf: Some(Vec::new()),
            link: self.link.clone(),
            channel_alive: self.alive.clone(),
        }))
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if self.counted {
            self.counted = false;
            self.share
                .state
                .counters
                .open_channels
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct TestReader {
    data: Vec<u8>,
    pos: usize,
    link: Arc<SessionLink>,
    channel_alive: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteReader for TestReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.channel_alive.load(Ordering::SeqCst) || !self.link.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct TestWriter {
    share: TestShare,
    path: String,
    buf: Option<Vec<u8>>,
    link: Arc<SessionLink>,
    channel_alive: Arc<AtomicBool>,
}

#[async_trait]
impl RemoteWriter for TestWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.channel_alive.load(Ordering::SeqCst) || !self.link.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let Some(buf) = self.buf.as_mut() else {
            return Err(TransportError::Closed);
        };
        buf.extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(buf) = self.buf.take() else {
            return Ok(());
        };
        if !self.channel_alive.load(Ordering::SeqCst) || !self.link.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.share
            .state
            .fs
            .lock()
            .insert(self.path.clone(), Node::File(buf));
        Ok(())
    }
}
