//! Scatter/gather over TCP.
//!
//! Every [`ClusterNode`] hosts one shard. The coordinator's [`Cluster`] connects
//! to the nodes it wants as members; a member's index in the cluster is the index
//! of the shard it runs.
//!
//! Frames are JSON documents, one per line:
//!
//! ```text
//! coordinator                  node
//!     Join { member }    --->
//!                        <---  Welcome { member }
//!     Request(..)        --->
//!                        <---  Reply(..)
//!     Leave              --->
//! ```

use std::{
    io::{BufRead, BufReader, BufWriter, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{
    message::{ShardReply, ShardRequest},
    shard::Shard,
    Transport,
};
use crate::{
    error::{Error, Result},
    strategy::StrategyKind,
};

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Join { member: u64 },
    Welcome { member: u64 },
    Request(ShardRequest),
    Reply(ShardReply),
    Leave,
}

impl Frame {
    fn name(&self) -> &'static str {
        match self {
            Frame::Join { .. } => "join",
            Frame::Welcome { .. } => "welcome",
            Frame::Request(_) => "request",
            Frame::Reply(_) => "reply",
            Frame::Leave => "leave",
        }
    }
}

fn write_frame(writer: &mut impl Write, frame: &Frame) -> Result<()> {
    serde_json::to_writer(&mut *writer, frame)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// `None` once the peer closed the connection.
fn read_frame(reader: &mut impl BufRead) -> Result<Option<Frame>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&line)?))
}

/// A process-local TCP server hosting one shard.
#[derive(Debug)]
pub struct ClusterNode {
    listener: TcpListener,
}

impl ClusterNode {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve coordinators on a background thread until the handle is dropped.
    pub fn spawn(self) -> Result<NodeHandle> {
        let addr = self.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            thread::spawn(move || self.accept_loop(&stop))
        };
        info!("cluster node listening on {addr}");

        Ok(NodeHandle {
            addr,
            stop,
            thread: Some(thread),
        })
    }

    /// Serve coordinators on this thread, forever.
    pub fn serve(self) {
        self.accept_loop(&AtomicBool::new(false));
    }

    fn accept_loop(&self, stop: &AtomicBool) {
        for stream in self.listener.incoming() {
            if stop.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    thread::spawn(move || {
                        if let Err(e) = serve_connection(stream) {
                            warn!("cluster connection failed: {e}");
                        }
                    });
                }
                Err(e) => warn!("failed to accept a coordinator: {e}"),
            }
        }
    }
}

fn serve_connection(stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let member = match read_frame(&mut reader)? {
        Some(Frame::Join { member }) => member,
        Some(frame) => {
            return Err(Error::Protocol(format!(
                "expected a join frame, got {}",
                frame.name()
            )))
        }
        None => return Ok(()),
    };
    write_frame(&mut writer, &Frame::Welcome { member })?;
    info!("{peer} joined as member {member}");

    let shard = Shard;
    while let Some(frame) = read_frame(&mut reader)? {
        match frame {
            Frame::Request(request) => {
                write_frame(&mut writer, &Frame::Reply(shard.handle(request)))?;
            }
            Frame::Leave => {
                info!("member {member} left");
                return Ok(());
            }
            frame => {
                return Err(Error::Protocol(format!(
                    "unexpected {} frame from {peer}",
                    frame.name()
                )))
            }
        }
    }
    debug!("member {member} disconnected");
    Ok(())
}

/// Keeps a spawned [`ClusterNode`] running.
#[derive(Debug)]
pub struct NodeHandle {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NodeHandle {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

enum Event {
    Reply(ShardReply),
    Lost(u64),
}

#[derive(Debug)]
struct Member {
    id: u64,
    addr: SocketAddr,
    writer: BufWriter<TcpStream>,
    reader: Option<JoinHandle<()>>,
}

/// Coordinator side of the cluster: the current members and their replies.
///
/// A member whose connection fails is removed and reported once as
/// [`Error::ShardDisconnected`]; later ticks run on the remaining members.
pub struct Cluster {
    members: Vec<Member>,
    next_id: u64,
    events_tx: Sender<Event>,
    events: Receiver<Event>,
    /// Nodes spawned by [`Cluster::local`].
    nodes: Vec<NodeHandle>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("members", &self.members())
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// A cluster without members.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events) = mpsc::channel();
        Self {
            members: Vec::new(),
            next_id: 0,
            events_tx,
            events,
            nodes: Vec::new(),
        }
    }

    /// Spawn `num_nodes` nodes on the loopback interface and join all of them.
    pub fn local(num_nodes: usize) -> Result<Self> {
        let mut cluster = Self::new();
        for _ in 0..num_nodes.max(1) {
            let node = ClusterNode::bind("127.0.0.1:0")?.spawn()?;
            cluster.join(node.addr())?;
            cluster.nodes.push(node);
        }
        Ok(cluster)
    }

    /// Connect to the node at `addr` and add it as the last shard.
    ///
    /// Returns the shard index of the new member.
    pub fn join(&mut self, addr: impl ToSocketAddrs) -> Result<usize> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        let id = self.next_id;
        write_frame(&mut writer, &Frame::Join { member: id })?;
        match read_frame(&mut reader)? {
            Some(Frame::Welcome { member }) if member == id => {}
            Some(frame) => {
                return Err(Error::Protocol(format!(
                    "{addr} answered the join with a {} frame",
                    frame.name()
                )))
            }
            None => return Err(Error::Protocol(format!("{addr} closed during the join"))),
        }
        self.next_id += 1;

        let events = self.events_tx.clone();
        let reader = thread::spawn(move || forward_replies(id, reader, &events));

        self.members.push(Member {
            id,
            addr,
            writer,
            reader: Some(reader),
        });
        info!("{addr} joined the cluster as shard {}", self.members.len() - 1);
        Ok(self.members.len() - 1)
    }

    /// Remove the member running `shard`. Later members move down by one index.
    pub fn leave(&mut self, shard: usize) -> Result<()> {
        if shard >= self.members.len() {
            return Err(Error::ShardDisconnected(shard));
        }
        let member = self.members.remove(shard);
        info!("{} left the cluster", member.addr);
        member.close()
    }

    /// Addresses of the members, in shard order.
    #[must_use]
    pub fn members(&self) -> Vec<SocketAddr> {
        self.members.iter().map(|m| m.addr).collect()
    }
}

impl Member {
    fn close(mut self) -> Result<()> {
        let sent = write_frame(&mut self.writer, &Frame::Leave);
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        sent
    }
}

fn forward_replies(id: u64, mut reader: BufReader<TcpStream>, events: &Sender<Event>) {
    loop {
        let event = match read_frame(&mut reader) {
            Ok(Some(Frame::Reply(reply))) => Event::Reply(reply),
            Ok(Some(frame)) => {
                warn!("member {id} sent an unexpected {} frame", frame.name());
                Event::Lost(id)
            }
            Ok(None) => Event::Lost(id),
            Err(e) => {
                debug!("member {id}: {e}");
                Event::Lost(id)
            }
        };
        let lost = matches!(event, Event::Lost(_));
        if events.send(event).is_err() || lost {
            return;
        }
    }
}

impl Transport for Cluster {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Distributed
    }

    fn shards(&self) -> usize {
        self.members.len()
    }

    fn send(&mut self, shard: usize, request: ShardRequest) -> Result<()> {
        let member = self
            .members
            .get_mut(shard)
            .ok_or(Error::ShardDisconnected(shard))?;
        if let Err(e) = write_frame(&mut member.writer, &Frame::Request(request)) {
            warn!("sending to {} failed: {e}", member.addr);
            let _ = self.members.remove(shard).close();
            return Err(Error::ShardDisconnected(shard));
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<ShardReply> {
        loop {
            if self.members.is_empty() {
                return Err(Error::EmptyCluster);
            }
            // the cluster keeps a sender, the channel never closes
            let Ok(event) = self.events.recv() else {
                return Err(Error::EmptyCluster);
            };
            match event {
                Event::Reply(reply) => return Ok(reply),
                Event::Lost(id) => {
                    // members that left on purpose are gone already
                    if let Some(shard) = self.members.iter().position(|m| m.id == id) {
                        let member = self.members.remove(shard);
                        warn!("lost {}, {} members remain", member.addr, self.members.len());
                        let _ = member.close();
                        return Err(Error::ShardDisconnected(shard));
                    }
                }
            }
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for member in self.members.drain(..) {
            let _ = member.close();
        }
    }
}
