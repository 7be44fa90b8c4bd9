//! Single-threaded event loop over all connections.
//!
//! One reactor thread owns the listener, every channel and every write
//! queue. Readiness events drive reads; decoded frames go out through
//! the dispatcher; completed responses come back over the completion
//! channel and a waker, and only the reactor ever touches a socket.

use crate::context::ServerContext;
use crate::handler::ConnInfo;
use crate::net::channel::{Channel, ChannelError};
use crate::net::dispatcher::{Completion, Dispatcher};
use crate::net::endpoint::EndPoint;
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LISTENER: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

const EVENTS_CAPACITY: usize = 1024;
const LISTEN_BACKLOG: i32 = 1024;

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    channels: Slab<Channel>,
    ctx: Arc<ServerContext>,
    dispatcher: Dispatcher,
    completions: Receiver<Completion>,
}

impl Reactor {
    /// Bind the listening socket and wire up the dispatcher. Binding to
    /// port 0 picks an ephemeral port, visible through `local_addr`.
    pub fn bind(ctx: Arc<ServerContext>, listen: &str, workers: usize) -> io::Result<Self> {
        let addr: SocketAddr = listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let (tx, completions) = mpsc::channel();
        let dispatcher = Dispatcher::new(Arc::clone(&ctx), workers, tx, waker);

        Ok(Self {
            poll,
            listener,
            local_addr,
            channels: Slab::new(),
            ctx,
            dispatcher,
            completions,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "reactor running");
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER_TOKEN => {}
                    Token(conn_id) => self.channel_event(conn_id, event),
                }
            }
            // Drained once per wake-up; the waker coalesces, so every
            // pending completion is picked up here.
            self.drain_completions();
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let entry = self.channels.vacant_entry();
                    let conn_id = entry.key();
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(conn_id), Interest::READABLE)
                    {
                        warn!(peer = %peer, error = %e, "failed to register connection");
                        continue;
                    }
                    debug!(peer = %peer, conn_id, "connection accepted");
                    entry.insert(Channel::new(
                        stream,
                        EndPoint::from(self.local_addr),
                        EndPoint::from(peer),
                    ));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn channel_event(&mut self, conn_id: usize, event: &Event) {
        if event.is_readable() {
            let channel = match self.channels.get_mut(conn_id) {
                Some(channel) => channel,
                None => return,
            };
            let conn = ConnInfo {
                local: channel.local(),
                peer: channel.peer(),
            };
            match channel.read_ready(self.ctx.max_frame_size) {
                Ok(frames) => {
                    for frame in frames {
                        self.dispatcher.dispatch(conn_id, conn, frame);
                    }
                }
                Err(ChannelError::Eof) => {
                    debug!(peer = %conn.peer, "peer closed connection");
                    self.close(conn_id);
                    return;
                }
                Err(e) => {
                    warn!(peer = %conn.peer, error = %e, "read failed");
                    self.close(conn_id);
                    return;
                }
            }
        }

        if event.is_writable() {
            let write = match self.channels.get_mut(conn_id) {
                Some(channel) => channel.write_ready(&self.ctx.allocator),
                None => return,
            };
            match write {
                // Queue drained; stop watching for writability.
                Ok(true) => self.rearm(conn_id, Interest::READABLE),
                Ok(false) => {}
                Err(e) => {
                    warn!(conn_id, error = %e, "write failed");
                    self.close(conn_id);
                }
            }
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            match completion {
                Completion::Respond {
                    conn_id,
                    peer,
                    frame,
                } => {
                    match self.channels.get_mut(conn_id) {
                        Some(channel) if channel.peer() == peer => channel.queue_write(frame),
                        // Connection died while the handler ran, or the
                        // slot was reused by a newer one.
                        _ => {
                            self.ctx.allocator.release(frame);
                            continue;
                        }
                    }
                    self.rearm(conn_id, Interest::READABLE | Interest::WRITABLE);
                }
                Completion::Close { conn_id, peer } => {
                    if self.channels.get(conn_id).is_some_and(|c| c.peer() == peer) {
                        self.close(conn_id);
                    }
                }
            }
        }
    }

    fn rearm(&mut self, conn_id: usize, interest: Interest) {
        let channel = match self.channels.get_mut(conn_id) {
            Some(channel) => channel,
            None => return,
        };
        if let Err(e) = self
            .poll
            .registry()
            .reregister(channel.stream_mut(), Token(conn_id), interest)
        {
            warn!(conn_id, error = %e, "reregister failed");
            self.close(conn_id);
        }
    }

    /// Tear down one connection: deregister, return queued buffers to
    /// the pool and drop its session.
    fn close(&mut self, conn_id: usize) {
        if !self.channels.contains(conn_id) {
            return;
        }
        let mut channel = self.channels.remove(conn_id);
        let _ = self.poll.registry().deregister(channel.stream_mut());
        channel.release_writes(&self.ctx.allocator);
        self.ctx.sessions.remove_session(channel.peer());
        debug!(
            peer = %channel.peer(),
            conn_id,
            open_sessions = self.ctx.sessions.len(),
            "connection closed"
        );
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::test_context;
    use crate::protocol::messages::{
        HeartBeatRequest, HeartBeatResponse, LoginRequest, LoginResponse, MessageRequest,
        MessageResponse,
    };
    use crate::protocol::schema::Struct;
    use crate::protocol::{encode_frame, ApiKey};
    use bytes::Bytes;
    use chrono::Local;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    fn start_server(storage: &Path, workers: usize) -> (SocketAddr, Arc<ServerContext>) {
        let ctx = Arc::new(test_context(storage.to_path_buf()));
        let mut reactor = Reactor::bind(Arc::clone(&ctx), "127.0.0.1:0", workers).unwrap();
        let addr = reactor.local_addr();
        thread::spawn(move || {
            let _ = reactor.run();
        });
        (addr, ctx)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn send(stream: &mut TcpStream, api: ApiKey, payload: &Struct) {
        let mut buf = Vec::new();
        encode_frame(api, payload, &mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    }

    fn receive(stream: &mut TcpStream) -> (i32, Bytes) {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).unwrap();
        let body_len = i32::from_be_bytes(header[0..4].try_into().unwrap()) as usize;
        let api_id = i32::from_be_bytes(header[4..8].try_into().unwrap());
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).unwrap();
        (api_id, Bytes::from(body))
    }

    fn login(stream: &mut TcpStream, user: &str, password: &str) -> LoginResponse {
        let req = LoginRequest {
            user: user.to_string(),
            password: password.to_string(),
        };
        send(stream, ApiKey::Login, &req.to_struct().unwrap());
        let (api_id, mut body) = receive(stream);
        assert_eq!(api_id, ApiKey::Login.id());
        LoginResponse::from_struct(ApiKey::Login.response_schema().read(&mut body).unwrap())
            .unwrap()
    }

    #[test]
    fn test_login_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, ctx) = start_server(dir.path(), 0);

        let mut stream = connect(addr);
        let resp = login(&mut stream, "user1", "0192023a7bbd");
        assert_eq!(resp.status_code, 0);
        assert_eq!(resp.descriptor, "login success");
        assert_eq!(ctx.sessions.len(), 1);
    }

    #[test]
    fn test_bad_login_keeps_connection_usable() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, ctx) = start_server(dir.path(), 0);

        let mut stream = connect(addr);
        let resp = login(&mut stream, "user1", "wrong");
        assert_eq!(resp.status_code, 1);
        assert!(ctx.sessions.is_empty());

        // Same connection, second attempt.
        let resp = login(&mut stream, "user1", "0192023a7bbd");
        assert_eq!(resp.status_code, 0);
    }

    #[test]
    fn test_message_persisted_through_server() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, _ctx) = start_server(dir.path(), 0);

        let mut stream = connect(addr);
        assert_eq!(login(&mut stream, "user1", "0192023a7bbd").status_code, 0);

        let req = MessageRequest {
            key: Bytes::from_static(
                br#"{"topic":"topic01","message_process_policy":"message_queue"}"#,
            ),
            value: Bytes::from_static(b"hello over tcp"),
            ts: 1_700_000_000_000,
        };
        send(&mut stream, ApiKey::Message, &req.to_struct().unwrap());
        let (api_id, mut body) = receive(&mut stream);
        assert_eq!(api_id, ApiKey::Message.id());
        let resp =
            MessageResponse::from_struct(ApiKey::Message.response_schema().read(&mut body).unwrap())
                .unwrap();
        assert_eq!(resp.status_code, 2);

        // The sink flushes every record in the test context; wait for
        // the writer thread to catch up.
        let file = dir
            .path()
            .join(Local::now().format("%Y-%m-%d").to_string())
            .join(format!("topic01_{}.dat", Local::now().format("%Y%m%d")));
        for _ in 0..200 {
            if file.exists() {
                let data = std::fs::read(&file).unwrap();
                if data.len() >= 8 + 14 {
                    assert_eq!(&data[8..], b"hello over tcp");
                    return;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("message never reached the sink");
    }

    #[test]
    fn test_heartbeat_round_trip_with_workers() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, _ctx) = start_server(dir.path(), 2);

        let mut stream = connect(addr);
        assert_eq!(login(&mut stream, "user2", "pw2").status_code, 0);

        let req = HeartBeatRequest {
            message: "ping".to_string(),
            ts: crate::net::session::now_millis(),
        };
        send(&mut stream, ApiKey::HeartBeat, &req.to_struct().unwrap());
        let (api_id, mut body) = receive(&mut stream);
        assert_eq!(api_id, ApiKey::HeartBeat.id());
        let resp = HeartBeatResponse::from_struct(
            ApiKey::HeartBeat.response_schema().read(&mut body).unwrap(),
        )
        .unwrap();
        assert!(resp.message.starts_with("heartbeat normal"), "{}", resp.message);
    }

    #[test]
    fn test_malformed_frame_closes_only_that_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, ctx) = start_server(dir.path(), 0);

        let mut victim = connect(addr);
        assert_eq!(login(&mut victim, "user1", "0192023a7bbd").status_code, 0);
        let mut bystander = connect(addr);
        assert_eq!(login(&mut bystander, "user2", "pw2").status_code, 0);
        assert_eq!(ctx.sessions.len(), 2);

        // Negative body length is a protocol error.
        let mut garbage = Vec::new();
        garbage.extend_from_slice(&(-1i32).to_be_bytes());
        garbage.extend_from_slice(&0i32.to_be_bytes());
        victim.write_all(&garbage).unwrap();

        // The server drops the victim: reads drain to EOF.
        let mut sink = [0u8; 64];
        loop {
            match victim.read(&mut sink) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => panic!("expected clean close, got {e}"),
            }
        }
        // Its session goes with it.
        for _ in 0..200 {
            if ctx.sessions.len() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ctx.sessions.len(), 1);

        // The bystander is unaffected.
        let req = HeartBeatRequest {
            message: "still here".to_string(),
            ts: crate::net::session::now_millis(),
        };
        send(&mut bystander, ApiKey::HeartBeat, &req.to_struct().unwrap());
        let (api_id, _body) = receive(&mut bystander);
        assert_eq!(api_id, ApiKey::HeartBeat.id());
    }

    #[test]
    fn test_pipelined_requests_answered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, _ctx) = start_server(dir.path(), 1);

        let mut stream = connect(addr);
        assert_eq!(login(&mut stream, "user1", "0192023a7bbd").status_code, 0);

        // Two heartbeats in one write; replies must come back in order.
        let mut batch = Vec::new();
        for ts_off in [100, 200] {
            let req = HeartBeatRequest {
                message: format!("hb-{ts_off}"),
                ts: crate::net::session::now_millis() - ts_off,
            };
            encode_frame(
                ApiKey::HeartBeat,
                &req.to_struct().unwrap(),
                &mut batch,
            )
            .unwrap();
        }
        stream.write_all(&batch).unwrap();

        for _ in 0..2 {
            let (api_id, _body) = receive(&mut stream);
            assert_eq!(api_id, ApiKey::HeartBeat.id());
        }
    }
}
