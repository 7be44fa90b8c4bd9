//! Frame dispatch off the reactor thread.
//!
//! The reactor never runs handler code: decoded frames are handed to a
//! dispatcher, which either processes them inline (zero workers) or on a
//! fixed pool of handler threads. A connection is pinned to one worker
//! by its id, so frames from a single connection are always processed in
//! arrival order.
//!
//! Results travel back as [`Completion`] values over an mpsc channel; a
//! [`Waker`] nudges the reactor so it drains them on its own thread. The
//! reactor stays the sole owner of every channel's write queue.

use crate::context::ServerContext;
use crate::handler::{self, ConnInfo};
use crate::net::channel::Frame;
use crate::net::endpoint::EndPoint;
use crate::protocol::messages::Request;
use crate::protocol::ApiKey;
use mio::Waker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, trace, warn};

/// Outcome of one dispatched frame, applied by the reactor. The peer
/// endpoint lets the reactor reject a completion whose slab slot was
/// reused by a newer connection in the meantime.
pub enum Completion {
    /// Queue this encoded frame on the connection's write queue.
    Respond {
        conn_id: usize,
        peer: EndPoint,
        frame: Box<[u8]>,
    },
    /// The frame was malformed or the handler failed; drop the
    /// connection.
    Close { conn_id: usize, peer: EndPoint },
}

struct Job {
    conn_id: usize,
    conn: ConnInfo,
    frame: Frame,
}

pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    completions: Sender<Completion>,
    waker: Arc<Waker>,
    workers: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<ServerContext>,
        worker_count: usize,
        completions: Sender<Completion>,
        waker: Arc<Waker>,
    ) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let (tx, rx) = mpsc::channel::<Job>();
            let ctx = Arc::clone(&ctx);
            let completions = completions.clone();
            let waker = Arc::clone(&waker);
            let handle = thread::Builder::new()
                .name(format!("handler-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let completion = process(&ctx, job.conn_id, job.conn, job.frame);
                        if completions.send(completion).is_err() {
                            break;
                        }
                        if let Err(e) = waker.wake() {
                            warn!(error = %e, "reactor wake failed");
                        }
                    }
                })
                .expect("failed to spawn handler thread");
            workers.push(tx);
            handles.push(handle);
        }

        Self {
            ctx,
            completions,
            waker,
            workers,
            handles,
        }
    }

    /// Hand one frame off for processing. With workers the frame goes to
    /// the connection's pinned worker; without, it is processed right
    /// here and the completion loops back through the same channel.
    pub fn dispatch(&self, conn_id: usize, conn: ConnInfo, frame: Frame) {
        if self.workers.is_empty() {
            let completion = process(&self.ctx, conn_id, conn, frame);
            if self.completions.send(completion).is_ok() {
                if let Err(e) = self.waker.wake() {
                    warn!(error = %e, "reactor wake failed");
                }
            }
            return;
        }

        let worker = &self.workers[conn_id % self.workers.len()];
        if worker
            .send(Job {
                conn_id,
                conn,
                frame,
            })
            .is_err()
        {
            error!(conn_id, "handler worker is gone, frame dropped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the job channels lets the workers drain and exit.
        self.workers.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Decode and handle one frame, absorbing panics so a misbehaving
/// handler can never take a worker thread or the reactor down with it.
fn process(ctx: &ServerContext, conn_id: usize, conn: ConnInfo, frame: Frame) -> Completion {
    let peer = conn.peer;
    match panic::catch_unwind(AssertUnwindSafe(|| run_handler(ctx, conn_id, conn, frame))) {
        Ok(completion) => completion,
        Err(_) => {
            error!(peer = %peer, "handler panicked");
            Completion::Close { conn_id, peer }
        }
    }
}

/// Every failure past this point costs the sender its connection; only
/// well-formed requests get a reply.
fn run_handler(ctx: &ServerContext, conn_id: usize, conn: ConnInfo, frame: Frame) -> Completion {
    let peer = conn.peer;
    let api = match ApiKey::from_id(frame.api_id) {
        Some(api) => api,
        None => {
            warn!(peer = %peer, api_id = frame.api_id, "unknown api id");
            return Completion::Close { conn_id, peer };
        }
    };

    let mut body = frame.body;
    let request = match Request::decode(api, &mut body) {
        Ok(request) => request,
        Err(e) => {
            warn!(peer = %peer, api = api.name(), error = %e, "malformed request body");
            return Completion::Close { conn_id, peer };
        }
    };
    trace!(peer = %peer, api = request.api_key().name(), "request decoded");

    match handler::handle_request(ctx, conn, request) {
        Ok(frame) => Completion::Respond {
            conn_id,
            peer,
            frame,
        },
        Err(e) => {
            error!(peer = %peer, api = api.name(), error = %e, "handler failed");
            Completion::Close { conn_id, peer }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{test_conn, test_context};
    use crate::protocol::messages::LoginRequest;
    use bytes::Bytes;
    use mio::{Poll, Token};
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    fn dispatcher(workers: usize) -> (Dispatcher, Receiver<Completion>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(test_context(dir.path().to_path_buf()));
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let (tx, rx) = mpsc::channel();
        (Dispatcher::new(ctx, workers, tx, waker), rx, dir)
    }

    fn login_frame(user: &str, password: &str) -> Frame {
        let req = LoginRequest {
            user: user.to_string(),
            password: password.to_string(),
        };
        let mut body = Vec::new();
        req.to_struct().unwrap().write_to(&mut body).unwrap();
        Frame {
            api_id: ApiKey::Login.id(),
            body: Bytes::from(body),
        }
    }

    #[test]
    fn test_inline_dispatch_produces_response() {
        let (d, rx, _dir) = dispatcher(0);
        d.dispatch(7, test_conn(50400), login_frame("user1", "0192023a7bbd"));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Completion::Respond { conn_id, frame, .. } => {
                assert_eq!(conn_id, 7);
                assert!(!frame.is_empty());
            }
            Completion::Close { .. } => panic!("expected a response"),
        }
    }

    #[test]
    fn test_worker_dispatch_produces_response() {
        let (d, rx, _dir) = dispatcher(2);
        d.dispatch(3, test_conn(50401), login_frame("user2", "pw2"));
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Completion::Respond { conn_id: 3, .. }
        ));
    }

    #[test]
    fn test_unknown_api_id_closes_connection() {
        let (d, rx, _dir) = dispatcher(0);
        let frame = Frame {
            api_id: 42,
            body: Bytes::new(),
        };
        d.dispatch(5, test_conn(50402), frame);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Completion::Close { conn_id: 5, .. }
        ));
    }

    #[test]
    fn test_truncated_body_closes_connection() {
        let (d, rx, _dir) = dispatcher(0);
        let mut frame = login_frame("user1", "0192023a7bbd");
        frame.body = frame.body.slice(..frame.body.len() - 3);
        d.dispatch(9, test_conn(50403), frame);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Completion::Close { conn_id: 9, .. }
        ));
    }
}
