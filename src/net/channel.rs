//! Per-connection channel state.
//!
//! A `Channel` wraps one connected socket. Reads accumulate into a
//! partial-frame buffer until whole frames can be peeled off; writes
//! queue in order and drain as far as the socket accepts without
//! blocking. The channel is owned exclusively by the reactor thread that
//! registered it — workers never touch it directly.

use crate::pool::BufferPoolAllocator;
use crate::protocol::FRAME_HEADER_LEN;
use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use thiserror::Error;

use super::endpoint::EndPoint;

/// One complete wire unit: api id plus undecoded body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub api_id: i32,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Peer closed the connection (end of stream).
    #[error("connection closed by peer")]
    Eof,

    #[error("i/o fault: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame; the connection cannot be trusted past this point.
    #[error("protocol error: {0}")]
    Protocol(String),
}

const READ_CHUNK: usize = 4096;

pub struct Channel {
    stream: TcpStream,
    local: EndPoint,
    peer: EndPoint,
    /// Partial-read accumulation buffer; holds at most one incomplete
    /// frame plus whatever arrived behind it.
    read_buf: BytesMut,
    /// Pool-allocated response frames awaiting the socket, in order.
    write_queue: VecDeque<Box<[u8]>>,
    /// Bytes of the queue head already written.
    write_pos: usize,
}

impl Channel {
    pub fn new(stream: TcpStream, local: EndPoint, peer: EndPoint) -> Self {
        Self {
            stream,
            local,
            peer,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_queue: VecDeque::new(),
            write_pos: 0,
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn local(&self) -> EndPoint {
        self.local
    }

    pub fn peer(&self) -> EndPoint {
        self.peer
    }

    pub fn wants_write(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Drain readable bytes off the socket and peel off every complete
    /// frame. A single call may yield zero, one or many frames; a frame
    /// left incomplete stays buffered for the next readiness event.
    pub fn read_ready(&mut self, max_frame_size: usize) -> Result<Vec<Frame>, ChannelError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ChannelError::Eof),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
        self.extract_frames(max_frame_size)
    }

    fn extract_frames(&mut self, max_frame_size: usize) -> Result<Vec<Frame>, ChannelError> {
        let mut frames = Vec::new();
        while self.read_buf.len() >= FRAME_HEADER_LEN {
            let body_len = i32::from_be_bytes(self.read_buf[0..4].try_into().unwrap());
            if body_len < 0 {
                return Err(ChannelError::Protocol(format!(
                    "negative body length {body_len}"
                )));
            }
            let body_len = body_len as usize;
            if body_len > max_frame_size {
                return Err(ChannelError::Protocol(format!(
                    "body length {body_len} exceeds limit {max_frame_size}"
                )));
            }
            if self.read_buf.len() < FRAME_HEADER_LEN + body_len {
                break;
            }
            let api_id = i32::from_be_bytes(self.read_buf[4..8].try_into().unwrap());
            self.read_buf.advance(FRAME_HEADER_LEN);
            let body = self.read_buf.split_to(body_len).freeze();
            frames.push(Frame { api_id, body });
        }
        Ok(frames)
    }

    /// Append a completed response frame to the pending-write queue.
    /// This is the only write entry point for dispatched work.
    pub fn queue_write(&mut self, frame: Box<[u8]>) {
        self.write_queue.push_back(frame);
    }

    /// Flush as much of the pending queue as the socket accepts without
    /// blocking. Returns `true` once the queue is fully drained. Buffers
    /// written to completion go back to the pool.
    pub fn write_ready(&mut self, allocator: &BufferPoolAllocator) -> io::Result<bool> {
        while let Some(front) = self.write_queue.front() {
            match self.stream.write(&front[self.write_pos..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ));
                }
                Ok(n) => {
                    self.write_pos += n;
                    if self.write_pos == front.len() {
                        let done = self.write_queue.pop_front().unwrap();
                        allocator.release(done);
                        self.write_pos = 0;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Return every queued buffer to the pool. Called on close.
    pub fn release_writes(&mut self, allocator: &BufferPoolAllocator) {
        for buf in self.write_queue.drain(..) {
            allocator.release(buf);
        }
        self.write_pos = 0;
    }
}
