//! HTTP/2 preface frame recording.
//!
//! [`Http2FrameRecorder`] wraps the established TLS stream on the `h2` path
//! and parses the client's connection preface out of the bytes flowing to
//! the HTTP/2 engine: the initial SETTINGS, the first connection-level
//! WINDOW_UPDATE, PRIORITY frames up to a cap, and the first HEADERS frame.
//! The record is published into the connection [`Metadata`] the moment the
//! first HEADERS block is complete, which is before the engine can surface
//! the first request, so request handlers always observe a finished record.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::metadata::{HeaderField, Http2FingerprintingFrames, Metadata, Priority, Setting};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;

const FRAME_HEADERS: u8 = 0x1;
const FRAME_PRIORITY: u8 = 0x2;
const FRAME_SETTINGS: u8 = 0x4;
const FRAME_WINDOW_UPDATE: u8 = 0x8;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

pub struct Http2FrameRecorder<S> {
    inner: S,
    metadata: Arc<Metadata>,

    buf: Vec<u8>,
    parsed: usize,
    preface_skipped: bool,
    done: bool,
    max_capture: usize,
    max_priorities: usize,

    settings: Vec<Setting>,
    saw_settings: bool,
    window_update_increment: u32,
    saw_window_update: bool,
    priorities: Vec<Priority>,
    header_block: Vec<u8>,
    collecting_continuation: bool,
}

impl<S> Http2FrameRecorder<S> {
    pub fn new(inner: S, metadata: Arc<Metadata>, max_capture: usize, max_priorities: usize) -> Self {
        Self {
            inner,
            metadata,
            buf: Vec::with_capacity(4096),
            parsed: 0,
            preface_skipped: false,
            done: false,
            max_capture,
            max_priorities,
            settings: Vec::new(),
            saw_settings: false,
            window_update_increment: 0,
            saw_window_update: false,
            priorities: Vec::new(),
            header_block: Vec::new(),
            collecting_continuation: false,
        }
    }

    fn observe(&mut self, data: &[u8]) {
        if self.done {
            return;
        }
        self.buf.extend_from_slice(data);
        self.process();
        if !self.done && self.buf.len() > self.max_capture {
            debug!(
                captured = self.buf.len(),
                "first headers frame not found within the capture budget, giving up"
            );
            self.give_up();
        }
    }

    fn process(&mut self) {
        if !self.preface_skipped {
            if self.buf.len() - self.parsed < PREFACE.len() {
                return;
            }
            if &self.buf[self.parsed..self.parsed + PREFACE.len()] != PREFACE {
                debug!("stream does not start with the http2 connection preface");
                self.give_up();
                return;
            }
            self.parsed += PREFACE.len();
            self.preface_skipped = true;
        }

        while !self.done {
            let available = self.buf.len() - self.parsed;
            if available < FRAME_HEADER_LEN {
                return;
            }
            let header = &self.buf[self.parsed..self.parsed + FRAME_HEADER_LEN];
            let payload_len =
                ((header[0] as usize) << 16) | ((header[1] as usize) << 8) | header[2] as usize;
            let frame_type = header[3];
            let flags = header[4];
            let stream_id =
                u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;

            if available < FRAME_HEADER_LEN + payload_len {
                if FRAME_HEADER_LEN + payload_len > self.max_capture {
                    // frame larger than we are willing to buffer
                    self.give_up();
                }
                return;
            }

            let start = self.parsed + FRAME_HEADER_LEN;
            let payload = self.buf[start..start + payload_len].to_vec();
            self.parsed += FRAME_HEADER_LEN + payload_len;

            match frame_type {
                FRAME_SETTINGS => self.on_settings(stream_id, flags, &payload),
                FRAME_WINDOW_UPDATE => self.on_window_update(stream_id, &payload),
                FRAME_PRIORITY => self.on_priority(stream_id, &payload),
                FRAME_HEADERS => self.on_headers(flags, &payload),
                FRAME_CONTINUATION => self.on_continuation(flags, &payload),
                _ => {}
            }
        }
    }

    fn on_settings(&mut self, stream_id: u32, flags: u8, payload: &[u8]) {
        if stream_id != 0 || flags & FLAG_ACK != 0 || self.saw_settings {
            return;
        }
        self.saw_settings = true;
        for chunk in payload.chunks_exact(6) {
            self.settings.push(Setting {
                id: u16::from_be_bytes([chunk[0], chunk[1]]),
                value: u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
            });
        }
    }

    fn on_window_update(&mut self, stream_id: u32, payload: &[u8]) {
        if stream_id != 0 || self.saw_window_update || payload.len() != 4 {
            return;
        }
        self.saw_window_update = true;
        self.window_update_increment =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    }

    fn on_priority(&mut self, stream_id: u32, payload: &[u8]) {
        if payload.len() != 5 {
            return;
        }
        // excess frames are dropped, never an error
        if self.priorities.len() >= self.max_priorities {
            return;
        }
        let dep = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        self.priorities.push(Priority {
            stream_id,
            exclusive: dep & 0x8000_0000 != 0,
            dependent_stream: dep & 0x7fff_ffff,
            weight: payload[4],
        });
    }

    fn on_headers(&mut self, flags: u8, payload: &[u8]) {
        let mut fragment = payload;
        if flags & FLAG_PADDED != 0 {
            if fragment.is_empty() {
                self.give_up();
                return;
            }
            let pad_len = fragment[0] as usize;
            if pad_len + 1 > fragment.len() {
                self.give_up();
                return;
            }
            fragment = &fragment[1..fragment.len() - pad_len];
        }
        if flags & FLAG_PRIORITY != 0 {
            if fragment.len() < 5 {
                self.give_up();
                return;
            }
            fragment = &fragment[5..];
        }
        self.header_block.extend_from_slice(fragment);
        if flags & FLAG_END_HEADERS != 0 {
            self.finish();
        } else {
            self.collecting_continuation = true;
        }
    }

    fn on_continuation(&mut self, flags: u8, payload: &[u8]) {
        if !self.collecting_continuation {
            return;
        }
        self.header_block.extend_from_slice(payload);
        if flags & FLAG_END_HEADERS != 0 {
            self.finish();
        }
    }

    fn finish(&mut self) {
        let headers = match hpack::Decoder::new().decode(&self.header_block) {
            Ok(fields) => fields
                .into_iter()
                .map(|(name, value)| HeaderField {
                    name: String::from_utf8_lossy(&name).into_owned(),
                    value: String::from_utf8_lossy(&value).into_owned(),
                })
                .collect(),
            Err(e) => {
                debug!("failed to decode header block: {e:?}");
                Vec::new()
            }
        };

        self.metadata.set_http2_frames(Http2FingerprintingFrames {
            settings: std::mem::take(&mut self.settings),
            window_update_increment: self.window_update_increment,
            priorities: std::mem::take(&mut self.priorities),
            headers,
        });
        self.give_up();
    }

    fn give_up(&mut self) {
        self.done = true;
        self.buf = Vec::new();
        self.header_block = Vec::new();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Http2FrameRecorder<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let after = buf.filled().len();
            if after > before {
                let data = &buf.filled()[before..after];
                self.as_mut().get_mut().observe(data);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Http2FrameRecorder<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
