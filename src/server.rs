use net2::TcpBuilder;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

use crate::codec::{self, Ack, Expect, Message, Phase, Rejection};
use crate::error::{DecodeError, FrameError, HandshakeError};
use crate::params::SessionParameters;
use crate::sequencer::{Outcome, Sequencer};

/// Maximum queued connections.
pub const LISTEN_BACKLOG: i32 = 10;

pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let builder = match addr {
            SocketAddr::V4(_) => TcpBuilder::new_v4()?,
            SocketAddr::V6(_) => TcpBuilder::new_v6()?,
        };
        builder.reuse_address(true)?;
        builder.bind(addr)?;
        let listener = builder.listen(LISTEN_BACKLOG)?;
        Ok(Server { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Every connection is served on its own
    /// thread so a slow session never holds up the acceptor.
    pub fn run(&self) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "listening");
        }
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let spawned = thread::Builder::new()
                        .name(format!("session-{}", peer))
                        .spawn(move || serve_connection(stream, peer));
                    if let Err(e) = spawned {
                        error!(peer = %peer, "failed to spawn session thread: {}", e);
                    }
                }
                Err(e) => {
                    error!("Listener: {}", e);
                }
            }
        }
    }
}

fn serve_connection(stream: TcpStream, peer: SocketAddr) {
    let span = info_span!("session", peer = %peer);
    let _enter = span.enter();

    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay: {}", e);
    }

    let mut handler = SessionHandler::new(stream);
    let params = match handler.accept_hello() {
        Ok(params) => params,
        Err(e) => {
            warn!("handshake failed: {}", e);
            return;
        }
    };
    handler.serve_loop(&params).log();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Bye,
    /// Zero-byte read: the client went away without BYE.
    PeerClosed,
    Transport(ErrorKind),
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeTiming {
    pub sequence: u32,
    pub received_at: Instant,
    pub responded_at: Instant,
}

impl ProbeTiming {
    pub fn held(&self) -> Duration {
        self.responded_at - self.received_at
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub params: SessionParameters,
    pub end: SessionEnd,
    pub accepted: u32,
    pub rejected: u32,
    pub malformed: u32,
    pub timings: Vec<ProbeTiming>,
}

impl SessionSummary {
    fn log(&self) {
        let held: Duration = self.timings.iter().map(|t| t.held()).sum();
        info!(
            end = ?self.end,
            accepted = self.accepted,
            rejected = self.rejected,
            malformed = self.malformed,
            held = ?held,
            "session finished"
        );
    }
}

#[derive(Clone, Copy)]
enum Reply {
    Echo(u32),
    Reject,
}

/// Server end of one session. Owns the connection and its own sequencer.
pub struct SessionHandler<S: Read + Write> {
    stream: BufReader<S>,
    buf: Vec<u8>,
    out: Vec<u8>,
}

impl<S: Read + Write> SessionHandler<S> {
    pub fn new(stream: S) -> Self {
        SessionHandler {
            stream: BufReader::new(stream),
            buf: Vec::new(),
            out: Vec::new(),
        }
    }

    fn respond(&mut self, msg: &Message) -> io::Result<()> {
        self.out.clear();
        codec::encode_into(msg, &mut self.out);
        let stream = self.stream.get_mut();
        stream.write_all(&self.out)?;
        stream.flush()
    }

    fn echo(&mut self) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(&self.buf)?;
        stream.flush()
    }

    /// Reads the HELLO frame. An invalid HELLO is answered with the
    /// invalid-hello status before the error is returned; the caller is
    /// expected to drop the connection.
    pub fn accept_hello(&mut self) -> Result<SessionParameters, HandshakeError> {
        codec::read_frame(&mut self.stream, Expect::Hello, &mut self.buf)?;
        let err = match codec::decode(&self.buf, Phase::Hello) {
            Ok(Message::Hello(params)) => {
                self.respond(&Message::Ack(Ack::Ready))?;
                info!(
                    measure = %params.measurement_kind,
                    probes = params.probe_count,
                    payload_size = params.payload_size,
                    delay_ms = params.artificial_delay_ms,
                    "hello accepted"
                );
                return Ok(params);
            }
            Ok(other) => DecodeError::Malformed(format!("expected hello, got {:?}", other)),
            Err(e) => e,
        };

        if let Err(e) = self.respond(&Message::Error(Rejection::InvalidHello)) {
            debug!("could not send hello rejection: {}", e);
        }
        Err(HandshakeError::Malformed(err))
    }

    /// Answers probes until BYE or until the connection goes away.
    pub fn serve_loop(&mut self, params: &SessionParameters) -> SessionSummary {
        let mut sequencer = Sequencer::new(params.probe_count);
        let delay = Duration::from_millis(params.artificial_delay_ms);
        let phase = Phase::Measure {
            payload_size: params.payload_size,
        };
        let expect = Expect::Request {
            payload_size: params.payload_size,
        };

        let mut summary = SessionSummary {
            params: *params,
            end: SessionEnd::Bye,
            accepted: 0,
            rejected: 0,
            malformed: 0,
            timings: Vec::with_capacity(params.probe_count as usize),
        };

        loop {
            match codec::read_frame(&mut self.stream, expect, &mut self.buf) {
                Ok(()) => {}
                Err(FrameError::Closed) => {
                    warn!("connection closed by the client");
                    summary.end = SessionEnd::PeerClosed;
                    break;
                }
                Err(FrameError::Io(e)) => {
                    warn!("receive: {}", e);
                    summary.end = SessionEnd::Transport(e.kind());
                    break;
                }
            }
            let received_at = Instant::now();

            let reply = match codec::decode(&self.buf, phase) {
                Ok(Message::Bye) => {
                    sequencer.on_bye();
                    debug!(expected = sequencer.expected(), "bye received");
                    if let Err(e) = self.respond(&Message::Ack(Ack::Closing)) {
                        warn!("send: {}", e);
                        summary.end = SessionEnd::Transport(e.kind());
                    }
                    break;
                }
                Ok(Message::Probe(probe)) => match sequencer.on_probe(probe.sequence) {
                    Outcome::Accepted(n) => Reply::Echo(n),
                    Outcome::Rejected { expected, got } => {
                        warn!(expected, got, "out of sequence probe");
                        summary.rejected += 1;
                        Reply::Reject
                    }
                    Outcome::Terminated => Reply::Reject,
                },
                Ok(other) => {
                    warn!("unexpected message {:?}", other);
                    summary.malformed += 1;
                    Reply::Reject
                }
                Err(e) => {
                    warn!("{}", e);
                    summary.malformed += 1;
                    Reply::Reject
                }
            };

            // models server processing time, applied to every probe
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            let sent = match reply {
                Reply::Echo(_) => self.echo(),
                Reply::Reject => self.respond(&Message::Error(Rejection::InvalidMeasurement)),
            };
            let responded_at = Instant::now();
            if let Err(e) = sent {
                warn!("send: {}", e);
                summary.end = SessionEnd::Transport(e.kind());
                break;
            }

            if let Reply::Echo(sequence) = reply {
                debug!(probe_seq = sequence, "probe echoed");
                summary.accepted += 1;
                summary.timings.push(ProbeTiming {
                    sequence,
                    received_at,
                    responded_at,
                });
            }
        }

        summary
    }
}
