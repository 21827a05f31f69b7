//! Text wire format shared by client and server.
//!
//! A stream carries fixed-length frames whose size depends on the phase of
//! the session, so the reader always knows how many bytes to wait for:
//!
//! ```text
//! h <kind> <probes:05> <payload:05> <delay:05>   (space padded to HELLO_FRAME_LEN)
//! m <seq:05> <payload>\n                         (payload_size + FRAME_OVERHEAD)
//! b\n
//! ```
//!
//! The server answers with short status lines, which start with a digit and
//! end with a newline.

use arrayvec::ArrayVec;
use std::io::{self, BufRead, ErrorKind, Read};

use crate::error::{DecodeError, FrameError};
use crate::params::{MeasurementKind, SessionParameters};

pub const PHASE_HELLO: u8 = b'h';
pub const PHASE_MEASURE: u8 = b'm';
pub const PHASE_BYE: u8 = b'b';

/// Size of a HELLO frame, newline included. Independent of the payload size
/// since the payload size is not known until the HELLO is parsed.
pub const HELLO_FRAME_LEN: usize = 27;
/// `m`, space, sequence digits, space and the trailing newline.
pub const FRAME_OVERHEAD: usize = 4 + SEQUENCE_DIGITS;
pub const SEQUENCE_DIGITS: usize = 5;
/// Numeric HELLO fields and sequence numbers are five digits wide.
pub const MAX_FIELD_VALUE: u64 = 99_999;
pub const BYE_FRAME: &[u8] = b"b\n";
pub const MAX_STATUS_LEN: usize = 64;

pub const PAYLOAD_FILLER: u8 = b'-';

pub const STATUS_READY: &str = "200 OK - Ready";
pub const STATUS_CLOSING: &str = "200 OK - Closing";
pub const STATUS_INVALID_HELLO: &str = "404 ERROR - Invalid Hello message";
pub const STATUS_INVALID_MEASURE: &str = "404 ERROR - Invalid Measurement message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ready,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidHello,
    InvalidMeasurement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl Probe {
    pub fn with_filler(sequence: u32, payload_size: usize) -> Self {
        Probe {
            sequence,
            payload: vec![PAYLOAD_FILLER; payload_size],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(SessionParameters),
    Probe(Probe),
    Bye,
    Ack(Ack),
    Error(Rejection),
}

/// What the receiver is prepared to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Hello,
    Measure { payload_size: usize },
}

/// What the receiver is waiting for on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A HELLO frame, read as exactly `HELLO_FRAME_LEN` bytes.
    Hello,
    /// A probe or a BYE from the client.
    Request { payload_size: usize },
    /// An echoed probe or a status line from the server.
    Response { payload_size: usize },
    Status,
}

pub fn measure_frame_len(payload_size: usize) -> usize {
    payload_size + FRAME_OVERHEAD
}

impl Ack {
    fn status(&self) -> &'static str {
        match *self {
            Ack::Ready => STATUS_READY,
            Ack::Closing => STATUS_CLOSING,
        }
    }
}

impl Rejection {
    fn status(&self) -> &'static str {
        match *self {
            Rejection::InvalidHello => STATUS_INVALID_HELLO,
            Rejection::InvalidMeasurement => STATUS_INVALID_MEASURE,
        }
    }
}

pub fn encode(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(msg, &mut buf);
    buf
}

/// Appends the encoded frame to `buf`.
pub fn encode_into(msg: &Message, buf: &mut Vec<u8>) {
    match msg {
        Message::Hello(params) => buf.extend_from_slice(&hello_frame(params)),
        Message::Probe(probe) => {
            let header = format!(
                "{} {:0width$} ",
                PHASE_MEASURE as char,
                probe.sequence,
                width = SEQUENCE_DIGITS
            );
            buf.extend_from_slice(header.as_bytes());
            buf.extend_from_slice(&probe.payload);
            buf.push(b'\n');
        }
        Message::Bye => buf.extend_from_slice(BYE_FRAME),
        Message::Ack(ack) => push_status(ack.status(), buf),
        Message::Error(rejection) => push_status(rejection.status(), buf),
    }
}

fn push_status(status: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(status.as_bytes());
    buf.push(b'\n');
}

fn hello_frame(params: &SessionParameters) -> ArrayVec<u8, HELLO_FRAME_LEN> {
    let line = format!(
        "{} {} {:05} {:05} {:05}",
        PHASE_HELLO as char,
        params.measurement_kind.token(),
        params.probe_count,
        params.payload_size,
        params.artificial_delay_ms
    );
    let mut frame = ArrayVec::new();
    frame.extend(line.bytes().take(HELLO_FRAME_LEN - 1));
    while frame.len() < HELLO_FRAME_LEN - 1 {
        frame.push(b' ');
    }
    frame.push(b'\n');
    frame
}

pub fn decode(frame: &[u8], phase: Phase) -> Result<Message, DecodeError> {
    match (frame.first().copied(), phase) {
        (None, _) => Err(DecodeError::malformed("empty frame")),
        (Some(b), _) if b.is_ascii_digit() => decode_status(frame),
        (Some(PHASE_HELLO), Phase::Hello) => decode_hello(frame),
        (Some(PHASE_MEASURE), Phase::Measure { payload_size }) => {
            decode_probe(frame, payload_size)
        }
        (Some(PHASE_BYE), Phase::Measure { .. }) => decode_bye(frame),
        (Some(tag), _) => Err(DecodeError::malformed(format!(
            "unexpected phase tag {:?}",
            tag as char
        ))),
    }
}

fn decode_hello(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame.len() != HELLO_FRAME_LEN {
        return Err(DecodeError::malformed(format!(
            "hello frame is {} bytes, expected {}",
            frame.len(),
            HELLO_FRAME_LEN
        )));
    }
    let body = frame
        .strip_suffix(b"\n")
        .ok_or_else(|| DecodeError::malformed("hello frame is not newline terminated"))?;
    let text = std::str::from_utf8(body)
        .map_err(|_| DecodeError::malformed("hello frame is not valid text"))?;
    let fields: Vec<&str> = text.trim_end_matches(' ').split(' ').collect();
    if fields.len() != 5 || fields[0] != "h" {
        return Err(DecodeError::malformed(format!(
            "hello has {} fields, expected 5",
            fields.len()
        )));
    }

    let kind: MeasurementKind = fields[1].parse().map_err(DecodeError::Malformed)?;
    let probe_count = parse_field(fields[2], "probe count")?;
    let payload_size = parse_field(fields[3], "payload size")?;
    let delay = parse_field(fields[4], "server delay")?;

    let params = SessionParameters::new(kind, probe_count as u32, payload_size as usize, delay)
        .map_err(DecodeError::Malformed)?;
    Ok(Message::Hello(params))
}

fn parse_field(field: &str, name: &str) -> Result<u64, DecodeError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::malformed(format!("{} {:?} is not a number", name, field)));
    }
    let value: u64 = field
        .parse()
        .map_err(|_| DecodeError::malformed(format!("{} {:?} is not a number", name, field)))?;
    if value > MAX_FIELD_VALUE {
        return Err(DecodeError::malformed(format!("{} {} is out of range", name, value)));
    }
    Ok(value)
}

fn decode_probe(frame: &[u8], payload_size: usize) -> Result<Message, DecodeError> {
    let expected = measure_frame_len(payload_size);
    if frame.len() != expected {
        return Err(DecodeError::malformed(format!(
            "measurement frame is {} bytes, expected {}",
            frame.len(),
            expected
        )));
    }
    let seq_end = 2 + SEQUENCE_DIGITS;
    if frame[1] != b' ' || frame[seq_end] != b' ' || frame[expected - 1] != b'\n' {
        return Err(DecodeError::malformed("measurement frame has bad separators"));
    }
    let digits = std::str::from_utf8(&frame[2..seq_end])
        .map_err(|_| DecodeError::malformed("sequence number is not valid text"))?;
    let sequence = parse_field(digits, "sequence number")? as u32;

    Ok(Message::Probe(Probe {
        sequence,
        payload: frame[seq_end + 1..expected - 1].to_vec(),
    }))
}

fn decode_bye(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame != BYE_FRAME {
        return Err(DecodeError::malformed("bad bye frame"));
    }
    Ok(Message::Bye)
}

fn decode_status(frame: &[u8]) -> Result<Message, DecodeError> {
    let line = frame
        .strip_suffix(b"\n")
        .ok_or_else(|| DecodeError::malformed("status line is not newline terminated"))?;
    match std::str::from_utf8(line) {
        Ok(STATUS_READY) => Ok(Message::Ack(Ack::Ready)),
        Ok(STATUS_CLOSING) => Ok(Message::Ack(Ack::Closing)),
        Ok(STATUS_INVALID_HELLO) => Ok(Message::Error(Rejection::InvalidHello)),
        Ok(STATUS_INVALID_MEASURE) => Ok(Message::Error(Rejection::InvalidMeasurement)),
        Ok(other) => Err(DecodeError::malformed(format!("unknown status {:?}", other))),
        Err(_) => Err(DecodeError::malformed("status line is not valid text")),
    }
}

/// Reads one complete frame of the expected kind into `buf`.
///
/// Returns `FrameError::Closed` if the peer shut the stream before the first
/// byte of the frame; an EOF in the middle of a frame is an I/O error.
pub fn read_frame<R: BufRead>(
    reader: &mut R,
    expect: Expect,
    buf: &mut Vec<u8>,
) -> Result<(), FrameError> {
    buf.clear();
    let first = read_first_byte(reader)?;
    buf.push(first);

    match expect {
        Expect::Hello => read_rest(reader, buf, HELLO_FRAME_LEN)?,
        Expect::Request { .. } if first == PHASE_BYE => read_rest(reader, buf, BYE_FRAME.len())?,
        Expect::Request { payload_size } => {
            read_rest(reader, buf, measure_frame_len(payload_size))?
        }
        Expect::Response { .. } if first.is_ascii_digit() => read_line(reader, buf)?,
        Expect::Response { payload_size } => {
            read_rest(reader, buf, measure_frame_len(payload_size))?
        }
        Expect::Status => read_line(reader, buf)?,
    }
    Ok(())
}

fn read_first_byte<R: Read>(reader: &mut R) -> Result<u8, FrameError> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Err(FrameError::Closed),
            Ok(_) => return Ok(byte[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
}

fn read_rest<R: Read>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> io::Result<()> {
    let have = buf.len();
    if len <= have {
        return Ok(());
    }
    buf.resize(len, 0);
    reader.read_exact(&mut buf[have..])
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    if buf.last() == Some(&b'\n') {
        return Ok(());
    }
    let limit = (MAX_STATUS_LEN - buf.len()) as u64;
    let n = reader.by_ref().take(limit).read_until(b'\n', buf)?;
    if buf.last() != Some(&b'\n') && (n as u64) < limit {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            "stream ended inside a status line",
        ));
    }
    Ok(())
}
