use serde::Serialize;
use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::codec::{self, Ack, Expect, Message, Phase, Probe, Rejection};
use crate::error::{ClientError, DecodeError, HandshakeError, Result};
use crate::params::SessionParameters;
use crate::sequencer::{Outcome, Sequencer};
use crate::stats::{Sample, SampleSet, Statistics};

/// What the client does when the server rejects a probe or echoes the wrong one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ResendPolicy {
    /// Report the mismatch and end the run.
    #[default]
    Abort,
    /// Retransmit the unacknowledged probe, at most `max_attempts` times per probe.
    Resend { max_attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientOptions {
    pub connect_timeout: Option<Duration>,
    pub resend: ResendPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: Some(Duration::from_secs(5)),
            resend: ResendPolicy::Abort,
        }
    }
}

/// Client end of one measurement session. Owns the transport; dropping the
/// session closes it.
pub struct Session<S: Read + Write> {
    stream: BufReader<S>,
    params: Option<SessionParameters>,
    send_buf: Vec<u8>,
    recv_buf: Vec<u8>,
}

pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Session<TcpStream>> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|source| ClientError::Connection { addr, source })?;
    stream
        .set_nodelay(true)
        .map_err(|source| ClientError::Connection { addr, source })?;
    debug!(server = %addr, "connected");
    Ok(Session::new(stream))
}

impl<S: Read + Write> Session<S> {
    pub fn new(stream: S) -> Self {
        Session {
            stream: BufReader::new(stream),
            params: None,
            send_buf: Vec::new(),
            recv_buf: Vec::new(),
        }
    }

    pub fn params(&self) -> Option<&SessionParameters> {
        self.params.as_ref()
    }

    fn write_pending(&mut self) -> std::io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(&self.send_buf)?;
        stream.flush()
    }

    fn send(&mut self, msg: &Message) -> std::io::Result<()> {
        self.send_buf.clear();
        codec::encode_into(msg, &mut self.send_buf);
        self.write_pending()
    }

    fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.recv_buf).trim_end().to_string()
    }

    /// Sends HELLO and waits for the server to accept it.
    pub fn handshake(
        &mut self,
        params: &SessionParameters,
    ) -> std::result::Result<(), HandshakeError> {
        params
            .validate()
            .map_err(|e| HandshakeError::Malformed(DecodeError::Malformed(e)))?;
        self.send(&Message::Hello(*params))?;
        codec::read_frame(&mut self.stream, Expect::Status, &mut self.recv_buf)?;
        match codec::decode(&self.recv_buf, Phase::Hello) {
            Ok(Message::Ack(Ack::Ready)) => {
                self.params = Some(*params);
                Ok(())
            }
            Ok(Message::Error(Rejection::InvalidHello)) => Err(HandshakeError::Refused),
            _ => Err(HandshakeError::Unexpected(self.response_text())),
        }
    }

    /// Sends every probe in order, one at a time, timing each round trip.
    pub fn run_probes(&mut self, policy: ResendPolicy) -> Result<SampleSet> {
        let params = self
            .params
            .ok_or_else(|| ClientError::Unexpected("probing before the handshake".to_string()))?;
        let phase = Phase::Measure {
            payload_size: params.payload_size,
        };
        let expect = Expect::Response {
            payload_size: params.payload_size,
        };

        let mut sequencer = Sequencer::new(params.probe_count);
        let mut samples = SampleSet::default();
        let mut attempts = 0;

        while !sequencer.is_complete() {
            let sequence = sequencer.expected();
            self.send_buf.clear();
            codec::encode_into(
                &Message::Probe(Probe::with_filler(sequence, params.payload_size)),
                &mut self.send_buf,
            );

            let start = Instant::now();
            self.write_pending()?;
            codec::read_frame(&mut self.stream, expect, &mut self.recv_buf)?;
            let round_trip = start.elapsed();

            let got = match codec::decode(&self.recv_buf, phase) {
                Ok(Message::Probe(echo)) => match sequencer.on_probe(echo.sequence) {
                    Outcome::Accepted(n) => {
                        debug!(probe_seq = n, rtt = ?round_trip, "probe echoed");
                        samples.push(Sample {
                            sequence: n,
                            round_trip,
                            retransmitted: attempts > 0,
                        });
                        attempts = 0;
                        continue;
                    }
                    Outcome::Rejected { got, .. } => Some(got),
                    Outcome::Terminated => {
                        return Err(ClientError::Unexpected(
                            "probe after the session ended".to_string(),
                        ))
                    }
                },
                Ok(Message::Error(Rejection::InvalidMeasurement)) => None,
                Ok(_) => return Err(ClientError::Unexpected(self.response_text())),
                Err(e) => {
                    warn!(expected = sequence, "garbled echo: {}", e);
                    None
                }
            };

            samples.mismatches += 1;
            warn!(expected = sequence, got = ?got, "probe mismatch");
            match policy {
                ResendPolicy::Resend { max_attempts } if attempts < max_attempts => {
                    attempts += 1;
                    debug!(probe_seq = sequence, attempt = attempts, "resending probe");
                }
                _ => {
                    return Err(ClientError::ProbeMismatch {
                        expected: sequence,
                        got,
                    })
                }
            }
        }

        Ok(samples)
    }

    /// Sends BYE and waits for the server to acknowledge it. The transport is
    /// released when this returns, whatever the outcome.
    pub fn close(mut self) -> Result<()> {
        self.send(&Message::Bye)?;
        codec::read_frame(&mut self.stream, Expect::Status, &mut self.recv_buf)?;
        match codec::decode(&self.recv_buf, Phase::Hello) {
            Ok(Message::Ack(Ack::Closing)) => Ok(()),
            Ok(_) => Err(ClientError::Unexpected(self.response_text())),
            Err(e) => Err(ClientError::Decode(e)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub server: SocketAddr,
    pub params: SessionParameters,
    pub samples: SampleSet,
    pub statistics: Statistics,
}

/// Runs one complete session: connect, handshake, probes, bye.
pub fn run_session(
    addr: SocketAddr,
    params: SessionParameters,
    options: &ClientOptions,
) -> Result<SessionReport> {
    let mut session = connect(addr, options.connect_timeout)?;
    session.handshake(&params)?;
    info!(
        server = %addr,
        measure = %params.measurement_kind,
        probes = params.probe_count,
        payload_size = params.payload_size,
        delay_ms = params.artificial_delay_ms,
        "session established"
    );
    let samples = session.run_probes(options.resend)?;
    session.close()?;

    let statistics = Statistics::aggregate(&samples, &params);
    Ok(SessionReport {
        server: addr,
        params,
        samples,
        statistics,
    })
}

/// Join all handles that yield `Result<T>`, return the first error if any,
/// otherwise collect all `T`s in handle order.
fn join_and_collect<T, I>(handles: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = JoinHandle<Result<T>>>,
{
    let mut values = Vec::new();
    let mut first_failure = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(value)) => values.push(value),
            Ok(Err(e)) => {
                first_failure.get_or_insert(e);
            }
            Err(_) => {
                first_failure
                    .get_or_insert(ClientError::Unexpected("session thread panicked".to_string()));
            }
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

/// Runs one independent session per parameter set. Sessions run one after the
/// other unless `parallel` is set, in which case each gets its own thread.
pub fn run_sweep(
    addr: SocketAddr,
    sessions: &[SessionParameters],
    options: &ClientOptions,
    parallel: bool,
) -> Result<Vec<SessionReport>> {
    run_sweep_with(addr, sessions, options, parallel, |_| {})
}

/// Like [`run_sweep`], handing every report to `on_report` in sweep order.
/// Sequential sweeps call it as soon as each session finishes; parallel
/// sweeps call it once all sessions have been joined.
pub fn run_sweep_with<F>(
    addr: SocketAddr,
    sessions: &[SessionParameters],
    options: &ClientOptions,
    parallel: bool,
    mut on_report: F,
) -> Result<Vec<SessionReport>>
where
    F: FnMut(&SessionReport),
{
    if !parallel {
        let mut reports = Vec::with_capacity(sessions.len());
        for params in sessions {
            let report = run_session(addr, *params, options)?;
            on_report(&report);
            reports.push(report);
        }
        return Ok(reports);
    }

    let handles: Vec<_> = sessions
        .iter()
        .map(|params| {
            let params = *params;
            let options = *options;
            thread::spawn(move || run_session(addr, params, &options))
        })
        .collect();
    let reports = join_and_collect(handles)?;
    for report in &reports {
        on_report(report);
    }
    Ok(reports)
}
