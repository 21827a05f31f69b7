use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tcpprobe::codec::{self, Message, STATUS_INVALID_HELLO};
use tcpprobe::{
    run_session, run_sweep, run_sweep_with, ClientOptions, MeasurementKind, ResendPolicy, Server,
    SessionParameters,
};

fn spawn_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run());
    addr
}

fn options() -> ClientOptions {
    ClientOptions {
        connect_timeout: Some(Duration::from_secs(2)),
        resend: ResendPolicy::Abort,
    }
}

#[test]
fn rtt_session_without_loss() {
    let addr = spawn_server();
    let params = SessionParameters::new(MeasurementKind::Rtt, 5, 0, 0).unwrap();
    let report = run_session(addr, params, &options()).unwrap();

    assert_eq!(report.samples.len(), 5);
    let seqs: Vec<u32> = report.samples.samples.iter().map(|s| s.sequence).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    assert_eq!(report.statistics.loss_percent, 0);
    assert!(report.statistics.mean_rtt_ms.unwrap() >= 0.0);
    assert_eq!(report.statistics.throughput_kbps, None);
}

#[test]
fn server_delay_bounds_every_round_trip() {
    let addr = spawn_server();
    let params = SessionParameters::new(MeasurementKind::Rtt, 3, 100, 50).unwrap();
    let report = run_session(addr, params, &options()).unwrap();

    assert_eq!(report.samples.len(), 3);
    for sample in &report.samples.samples {
        assert!(sample.round_trip >= Duration::from_millis(50));
    }
    assert!(report.statistics.min_rtt_ms.unwrap() >= 50.0);
}

#[test]
fn throughput_sweep_sequential_and_parallel() {
    let addr = spawn_server();
    let sessions: Vec<SessionParameters> = [1000, 4000, 32000]
        .iter()
        .map(|size| SessionParameters::new(MeasurementKind::Throughput, 4, *size, 0).unwrap())
        .collect();

    for parallel in [false, true] {
        let reports = run_sweep(addr, &sessions, &options(), parallel).unwrap();
        assert_eq!(reports.len(), 3);
        for (report, params) in reports.iter().zip(&sessions) {
            assert_eq!(report.params, *params);
            assert_eq!(report.statistics.transmitted, 4);
            assert_eq!(report.statistics.payload_size, params.payload_size);
            assert!(report.statistics.throughput_kbps.is_some());
        }
    }
}

#[test]
fn sequential_sweep_reports_each_session_when_it_finishes() {
    let addr = spawn_server();
    let sessions: Vec<SessionParameters> = [1, 100]
        .iter()
        .map(|size| SessionParameters::new(MeasurementKind::Rtt, 2, *size, 100).unwrap())
        .collect();

    let mut seen = Vec::new();
    let reports = run_sweep_with(addr, &sessions, &options(), false, |report| {
        seen.push((report.params.payload_size, Instant::now()));
    })
    .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, 1);
    assert_eq!(seen[1].0, 100);
    // the second session still needed two delayed round trips after the first report
    assert!(seen[1].1 - seen[0].1 >= Duration::from_millis(200));
}

#[test]
fn malformed_hello_gets_error_status_and_close() {
    let addr = spawn_server();
    let params = SessionParameters::new(MeasurementKind::Rtt, 1, 1, 0).unwrap();
    let mut hello = codec::encode(&Message::Hello(params));
    hello[2] = b'x';

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream.write_all(&hello).unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line.trim_end(), STATUS_INVALID_HELLO);

    let mut rest = Vec::new();
    assert_eq!(reader.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn slow_session_does_not_block_others() {
    let addr = spawn_server();
    let slow_done = Arc::new(AtomicBool::new(false));

    let slow = {
        let slow_done = slow_done.clone();
        thread::spawn(move || {
            let params = SessionParameters::new(MeasurementKind::Rtt, 3, 10, 300).unwrap();
            let report = run_session(addr, params, &options());
            slow_done.store(true, Ordering::SeqCst);
            report
        })
    };

    thread::sleep(Duration::from_millis(50));
    let params = SessionParameters::new(MeasurementKind::Rtt, 5, 10, 0).unwrap();
    let fast = run_session(addr, params, &options()).unwrap();
    assert_eq!(fast.samples.len(), 5);
    assert!(!slow_done.load(Ordering::SeqCst));

    let slow = slow.join().unwrap().unwrap();
    assert_eq!(slow.samples.len(), 3);
}

#[test]
fn unreachable_server_is_a_connection_error() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let params = SessionParameters::new(MeasurementKind::Rtt, 1, 1, 0).unwrap();
    assert!(matches!(
        run_session(addr, params, &options()),
        Err(tcpprobe::ClientError::Connection { .. })
    ));
}
