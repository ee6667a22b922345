use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tinytelemetry::collector::{bind, Collector};
use tinytelemetry::config::CollectorConfig;
use tinytelemetry::dedup::DedupMode;
use tinytelemetry::packet::{Frame, Reading, SensorType};
use tinytelemetry::signal::StopHandle;
use tinytelemetry::sink::{read_log, MemorySink};

fn readings() -> Vec<Reading> {
    vec![
        Reading::new(SensorType::Temperature, 21.5),
        Reading::new(SensorType::Humidity, 48.0),
        Reading::new(SensorType::Voltage, 3.9),
    ]
}

fn data(device_id: u16, seq: u32) -> Vec<u8> {
    Frame::data(device_id, seq, 1_700_000_000 + seq, readings())
        .encode()
        .unwrap()
}

fn collector() -> Collector<MemorySink> {
    Collector::new(CollectorConfig::default(), MemorySink::default()).unwrap()
}

#[test]
fn gap_is_flagged_on_first_frame_after_loss() {
    let mut c = collector();
    let now = SystemTime::now();

    for seq in [0, 1, 3] {
        c.handle_datagram(&data(1001, seq), now, None).unwrap();
    }

    let rows = &c.sink().records;
    assert_eq!(rows.len(), 3);
    assert!(!rows[0].gap && !rows[1].gap);
    assert!(rows[2].gap);
    assert_eq!(rows[2].gap_size, 1);
    assert!(rows.iter().all(|r| r.reading_count == 3));

    let session = c.session(1001).unwrap();
    assert_eq!(session.gap_count, 1);
    assert_eq!(session.last_seq(), Some(3));
}

#[test]
fn duplicate_is_logged_and_counted() {
    let mut c = collector();
    let now = SystemTime::now();

    c.handle_datagram(&data(1001, 1), now, None).unwrap();
    let dup = c.handle_datagram(&data(1001, 1), now, None).unwrap().unwrap();

    assert!(dup.duplicate);
    assert!(!dup.gap);
    assert_eq!(c.sink().records.len(), 2);

    let session = c.session(1001).unwrap();
    assert_eq!(session.duplicate_count, 1);
    assert_eq!(session.total_packets, 2);
    assert_eq!(session.reorder_buffer().len(), 1);
}

#[test]
fn late_frame_rewinds_gap_cursor() {
    let mut c = collector();
    let now = SystemTime::now();

    for seq in [0, 5, 2, 3] {
        c.handle_datagram(&data(7, seq), now, None).unwrap();
    }

    let gaps: Vec<u32> = c.sink().records.iter().map(|r| r.gap_size).collect();
    assert_eq!(gaps, vec![0, 4, 0, 0]);
    assert_eq!(c.session(7).unwrap().last_seq(), Some(3));
}

#[test]
fn bounded_dedup_treats_stale_sequence_as_duplicate() {
    let config = CollectorConfig::default().dedup(DedupMode::Window(8));
    let mut c = Collector::new(config, MemorySink::default()).unwrap();
    let now = SystemTime::now();

    for seq in 0..20 {
        c.handle_datagram(&data(2, seq), now, None).unwrap();
    }
    let stale = c.handle_datagram(&data(2, 3), now, None).unwrap().unwrap();

    assert!(stale.duplicate);
    assert!(c.session(2).unwrap().tracked_sequences() <= 64);
}

#[test]
fn reorder_buffer_stays_within_window() {
    let config = CollectorConfig::default().reorder_window(4);
    let mut c = Collector::new(config, MemorySink::default()).unwrap();
    let now = SystemTime::now();

    for seq in 0..10 {
        c.handle_datagram(&data(3, seq), now, None).unwrap();
    }

    assert_eq!(c.session(3).unwrap().reorder_buffer().len(), 4);
    assert_eq!(*c.metrics.reorder_evictions_total.lock(), 6);
    assert_eq!(c.sink().records.len(), 10);
}

#[test]
fn collector_logs_udp_traffic_to_csv() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("out").join("telemetry.csv");

    let mut config = CollectorConfig::default()
        .listen("127.0.0.1", 0)
        .log_path(&log_path);
    config.stop_poll = Duration::from_millis(20);

    let socket = bind(&config).unwrap();
    let addr = socket.local_addr().unwrap();
    let mut collector = Collector::open(config).unwrap();

    let stop = StopHandle::new();
    let loop_stop = stop.clone();
    let worker = thread::spawn(move || {
        collector.run(&socket, &loop_stop).unwrap();
        collector.finish().unwrap()
    });

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for seq in [0, 1, 3, 3] {
        sender.send_to(&data(1001, seq), addr).unwrap();
    }
    sender.send_to(&[0xFF; 5], addr).unwrap();
    sender
        .send_to(&Frame::heartbeat(1001, 4, 1_700_000_004).encode().unwrap(), addr)
        .unwrap();

    thread::sleep(Duration::from_millis(300));
    stop.stop();
    let (summary, sink) = worker.join().unwrap();
    sink.close().unwrap();

    let rows = read_log(&log_path).unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[2].seq, 3);
    assert!(rows[2].gap);
    assert_eq!(rows[2].gap_size, 1);
    assert!(rows[3].duplicate);
    assert_eq!(rows[4].msg_type.as_str(), "HEARTBEAT");
    assert_eq!(rows[4].reading_count, 0);

    assert_eq!(summary.devices.len(), 1);
    let device = &summary.devices[0];
    assert_eq!(device.device_id, 1001);
    assert_eq!(device.total_packets, 5);
    assert_eq!(device.duplicate_count, 1);
    assert_eq!(device.gap_count, 1);
    assert_eq!(device.last_seq, 4);
}

#[test]
fn idle_collector_flushes_rows_within_interval() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("telemetry.csv");

    let mut config = CollectorConfig::default()
        .listen("127.0.0.1", 0)
        .log_path(&log_path);
    config.stop_poll = Duration::from_millis(20);

    let socket = bind(&config).unwrap();
    let addr = socket.local_addr().unwrap();
    let mut collector = Collector::open(config).unwrap();

    let stop = StopHandle::new();
    let loop_stop = stop.clone();
    let worker = thread::spawn(move || {
        collector.run(&socket, &loop_stop).unwrap();
        collector.finish().unwrap()
    });

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for seq in 0..3 {
        sender.send_to(&data(1001, seq), addr).unwrap();
    }

    // Fewer rows than the record threshold, so only the timer can flush them.
    thread::sleep(Duration::from_millis(1500));
    let rows = read_log(&log_path).unwrap();

    stop.stop();
    let (_, sink) = worker.join().unwrap();
    sink.close().unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
}
