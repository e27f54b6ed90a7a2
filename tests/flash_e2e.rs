//! End to end sessions against scripted OTA servers on the loopback interface.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use otacom::ota_protocol::{decode_request, encode_response, ResponseCode, REQUEST_LEN};
use otacom::{crc32, flash_all, Outcome, Settings, SettingsBuilder};

/// What a fake device saw on one connection.
#[derive(Debug)]
struct Session {
    /// Every byte received until the client closed the connection.
    received: usize,
    /// Whether the received payload matched the announced checksum.
    payload_ok: bool,
}

/// Server side of a connection, counting the bytes it receives.
struct Wire {
    stream: TcpStream,
    received: usize,
}
impl Read for Wire {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        self.received += n;
        Ok(n)
    }
}
impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// A fake device accepting a fixed number of connections, each one served by
/// `serve` which is given the connection index. Once `serve` returns, the
/// device keeps reading until the client closes the connection.
struct Device {
    address: String,
    handle: JoinHandle<Vec<Session>>,
}
impl Device {
    fn spawn<F>(connections: usize, serve: F) -> Device
    where
        F: Fn(usize, &mut Wire) -> io::Result<bool> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let mut sessions = Vec::new();
            for index in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(10)))
                    .unwrap();
                let mut wire = Wire {
                    stream,
                    received: 0,
                };
                let payload_ok = serve(index, &mut wire).unwrap_or(false);
                let _ = wire.read_to_end(&mut Vec::new());
                sessions.push(Session {
                    received: wire.received,
                    payload_ok,
                });
            }
            sessions
        });
        Device { address, handle }
    }

    fn join(self) -> Vec<Session> {
        self.handle.join().unwrap()
    }
}

/// Read the request frame, answer `first`, and if the answer was a success
/// read the payload and answer `last` (or the real checksum verdict).
fn serve_flash(
    stream: &mut Wire,
    first: ResponseCode,
    last: Option<ResponseCode>,
) -> io::Result<bool> {
    let mut frame = [0u8; REQUEST_LEN];
    stream.read_exact(&mut frame)?;
    let request = decode_request(&frame).expect("valid request frame");
    stream.write_all(&encode_response(first))?;
    if first != ResponseCode::Success {
        return Ok(false);
    }

    let mut payload = vec![0u8; request.payload_len as usize];
    stream.read_exact(&mut payload)?;
    let payload_ok = crc32(&payload) == request.checksum;
    let verdict = last.unwrap_or(if payload_ok {
        ResponseCode::Success
    } else {
        ResponseCode::ChecksumFailed
    });
    stream.write_all(&encode_response(verdict))?;
    Ok(payload_ok)
}

fn firmware(dir: &tempfile::TempDir, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join("firmware.bin");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn settings(timeout: Duration) -> Settings {
    SettingsBuilder::new().poll_timeout(timeout).finalize()
}

#[test]
fn ten_byte_image_is_flashed_with_22_bytes_on_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    let device = Device::spawn(1, |_, stream| serve_flash(stream, ResponseCode::Success, None));
    let address = device.address.clone();

    let report = flash_all(&image, &[address.as_str()], &settings(Duration::from_secs(5))).unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Success));
    assert!(report.all_succeeded());
    assert_eq!(report.connections_to(&address), 1);

    let sessions = device.join();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].payload_ok);
    assert_eq!(sessions[0].received, 22);
}

#[test]
fn fatal_answers_fail_without_reconnecting() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[0xaa; 64]);
    let corrupted = Device::spawn(1, |_, stream| {
        serve_flash(stream, ResponseCode::Success, Some(ResponseCode::ChecksumFailed))
    });
    let full = Device::spawn(1, |_, stream| {
        serve_flash(stream, ResponseCode::StorageFull, None)
    });
    let addresses = vec![corrupted.address.clone(), full.address.clone()];

    let report = flash_all(&image, addresses.as_slice(), &settings(Duration::from_secs(5))).unwrap();

    for address in &addresses {
        assert_eq!(report.outcome(address), Some(Outcome::Failure));
        assert_eq!(report.connections_to(address), 1);
    }
    assert!(!report.aborted());

    // Both servers saw the client close its socket.
    assert_eq!(corrupted.join().len(), 1);
    assert_eq!(full.join().len(), 1);
}

#[test]
fn rebooting_device_is_flashed_on_a_second_connection() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, b"new application image");
    let device = Device::spawn(2, |index, stream| match index {
        0 => serve_flash(stream, ResponseCode::Rebooting, None),
        _ => serve_flash(stream, ResponseCode::Success, None),
    });
    let address = device.address.clone();

    let report = flash_all(&image, &[address.as_str()], &settings(Duration::from_secs(5))).unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Success));
    assert_eq!(report.connections_to(&address), 2);

    let sessions = device.join();
    assert_eq!(sessions.len(), 2);
    assert!(!sessions[0].payload_ok);
    assert!(sessions[1].payload_ok);
}

#[test]
fn reboot_ceiling_turns_endless_reboots_into_failure() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[1, 2, 3]);
    let device = Device::spawn(2, |_, stream| {
        serve_flash(stream, ResponseCode::Rebooting, None)
    });
    let address = device.address.clone();
    let settings = SettingsBuilder::new()
        .poll_timeout(Duration::from_secs(5))
        .max_reboots(1)
        .finalize();

    let report = flash_all(&image, &[address.as_str()], &settings).unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Failure));
    assert_eq!(report.connections_to(&address), 2);
    assert_eq!(device.join().len(), 2);
}

#[test]
fn silent_device_times_out_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[7; 16]);
    let device = Device::spawn(1, |_, stream| {
        // Take the request and never answer.
        let mut frame = [0u8; REQUEST_LEN];
        stream.read_exact(&mut frame)?;
        Ok(false)
    });
    let address = device.address.clone();

    let report = flash_all(
        &image,
        &[address.as_str()],
        &settings(Duration::from_millis(300)),
    )
    .unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Failure));
    assert!(report.aborted());
    assert_eq!(report.stalled, vec![address]);
    // The abandoned connection was closed.
    assert_eq!(device.join().len(), 1);
}

#[test]
fn empty_image_is_announced_and_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[]);
    let device = Device::spawn(1, |_, stream| serve_flash(stream, ResponseCode::Success, None));
    let address = device.address.clone();

    let report = flash_all(&image, &[address.as_str()], &settings(Duration::from_secs(5))).unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Success));
    let sessions = device.join();
    assert!(sessions[0].payload_ok);
    assert_eq!(sessions[0].received, REQUEST_LEN);
}

#[test]
fn disconnecting_device_fails() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &[3; 8]);
    // Close right after reading the request, without answering.
    let device = Device::spawn(1, |_, stream| {
        let mut frame = [0u8; REQUEST_LEN];
        stream.read_exact(&mut frame)?;
        stream.stream.shutdown(std::net::Shutdown::Write)?;
        Ok(false)
    });
    let address = device.address.clone();

    let report = flash_all(&image, &[address.as_str()], &settings(Duration::from_secs(5))).unwrap();

    assert_eq!(report.outcome(&address), Some(Outcome::Failure));
    assert!(!report.aborted());
    device.join();
}

#[test]
fn one_bad_target_does_not_affect_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let image = firmware(&dir, &(0..=255).collect::<Vec<u8>>());
    let good = Device::spawn(1, |_, stream| serve_flash(stream, ResponseCode::Success, None));
    // Nothing listens on this one.
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let addresses = vec![good.address.clone(), closed.clone()];

    let report = flash_all(&image, addresses.as_slice(), &settings(Duration::from_secs(5))).unwrap();

    assert_eq!(report.outcome(&good.address), Some(Outcome::Success));
    assert_eq!(report.outcome(&closed), Some(Outcome::Failure));
    assert!(!report.all_succeeded());
    good.join();
}

#[test]
fn missing_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = flash_all(
        dir.path().join("nope.bin"),
        &["127.0.0.1"],
        &settings(Duration::from_secs(1)),
    );
    assert!(matches!(result, Err(otacom::FlashError::FirmwareRead { .. })));
}
