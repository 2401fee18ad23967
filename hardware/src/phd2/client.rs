//! Blocking client for the PHD2 event server.
//!
//! PHD2 speaks newline-delimited JSON-RPC 2.0. The same socket carries
//! asynchronous events, so a reader thread splits the stream: responses go
//! to the caller waiting on `call`, events go to a channel that the settle
//! logic consumes.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::messages::{parse_line, Inbound, Phd2Error, Phd2Event, Phd2Result, RpcResponse, SettleParams};
use super::Guider;
use crate::net::connect_any;

/// Default PHD2 event server port (instance 1).
pub const DEFAULT_PORT: u16 = 4400;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time allowed on top of PHD2's own settle timeout before giving up.
const SETTLE_MARGIN: Duration = Duration::from_secs(30);

pub struct Phd2Client {
    writer: Mutex<TcpStream>,
    /// Held for the duration of a call so responses pair up with requests.
    call_lock: Mutex<()>,
    next_id: AtomicU64,
    responses: Receiver<RpcResponse>,
    events: Receiver<Phd2Event>,
    reader: Option<JoinHandle<()>>,
    rpc_timeout: Duration,
}

impl Phd2Client {
    pub fn connect<A: ToSocketAddrs + ToString>(addr: A) -> Phd2Result<Self> {
        let address = addr.to_string();
        let stream = connect_any(addr, CONNECT_TIMEOUT)?;

        let (response_tx, response_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let reader_stream = stream.try_clone()?;
        let reader = std::thread::Builder::new()
            .name("phd2-reader".to_string())
            .spawn(move || read_loop(reader_stream, response_tx, event_tx))?;

        info!("Connected to PHD2 at {address}");
        Ok(Self {
            writer: Mutex::new(stream),
            call_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            responses: response_rx,
            events: event_rx,
            reader: Some(reader),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Invoke a JSON-RPC method and return its `result`.
    pub fn call(&self, method: &str, params: Option<Value>) -> Phd2Result<Value> {
        let _guard = self
            .call_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut request = json!({ "method": method, "id": id });
        if let Some(params) = params {
            request["params"] = params;
        }
        let line = format!("{request}\r\n");
        debug!("PHD2 >> {}", line.trim_end());
        {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writer.write_all(line.as_bytes())?;
            writer.flush()?;
        }

        let deadline = Instant::now() + self.rpc_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let response = match self.responses.recv_timeout(remaining) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Phd2Error::Timeout(format!("response to {method}")))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Phd2Error::Disconnected),
            };
            if response.id != Some(id) {
                debug!("Ignoring stale PHD2 response {:?}", response.id);
                continue;
            }
            return match response.error {
                Some(error) => Err(Phd2Error::Rpc {
                    method: method.to_string(),
                    code: error.code,
                    message: error.message,
                }),
                None => Ok(response.result),
            };
        }
    }

    pub fn get_app_state(&self) -> Phd2Result<String> {
        let result = self.call("get_app_state", None)?;
        Ok(result.as_str().unwrap_or_default().to_string())
    }

    /// Select the declination guide mode (`Off`, `Auto`, `North`, `South`).
    pub fn set_dec_guide_mode(&self, mode: &str) -> Phd2Result<()> {
        self.call("set_dec_guide_mode", Some(json!({ "mode": mode })))?;
        info!("PHD2 declination guide mode set to {mode}");
        Ok(())
    }

    /// Start guiding and block until PHD2 reports the result of settling.
    pub fn guide(&self, settle: &SettleParams, recalibrate: bool) -> Phd2Result<()> {
        self.drain_events();
        self.call(
            "guide",
            Some(json!({ "settle": settle, "recalibrate": recalibrate })),
        )?;
        info!("Guiding started, waiting to settle");
        self.wait_settle(settle)
    }

    /// Dither by up to `pixels` and block until guiding settles again.
    pub fn dither(&self, pixels: f64, ra_only: bool, settle: &SettleParams) -> Phd2Result<()> {
        self.drain_events();
        self.call(
            "dither",
            Some(json!({ "amount": pixels, "raOnly": ra_only, "settle": settle })),
        )?;
        self.wait_settle(settle)
    }

    /// Stop looping exposures, which also stops guiding.
    pub fn stop_capture(&self) -> Phd2Result<()> {
        self.call("stop_capture", None)?;
        info!("PHD2 capture stopped");
        Ok(())
    }

    fn drain_events(&self) {
        for event in self.events.try_iter() {
            debug!("Discarding earlier PHD2 event {event:?}");
        }
    }

    fn wait_settle(&self, settle: &SettleParams) -> Phd2Result<()> {
        let deadline = Instant::now() + Duration::from_secs(settle.timeout) + SETTLE_MARGIN;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Phd2Error::Timeout("SettleDone".to_string()))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Phd2Error::Disconnected),
            };
            match event {
                Phd2Event::SettleDone { status: 0, .. } => {
                    info!("Guiding settled");
                    return Ok(());
                }
                Phd2Event::SettleDone { error, .. } => {
                    return Err(Phd2Error::SettleFailed(
                        error.unwrap_or_else(|| "unknown reason".to_string()),
                    ));
                }
                Phd2Event::Settling { distance } => debug!("Settling, distance {distance:.2} px"),
                Phd2Event::StarLost {} => warn!("PHD2 lost the guide star while settling"),
                Phd2Event::Alert { msg } => warn!("PHD2 alert: {msg}"),
                other => debug!("PHD2 event {other:?}"),
            }
        }
    }
}

impl Guider for Phd2Client {
    fn set_dec_guide_mode(&self, mode: &str) -> Phd2Result<()> {
        Phd2Client::set_dec_guide_mode(self, mode)
    }

    fn start(&self, settle: &SettleParams) -> Phd2Result<()> {
        self.guide(settle, false)
    }

    fn dither(&self, pixels: f64, settle: &SettleParams) -> Phd2Result<()> {
        Phd2Client::dither(self, pixels, false, settle)
    }

    fn stop(&self) -> Phd2Result<()> {
        self.stop_capture()
    }
}

impl Drop for Phd2Client {
    fn drop(&mut self) {
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("PHD2 reader thread panicked");
            }
        }
    }
}

fn read_loop(stream: TcpStream, responses: Sender<RpcResponse>, events: Sender<Phd2Event>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                info!("PHD2 connection lost: {e}");
                return;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("PHD2 << {line}");
        match parse_line(line) {
            Ok(Inbound::Event(Phd2Event::Version { phd_version })) => {
                info!("PHD2 version {phd_version}");
            }
            Ok(Inbound::Event(Phd2Event::Alert { msg })) => {
                warn!("PHD2 alert: {msg}");
                let _ = events.send(Phd2Event::Alert { msg });
            }
            Ok(Inbound::Event(event)) => {
                let _ = events.send(event);
            }
            Ok(Inbound::Response(response)) => {
                let _ = responses.send(response);
            }
            Err(e) => warn!("Ignoring malformed PHD2 line: {e}"),
        }
    }
    info!("PHD2 closed the connection");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Fake PHD2: announces its version, then answers each request with the
    /// lines returned by `handler`. Returns the methods it received.
    fn fake_phd2(handler: fn(&Value) -> Vec<String>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(b"{\"Event\":\"Version\",\"PHDVersion\":\"2.6.13\",\"MsgVersion\":1}\r\n")
                .unwrap();
            let reader = BufReader::new(socket.try_clone().unwrap());
            let mut methods = Vec::new();
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let request: Value = serde_json::from_str(&line).unwrap();
                methods.push(request["method"].as_str().unwrap().to_string());
                for reply in handler(&request) {
                    socket.write_all(reply.as_bytes()).unwrap();
                    socket.write_all(b"\r\n").unwrap();
                }
            }
            methods
        });
        (addr, handle)
    }

    fn ok(request: &Value) -> String {
        json!({"jsonrpc": "2.0", "result": 0, "id": request["id"]}).to_string()
    }

    #[test]
    fn test_guide_waits_for_settle_done() {
        let (addr, server) = fake_phd2(|request| {
            if request["method"] == "guide" {
                assert_eq!(request["params"]["settle"]["pixels"], 1.5);
                assert_eq!(request["params"]["recalibrate"], false);
                vec![
                    ok(request),
                    r#"{"Event":"Settling","Distance":2.5,"Time":1,"SettleTime":10,"StarLocked":true}"#.to_string(),
                    r#"{"Event":"SettleDone","Status":0,"TotalFrames":12,"DroppedFrames":0}"#.to_string(),
                ]
            } else {
                vec![ok(request)]
            }
        });
        let client = Phd2Client::connect(addr).unwrap();
        client.set_dec_guide_mode("Auto").unwrap();
        client.guide(&SettleParams::default(), false).unwrap();
        client.stop_capture().unwrap();
        drop(client);
        assert_eq!(
            server.join().unwrap(),
            vec!["set_dec_guide_mode", "guide", "stop_capture"]
        );
    }

    #[test]
    fn test_dither_settle_failure() {
        let (addr, server) = fake_phd2(|request| {
            assert_eq!(request["params"]["amount"], 3.0);
            vec![
                ok(request),
                r#"{"Event":"StarLost","Frame":4,"Status":1}"#.to_string(),
                r#"{"Event":"SettleDone","Status":1,"Error":"star lost"}"#.to_string(),
            ]
        });
        let client = Phd2Client::connect(addr).unwrap();
        let err = client
            .dither(3.0, false, &SettleParams::default())
            .unwrap_err();
        assert!(matches!(err, Phd2Error::SettleFailed(ref reason) if reason == "star lost"));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_rpc_error_and_result() {
        let (addr, server) = fake_phd2(|request| {
            let reply = if request["method"] == "get_app_state" {
                json!({"jsonrpc": "2.0", "result": "Looping", "id": request["id"]})
            } else {
                json!({"jsonrpc": "2.0", "error": {"code": 1, "message": "equipment not connected"}, "id": request["id"]})
            };
            vec![reply.to_string()]
        });
        let client = Phd2Client::connect(addr).unwrap();
        assert_eq!(client.get_app_state().unwrap(), "Looping");
        let err = client.guide(&SettleParams::default(), true).unwrap_err();
        assert!(matches!(err, Phd2Error::Rpc { code: 1, .. }));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_call_times_out_without_response() {
        let (addr, server) = fake_phd2(|_| Vec::new());
        let client = Phd2Client::connect(addr)
            .unwrap()
            .with_rpc_timeout(Duration::from_millis(50));
        let err = client.get_app_state().unwrap_err();
        assert!(matches!(err, Phd2Error::Timeout(_)));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_connect_by_hostname() {
        // localhost may resolve to ::1 first while the server is IPv4 only
        let (addr, server) = fake_phd2(|request| {
            vec![json!({"jsonrpc": "2.0", "result": "Stopped", "id": request["id"]}).to_string()]
        });
        let port = addr.rsplit(':').next().unwrap();
        let client = Phd2Client::connect(format!("localhost:{port}")).unwrap();
        assert_eq!(client.get_app_state().unwrap(), "Stopped");
        drop(client);
        server.join().unwrap();
    }
}
