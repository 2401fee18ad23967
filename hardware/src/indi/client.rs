//! Blocking INDI client.
//!
//! A reader thread owns the inbound half of the socket, decodes the stream
//! and keeps a [`PropertyStore`] up to date. Callers send commands through
//! the outbound half and block on a condition variable until the device
//! reports back.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::error::{IndiError, IndiResult};
use super::property::{Property, PropertyState, PropertyStore, SwitchState};
use super::protocol::{
    encode_enable_blob, encode_get_properties, encode_new_number, encode_new_switch,
    encode_new_text, encode_ping_reply, BlobMode, BlobPayload, IndiMessage, MessageDecoder,
};
use crate::net::connect_any;

/// Default INDI server port.
pub const DEFAULT_PORT: u16 = 7624;

/// Connection timeout for the initial TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct StoreState {
    properties: PropertyStore,
    connected: bool,
}

struct Shared {
    state: Mutex<StoreState>,
    changed: Condvar,
    /// Outbound half; commands and ping replies must not interleave.
    writer: Mutex<TcpStream>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // a panic in the reader thread must not take every waiter down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, xml: &str) -> IndiResult<()> {
        debug!("INDI >> {}", xml.trim_end());
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(xml.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Connection to an INDI server.
pub struct IndiClient {
    shared: Arc<Shared>,
    blobs: Receiver<BlobPayload>,
    reader: Option<JoinHandle<()>>,
    address: String,
}

impl IndiClient {
    /// Connect to an INDI server and request every property definition.
    pub fn connect<A: ToSocketAddrs + ToString>(addr: A) -> IndiResult<Self> {
        let address = addr.to_string();
        let stream = connect_any(addr, CONNECT_TIMEOUT)?;

        let reader_stream = stream.try_clone()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(StoreState {
                properties: PropertyStore::new(),
                connected: true,
            }),
            changed: Condvar::new(),
            writer: Mutex::new(stream),
        });
        let (blob_tx, blob_rx) = unbounded();

        let reader_shared = Arc::clone(&shared);
        let reader = std::thread::Builder::new()
            .name("indi-reader".to_string())
            .spawn(move || read_loop(reader_stream, reader_shared, blob_tx))?;

        let client = Self {
            shared,
            blobs: blob_rx,
            reader: Some(reader),
            address,
        };
        client.send_raw(&encode_get_properties(None, None))?;
        info!("Connected to INDI server at {}", client.address);
        Ok(client)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    fn send_raw(&self, xml: &str) -> IndiResult<()> {
        self.shared.send(xml)
    }

    pub fn send_switch(
        &self,
        device: &str,
        property: &str,
        elements: &[(&str, SwitchState)],
    ) -> IndiResult<()> {
        self.send_raw(&encode_new_switch(device, property, elements))
    }

    pub fn send_number(&self, device: &str, property: &str, elements: &[(&str, f64)]) -> IndiResult<()> {
        self.send_raw(&encode_new_number(device, property, elements))
    }

    pub fn send_text(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<()> {
        self.send_raw(&encode_new_text(device, property, elements))
    }

    pub fn enable_blob(&self, device: &str, mode: BlobMode) -> IndiResult<()> {
        self.send_raw(&encode_enable_blob(device, None, mode))
    }

    /// Snapshot of a cached property.
    pub fn property(&self, device: &str, name: &str) -> Option<Property> {
        self.shared.lock().properties.get(device, name).cloned()
    }

    /// Update counter of a property; pass it to [`wait_settled`](Self::wait_settled)
    /// to ignore reports that predate a command.
    pub fn update_count(&self, device: &str, name: &str) -> u64 {
        self.shared.lock().properties.update_count(device, name)
    }

    /// Devices that have announced properties so far.
    pub fn devices(&self) -> Vec<String> {
        self.shared.lock().properties.devices()
    }

    /// Block until a property has been defined.
    pub fn wait_for_property(&self, device: &str, name: &str, timeout: Duration) -> IndiResult<Property> {
        self.wait_until(device, name, timeout, |state| {
            state.properties.get(device, name).cloned().map(Ok)
        })
    }

    /// Block until the property reports a settled state after update `after`.
    ///
    /// `Busy` reports are skipped; `Alert` fails immediately.
    pub fn wait_settled(
        &self,
        device: &str,
        name: &str,
        after: u64,
        timeout: Duration,
    ) -> IndiResult<Property> {
        self.wait_until(device, name, timeout, |state| {
            if state.properties.update_count(device, name) <= after {
                return None;
            }
            let property = state.properties.get(device, name)?;
            match property.state {
                state if state.is_settled() => Some(Ok(property.clone())),
                PropertyState::Alert => Some(Err(IndiError::PropertyAlert {
                    device: device.to_string(),
                    property: name.to_string(),
                })),
                _ => None,
            }
        })
    }

    fn wait_until<F>(&self, device: &str, name: &str, timeout: Duration, mut check: F) -> IndiResult<Property>
    where
        F: FnMut(&StoreState) -> Option<IndiResult<Property>>,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(result) = check(&*state) {
                return result;
            }
            if !state.connected {
                return Err(IndiError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(IndiError::timeout(device, name));
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Wait for the next BLOB from any device with BLOBs enabled.
    pub fn recv_blob(&self, timeout: Duration) -> IndiResult<BlobPayload> {
        match self.blobs.recv_timeout(timeout) {
            Ok(blob) => Ok(blob),
            Err(RecvTimeoutError::Timeout) => Err(IndiError::timeout("*", "BLOB")),
            Err(RecvTimeoutError::Disconnected) => Err(IndiError::Disconnected),
        }
    }

    /// Discard BLOBs that arrived before the caller started an exposure.
    pub fn drain_blobs(&self) -> usize {
        self.blobs.try_iter().count()
    }
}

impl Drop for IndiClient {
    fn drop(&mut self) {
        if let Ok(writer) = self.shared.writer.lock() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("INDI reader thread panicked");
            }
        }
    }
}

fn read_loop(stream: TcpStream, shared: Arc<Shared>, blobs: Sender<BlobPayload>) {
    let mut decoder = MessageDecoder::new(BufReader::new(stream));
    loop {
        match decoder.next_message() {
            Ok(Some(message)) => handle_message(message, &shared, &blobs),
            Ok(None) => {
                info!("INDI server closed the connection");
                break;
            }
            Err(IndiError::Disconnected) | Err(IndiError::Io(_)) => {
                info!("INDI connection lost");
                break;
            }
            Err(e) => {
                // decoding cannot resynchronise mid-stream
                warn!("Dropping INDI connection after decode error: {e}");
                break;
            }
        }
    }
    shared.lock().connected = false;
    shared.changed.notify_all();
}

fn handle_message(message: IndiMessage, shared: &Shared, blobs: &Sender<BlobPayload>) {
    match message {
        IndiMessage::Define(property) => {
            debug!("INDI def {}.{}", property.device, property.name);
            shared.lock().properties.define(property);
        }
        IndiMessage::Update(update) => {
            shared.lock().properties.update(update);
        }
        IndiMessage::Delete { device, name } => {
            debug!("INDI del {device}.{}", name.as_deref().unwrap_or("*"));
            shared.lock().properties.delete(&device, name.as_deref());
        }
        IndiMessage::Blob(blob) => {
            info!(
                "Received BLOB {}.{} ({} bytes, {})",
                blob.device,
                blob.property,
                blob.data.len(),
                blob.format
            );
            let _ = blobs.send(blob);
        }
        IndiMessage::Message { device, text, .. } => {
            if !text.is_empty() {
                info!("[{}] {}", device.as_deref().unwrap_or("indiserver"), text);
            }
        }
        IndiMessage::Ping { uid } => {
            if let Err(e) = shared.send(&encode_ping_reply(&uid)) {
                warn!("Failed to answer INDI ping: {e}");
            }
        }
    }
    shared.changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Read};
    use std::net::TcpListener;

    /// Minimal INDI server: sends `script` after reading the client's
    /// getProperties, then echoes every command back to the test.
    fn fake_server(script: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut first = String::new();
            reader.read_line(&mut first).unwrap();
            assert!(first.starts_with("<getProperties"));
            socket.write_all(script.as_bytes()).unwrap();
            let mut rest = String::new();
            let _ = reader.read_to_string(&mut rest);
            rest
        });
        (addr, handle)
    }

    #[test]
    fn test_wait_for_defined_property() {
        let (addr, server) = fake_server(
            r#"<defNumberVector device="iOptron IEQ Pro" name="GEOGRAPHIC_COORD" state="Ok"><defNumber name="LAT">51.5</defNumber><defNumber name="LONG">359.9</defNumber><defNumber name="ELEV">20</defNumber></defNumberVector>"#,
        );
        let client = IndiClient::connect(addr).unwrap();
        let prop = client
            .wait_for_property("iOptron IEQ Pro", "GEOGRAPHIC_COORD", Duration::from_secs(5))
            .unwrap();
        assert_eq!(prop.number("LAT").unwrap(), 51.5);
        assert_eq!(client.devices(), vec!["iOptron IEQ Pro".to_string()]);
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_wait_settled_skips_busy_and_reports_alert() {
        let (addr, server) = fake_server(concat!(
            r#"<defNumberVector device="ZWO EFW" name="FILTER_SLOT" state="Idle"><defNumber name="FILTER_SLOT_VALUE">1</defNumber></defNumberVector>"#,
            r#"<setNumberVector device="ZWO EFW" name="FILTER_SLOT" state="Busy"><oneNumber name="FILTER_SLOT_VALUE">1</oneNumber></setNumberVector>"#,
            r#"<setNumberVector device="ZWO EFW" name="FILTER_SLOT" state="Ok"><oneNumber name="FILTER_SLOT_VALUE">2</oneNumber></setNumberVector>"#,
            r#"<defSwitchVector device="Observatory Roof" name="ROOF_STATE" state="Idle"><defSwitch name="OPEN">Off</defSwitch></defSwitchVector>"#,
            r#"<setSwitchVector device="Observatory Roof" name="ROOF_STATE" state="Alert"/>"#,
        ));
        let client = IndiClient::connect(addr).unwrap();

        let prop = client
            .wait_settled("ZWO EFW", "FILTER_SLOT", 1, Duration::from_secs(5))
            .unwrap();
        assert_eq!(prop.number("FILTER_SLOT_VALUE").unwrap(), 2.0);

        let err = client
            .wait_settled("Observatory Roof", "ROOF_STATE", 1, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, IndiError::PropertyAlert { .. }));

        client
            .send_number("ZWO EFW", "FILTER_SLOT", &[("FILTER_SLOT_VALUE", 4.0)])
            .unwrap();
        drop(client);
        let received = server.join().unwrap();
        assert!(received.contains("<oneNumber name=\"FILTER_SLOT_VALUE\">4</oneNumber>"));
    }

    #[test]
    fn test_timeout_and_disconnect() {
        let (addr, server) = fake_server("");
        let client = IndiClient::connect(addr).unwrap();
        let err = client
            .wait_for_property("Nobody", "NOTHING", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, IndiError::Timeout { .. }));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_ping_answered_then_eof_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            socket.write_all(b"<pingRequest uid=\"42\"/>\n").unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            // dropping the socket here closes the connection
            line
        });
        let client = IndiClient::connect(addr).unwrap();

        assert_eq!(server.join().unwrap(), "<pingReply uid=\"42\"/>\n");
        let err = client
            .wait_for_property("Nobody", "NOTHING", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, IndiError::Disconnected), "{err:?}");
        assert!(!client.is_connected());
    }

    #[test]
    fn test_blob_is_forwarded() {
        let (addr, server) = fake_server(
            r#"<setBLOBVector device="Cam" name="CCD1" state="Ok"><oneBLOB name="CCD1" size="3" format=".fits">AQID</oneBLOB></setBLOBVector>"#,
        );
        let client = IndiClient::connect(addr).unwrap();
        let blob = client.recv_blob(Duration::from_secs(5)).unwrap();
        assert_eq!(blob.data, vec![1, 2, 3]);
        drop(client);
        server.join().unwrap();
    }
}
