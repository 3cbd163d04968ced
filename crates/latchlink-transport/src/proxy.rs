// ============================================
// File: crates/latchlink-transport/src/proxy.rs
// ============================================
//! # Network Proxy Transport
//!
//! ## Creation Reason
//! Reaches a lock through a radio attached to another machine (a small
//! proxy board near the door). The proxy speaks a length-prefixed frame
//! protocol over TCP; this module implements both ends of it.
//!
//! ## Main Functionality
//! - `ProxyFrame`: Frame types and their binary encoding
//! - `ProxyRadio`: `RadioTransport` client side
//! - `ProxyServer`: Proxy side, bridging TCP clients to any
//!   `RadioTransport` (normally a `DirectRadio`)
//!
//! ## Frame Format
//! ```text
//! ┌──────────────────┬──────────┬───────────────────┐
//! │ length (u32 BE)  │ kind u8  │ payload           │
//! └──────────────────┴──────────┴───────────────────┘
//! length = 1 + payload length
//!
//! ScanStart     [timeout_ms u32][service uuid utf8, may be empty]
//! Advert        [rssi i16][len][address][len][name][n]{[len][uuid]}
//! ScanDone      -
//! Connect       [address utf8]
//! Connected     [mtu u8]
//! ConnectFailed [reason utf8]
//! Write         [channel u8][data]
//! Notify        [channel u8][data]
//! Disconnect    -
//! Disconnected  [reason utf8]
//! ```
//!
//! ## Session Shape
//! One TCP stream per scan and one per link. A scan stream carries
//! `ScanStart` then `Advert* ScanDone`; a link stream carries `Connect`,
//! then `Connected` or `ConnectFailed`, then writes and notifications
//! until either side sends `Disconnect(ed)` or closes the socket.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A closed socket is a link loss and is reported as
//!   `LinkEvent::Disconnected`, exactly like a radio drop
//! - Never read frames inside `select!` directly; `read_exact` is not
//!   cancel-safe. Readers run in their own task and feed a channel
//!
//! ## Last Modified
//! v0.1.0 - Initial proxy transport implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use latchlink_common::types::DeviceAddress;

use crate::error::{Result, TransportError};
use crate::traits::{
    Advertisement, Channel, LinkEvent, LinkEventSink, RadioLink, RadioTransport, ScanFilter,
    ScanStream,
};

// ============================================
// Constants
// ============================================

/// Largest frame either side accepts.
pub const MAX_PROXY_FRAME: usize = 4096;

/// Default TCP connect and `Connect` answer timeout.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================
// ProxyFrame
// ============================================

/// One proxy protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyFrame {
    /// Start discovery.
    ScanStart {
        /// Scan duration.
        timeout: Duration,
        /// Service filter.
        service_uuid: Option<String>,
    },
    /// A discovered device.
    Advert(Advertisement),
    /// Discovery finished.
    ScanDone,
    /// Open a link.
    Connect {
        /// Device to reach.
        address: DeviceAddress,
    },
    /// Link open.
    Connected {
        /// Link MTU.
        mtu: u8,
    },
    /// Link could not be opened.
    ConnectFailed {
        /// Why.
        reason: String,
    },
    /// Controller → lock frame.
    Write {
        /// Channel.
        channel: Channel,
        /// Frame bytes.
        data: Bytes,
    },
    /// Lock → controller frame.
    Notify {
        /// Channel.
        channel: Channel,
        /// Frame bytes.
        data: Bytes,
    },
    /// Controller closes the link.
    Disconnect,
    /// Link lost on the proxy side.
    Disconnected {
        /// Why.
        reason: String,
    },
}

impl ProxyFrame {
    const SCAN_START: u8 = 1;
    const ADVERT: u8 = 2;
    const SCAN_DONE: u8 = 3;
    const CONNECT: u8 = 4;
    const CONNECTED: u8 = 5;
    const CONNECT_FAILED: u8 = 6;
    const WRITE: u8 = 7;
    const NOTIFY: u8 = 8;
    const DISCONNECT: u8 = 9;
    const DISCONNECTED: u8 = 10;

    const fn kind(&self) -> u8 {
        match self {
            Self::ScanStart { .. } => Self::SCAN_START,
            Self::Advert(_) => Self::ADVERT,
            Self::ScanDone => Self::SCAN_DONE,
            Self::Connect { .. } => Self::CONNECT,
            Self::Connected { .. } => Self::CONNECTED,
            Self::ConnectFailed { .. } => Self::CONNECT_FAILED,
            Self::Write { .. } => Self::WRITE,
            Self::Notify { .. } => Self::NOTIFY,
            Self::Disconnect => Self::DISCONNECT,
            Self::Disconnected { .. } => Self::DISCONNECTED,
        }
    }

    /// Encodes the frame including its length prefix.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut payload = BytesMut::new();
        match self {
            Self::ScanStart {
                timeout,
                service_uuid,
            } => {
                payload.put_u32(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
                if let Some(uuid) = service_uuid {
                    payload.put_slice(uuid.as_bytes());
                }
            }
            Self::Advert(advert) => {
                payload.put_i16(advert.rssi);
                put_short_str(&mut payload, advert.address.as_str());
                put_short_str(&mut payload, advert.name.as_deref().unwrap_or(""));
                let count = advert.service_uuids.len().min(usize::from(u8::MAX));
                payload.put_u8(u8::try_from(count).unwrap_or(u8::MAX));
                for uuid in advert.service_uuids.iter().take(count) {
                    put_short_str(&mut payload, uuid);
                }
            }
            Self::Connect { address } => payload.put_slice(address.as_str().as_bytes()),
            Self::Connected { mtu } => payload.put_u8(*mtu),
            Self::ConnectFailed { reason } | Self::Disconnected { reason } => {
                payload.put_slice(reason.as_bytes());
            }
            Self::Write { channel, data } | Self::Notify { channel, data } => {
                payload.put_u8(channel.as_byte());
                payload.put_slice(data);
            }
            Self::ScanDone | Self::Disconnect => {}
        }

        let mut frame = BytesMut::with_capacity(5 + payload.len());
        frame.put_u32(u32::try_from(payload.len() + 1).unwrap_or(u32::MAX));
        frame.put_u8(self.kind());
        frame.put_slice(&payload);
        frame
    }

    /// Decodes a frame body (kind already split off).
    ///
    /// # Errors
    /// `Proxy` for unknown kinds or malformed payloads.
    pub fn decode(kind: u8, mut payload: Bytes) -> Result<Self> {
        let frame = match kind {
            Self::SCAN_START => {
                need(&payload, 4)?;
                let timeout = Duration::from_millis(u64::from(payload.get_u32()));
                let uuid = utf8(&payload)?;
                Self::ScanStart {
                    timeout,
                    service_uuid: (!uuid.is_empty()).then_some(uuid),
                }
            }
            Self::ADVERT => {
                need(&payload, 2)?;
                let rssi = payload.get_i16();
                let address = DeviceAddress::new(get_short_str(&mut payload)?);
                let name = get_short_str(&mut payload)?;
                need(&payload, 1)?;
                let count = payload.get_u8();
                let service_uuids = (0..count)
                    .map(|_| get_short_str(&mut payload))
                    .collect::<Result<Vec<_>>>()?;
                Self::Advert(Advertisement {
                    address,
                    name: (!name.is_empty()).then_some(name),
                    rssi,
                    service_uuids,
                })
            }
            Self::SCAN_DONE => Self::ScanDone,
            Self::CONNECT => Self::Connect {
                address: DeviceAddress::new(utf8(&payload)?),
            },
            Self::CONNECTED => {
                need(&payload, 1)?;
                Self::Connected {
                    mtu: payload.get_u8(),
                }
            }
            Self::CONNECT_FAILED => Self::ConnectFailed {
                reason: utf8(&payload)?,
            },
            Self::WRITE | Self::NOTIFY => {
                need(&payload, 1)?;
                let byte = payload.get_u8();
                let channel = Channel::from_byte(byte)
                    .ok_or_else(|| TransportError::proxy(format!("unknown channel {byte}")))?;
                if kind == Self::WRITE {
                    Self::Write {
                        channel,
                        data: payload,
                    }
                } else {
                    Self::Notify {
                        channel,
                        data: payload,
                    }
                }
            }
            Self::DISCONNECT => Self::Disconnect,
            Self::DISCONNECTED => Self::Disconnected {
                reason: utf8(&payload)?,
            },
            other => return Err(TransportError::proxy(format!("unknown frame kind {other}"))),
        };
        Ok(frame)
    }
}

fn need(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(TransportError::proxy(format!(
            "truncated frame: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn utf8(buf: &[u8]) -> Result<String> {
    String::from_utf8(buf.to_vec()).map_err(|_| TransportError::proxy("invalid utf-8"))
}

fn put_short_str(buf: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(usize::from(u8::MAX))];
    buf.put_u8(u8::try_from(bytes.len()).unwrap_or(u8::MAX));
    buf.put_slice(bytes);
}

fn get_short_str(buf: &mut Bytes) -> Result<String> {
    need(buf, 1)?;
    let len = usize::from(buf.get_u8());
    need(buf, len)?;
    let s = utf8(&buf[..len])?;
    buf.advance(len);
    Ok(s)
}

/// Reads one frame; `Ok(None)` on a clean end of stream.
///
/// # Errors
/// `Io` on socket errors, `Proxy` on oversized or malformed frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<ProxyFrame>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TransportError::io("reading proxy frame length", e)),
    }
    let len = u32::from_be_bytes(len) as usize;
    if len == 0 || len > MAX_PROXY_FRAME {
        return Err(TransportError::proxy(format!("bad frame length {len}")));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| TransportError::io("reading proxy frame body", e))?;
    let mut body = Bytes::from(body);
    let kind = body.get_u8();
    ProxyFrame::decode(kind, body).map(Some)
}

/// Writes one frame.
///
/// # Errors
/// `Io` on socket errors.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &ProxyFrame) -> Result<()> {
    writer
        .write_all(&frame.encode())
        .await
        .map_err(|e| TransportError::io("writing proxy frame", e))
}

/// Spawns a task turning a read half into a frame channel, ending with
/// `None` on close or error.
fn spawn_reader(mut reader: OwnedReadHalf) -> (mpsc::UnboundedReceiver<Result<ProxyFrame>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if tx.send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    (rx, task)
}

// ============================================
// ProxyRadio (client side)
// ============================================

/// Transport through a network proxy.
#[derive(Debug, Clone)]
pub struct ProxyRadio {
    endpoint: String,
    timeout: Duration,
}

impl ProxyRadio {
    /// Creates a transport for the proxy at `endpoint` (`host:port`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }

    /// Sets the connect and answer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn open(&self) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| TransportError::timeout(format!("connecting to proxy {}", self.endpoint)))?
            .map_err(|e| {
                TransportError::adapter_unavailable(format!("proxy {} unreachable: {e}", self.endpoint))
            })?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }
}

#[async_trait]
impl RadioTransport for ProxyRadio {
    fn kind(&self) -> &'static str {
        "proxy"
    }

    async fn scan(&self, filter: ScanFilter) -> Result<ScanStream> {
        let mut stream = self.open().await?;
        write_frame(
            &mut stream,
            &ProxyFrame::ScanStart {
                timeout: filter.timeout,
                service_uuid: filter.service_uuid.clone(),
            },
        )
        .await?;

        let (tx, scan) = ScanStream::channel(filter.clone());
        let deadline = filter.timeout;
        tokio::spawn(async move {
            let relay = async {
                loop {
                    match read_frame(&mut stream).await {
                        Ok(Some(ProxyFrame::Advert(advert))) => {
                            if tx.send(advert).await.is_err() {
                                break;
                            }
                        }
                        Ok(Some(ProxyFrame::ScanDone) | None) => break,
                        Ok(Some(other)) => {
                            warn!(?other, "Unexpected frame during proxy scan");
                            break;
                        }
                        Err(e) => {
                            debug!(error = %e, "Proxy scan ended");
                            break;
                        }
                    }
                }
            };
            let _ = tokio::time::timeout(deadline, relay).await;
        });
        Ok(scan)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn RadioLink>> {
        let mut stream = self.open().await?;
        write_frame(
            &mut stream,
            &ProxyFrame::Connect {
                address: address.clone(),
            },
        )
        .await?;

        let answer = tokio::time::timeout(self.timeout, read_frame(&mut stream))
            .await
            .map_err(|_| TransportError::timeout(format!("proxy connect to {address}")))??;
        let mtu = match answer {
            Some(ProxyFrame::Connected { mtu }) => mtu,
            Some(ProxyFrame::ConnectFailed { reason }) => {
                return Err(TransportError::connect_failed(address, reason));
            }
            None => return Err(TransportError::connect_failed(address, "proxy closed connection")),
            Some(other) => {
                return Err(TransportError::proxy(format!("expected Connected, got {other:?}")));
            }
        };
        info!(%address, endpoint = %self.endpoint, mtu, "Proxy link established");

        let (reader, writer) = stream.into_split();
        Ok(Box::new(ProxyLink {
            address: address.clone(),
            mtu,
            writer: tokio::sync::Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            connected: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(None),
        }))
    }
}

// ============================================
// ProxyLink
// ============================================

struct ProxyLink {
    address: DeviceAddress,
    mtu: u8,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: Mutex<Option<OwnedReadHalf>>,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl RadioLink for ProxyLink {
    fn address(&self) -> &DeviceAddress {
        &self.address
    }

    fn mtu(&self) -> u8 {
        self.mtu
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, channel: Channel, data: &[u8]) -> Result<()> {
        if channel == Channel::Notification {
            return Err(TransportError::InvalidChannel(channel));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let frame = ProxyFrame::Write {
            channel,
            data: Bytes::copy_from_slice(data),
        };
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame)
            .await
            .map_err(|e| TransportError::write_failed(e.to_string()))
    }

    fn subscribe(&self, sink: LinkEventSink) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| TransportError::proxy("link already subscribed"))?;
        let (mut frames, reader_task) = spawn_reader(reader);
        let connected = Arc::clone(&self.connected);
        let address = self.address.clone();

        let task = tokio::spawn(async move {
            let reason = loop {
                match frames.recv().await {
                    Some(Ok(ProxyFrame::Notify { channel, data })) => {
                        if sink.send(LinkEvent::Frame { channel, data }).is_err() {
                            break None;
                        }
                    }
                    Some(Ok(ProxyFrame::Disconnected { reason })) => break Some(reason),
                    Some(Ok(other)) => debug!(%address, ?other, "Ignoring proxy frame"),
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("proxy closed connection".to_string()),
                }
            };
            reader_task.abort();
            if connected.swap(false, Ordering::SeqCst) {
                if let Some(reason) = reason {
                    let _ = sink.send(LinkEvent::Disconnected { reason });
                }
            }
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(address = %self.address, "Disconnecting proxy link");
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &ProxyFrame::Disconnect).await.ok();
            writer.shutdown().await.ok();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ProxyLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

// ============================================
// ProxyServer (proxy side)
// ============================================

/// Serves the proxy protocol on top of a local transport.
#[derive(Clone)]
pub struct ProxyServer {
    transport: Arc<dyn RadioTransport>,
}

impl ProxyServer {
    /// Creates a server bridging to `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn RadioTransport>) -> Self {
        Self { transport }
    }

    /// Accepts clients until the listener fails.
    ///
    /// # Errors
    /// `Io` if accepting fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, backend = self.transport.kind(), "Proxy listening");
        }
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| TransportError::io("accepting proxy client", e))?;
            stream.set_nodelay(true).ok();
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = handle_client(transport, stream).await {
                    debug!(%peer, error = %e, "Proxy client ended with error");
                }
            });
        }
    }
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("backend", &self.transport.kind())
            .finish()
    }
}

async fn handle_client(transport: Arc<dyn RadioTransport>, stream: TcpStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (mut frames, reader_task) = spawn_reader(reader);

    let result = match frames.recv().await {
        Some(Ok(ProxyFrame::ScanStart {
            timeout,
            service_uuid,
        })) => {
            let filter = ScanFilter {
                service_uuid,
                address: None,
                timeout,
            };
            match transport.scan(filter).await {
                Ok(mut scan) => {
                    while let Some(advert) = scan.next().await {
                        write_frame(&mut writer, &ProxyFrame::Advert(advert)).await?;
                    }
                }
                Err(e) => debug!(error = %e, "Proxy scan failed"),
            }
            write_frame(&mut writer, &ProxyFrame::ScanDone).await
        }
        Some(Ok(ProxyFrame::Connect { address })) => match transport.connect(&address).await {
            Ok(link) => bridge(link, &mut frames, &mut writer).await,
            Err(e) => {
                write_frame(
                    &mut writer,
                    &ProxyFrame::ConnectFailed {
                        reason: e.to_string(),
                    },
                )
                .await
            }
        },
        Some(Ok(other)) => Err(TransportError::proxy(format!("unexpected opening frame {other:?}"))),
        Some(Err(e)) => Err(e),
        None => Ok(()),
    };
    reader_task.abort();
    result
}

async fn bridge(
    link: Box<dyn RadioLink>,
    frames: &mut mpsc::UnboundedReceiver<Result<ProxyFrame>>,
    writer: &mut OwnedWriteHalf,
) -> Result<()> {
    let (tx, mut events) = mpsc::unbounded_channel();
    link.subscribe(tx)?;
    write_frame(writer, &ProxyFrame::Connected { mtu: link.mtu() }).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::Frame { channel, data }) => {
                    write_frame(writer, &ProxyFrame::Notify { channel, data }).await?;
                }
                Some(LinkEvent::Disconnected { reason }) => {
                    write_frame(writer, &ProxyFrame::Disconnected { reason }).await?;
                    return Ok(());
                }
                None => return Ok(()),
            },
            frame = frames.recv() => match frame {
                Some(Ok(ProxyFrame::Write { channel, data })) => {
                    if let Err(e) = link.write(channel, &data).await {
                        debug!(error = %e, "Bridged write failed");
                    }
                }
                Some(Ok(ProxyFrame::Disconnect)) | Some(Err(_)) | None => {
                    link.disconnect().await.ok();
                    return Ok(());
                }
                Some(Ok(other)) => debug!(?other, "Ignoring frame from proxy client"),
            },
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::{notify_characteristic, DirectRadio, MockHost, CHAR_COMMANDS};

    async fn start_proxy(host: &MockHost) -> ProxyRadio {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ProxyServer::new(Arc::new(DirectRadio::new(Arc::new(host.clone()))));
        tokio::spawn(server.serve(listener));
        ProxyRadio::new(addr.to_string()).with_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_advert_frame_layout() {
        let frame = ProxyFrame::Advert(Advertisement {
            address: "AA:01".into(),
            name: Some("Lock".into()),
            rssi: -61,
            service_uuids: vec!["1234".into()],
        });
        let mut encoded = frame.encode().freeze();
        assert_eq!(encoded.get_u32() as usize, encoded.len());
        let kind = encoded.get_u8();
        assert_eq!(ProxyFrame::decode(kind, encoded).unwrap(), frame);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(ProxyFrame::decode(99, Bytes::new()).is_err());
        assert!(ProxyFrame::decode(ProxyFrame::WRITE, Bytes::from_static(&[7, 1])).is_err());
        assert!(ProxyFrame::decode(ProxyFrame::ADVERT, Bytes::from_static(&[0, 1, 5])).is_err());
    }

    #[tokio::test]
    async fn test_proxy_link_roundtrip() {
        let host = MockHost::new();
        let mut peripheral = host.add_peripheral("aa:01", "Lock", vec![]);
        let radio = start_proxy(&host).await;

        let link = radio.connect(&"aa:01".into()).await.unwrap();
        assert_eq!(link.mtu(), 200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.subscribe(tx).unwrap();
        let mut lock_side = peripheral.accept().await.unwrap();

        link.write(Channel::Command, b"cmd").await.unwrap();
        let write = lock_side.next_write().await.unwrap();
        assert_eq!(write.characteristic, CHAR_COMMANDS);
        assert_eq!(&write.data[..], b"cmd");

        assert!(lock_side.notify(notify_characteristic(Channel::Command), b"resp"));
        assert_eq!(
            rx.recv().await.unwrap(),
            LinkEvent::Frame {
                channel: Channel::Command,
                data: Bytes::from_static(b"resp")
            }
        );

        lock_side.drop_link("lock went to sleep");
        assert!(matches!(
            rx.recv().await.unwrap(),
            LinkEvent::Disconnected { reason } if reason == "lock went to sleep"
        ));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_proxy_connect_failure_and_scan() {
        let host = MockHost::new();
        let _peripheral = host.add_peripheral("aa:01", "Lock", vec!["abcd".into()]);
        let radio = start_proxy(&host).await;

        assert!(matches!(
            radio.connect(&"aa:02".into()).await,
            Err(TransportError::ConnectFailed { .. })
        ));

        let found = radio
            .scan(ScanFilter::new(Duration::from_secs(2)))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_uuids, vec!["abcd".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let radio = ProxyRadio::new(addr.to_string());
        assert!(matches!(
            radio.connect(&"aa:01".into()).await,
            Err(TransportError::AdapterUnavailable { .. })
        ));
    }
}
