// lib.rs - EtherNet/IP explicit-messaging client for Logix-family PLCs
// =========================================================================
//
// Implements the ENIP encapsulation layer over TCP and the CIP services
// needed to work with named controller tags: session registration,
// ForwardOpen/ForwardClose connected messaging, symbolic tag reads and
// writes (including single-bit read-modify-write), multi-service reads,
// tag-directory enumeration and the controller wall clock.

//! # logix-eip
//!
//! An EtherNet/IP (CIP) client for Allen-Bradley Logix-family PLCs
//! (CompactLogix / ControlLogix). One client owns one TCP session; all
//! operations are strictly serialized request/reply pairs over a single
//! CIP class-3 connection.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use logix_eip::{EipClient, EipConfig, PlcValue};
//!
//! #[tokio::main]
//! async fn main() -> logix_eip::Result<()> {
//!     // Port 44818 is appended when the address has none.
//!     let config = EipConfig::new("192.168.1.10").with_slot(0);
//!     let mut client = EipClient::connect(config).await?;
//!
//!     client.write("SetPoint", PlcValue::Dint(1500)).await?;
//!     let value = client.read("SetPoint").await?;
//!     println!("SetPoint = {:?}", value);
//!
//!     // Terminal `.N` addresses a single bit of an integer tag.
//!     client.write("Program:MainProgram.first.1", PlcValue::Bool(true)).await?;
//!
//!     for tag in client.get_tag_list().await? {
//!         println!("{} (type 0x{:02X})", tag.name, tag.data_type);
//!     }
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tag expressions
//!
//! - `SetPoint` — controller-scoped tag
//! - `Program:MainProgram.first` — program-scoped tag
//! - `MyArr[3]` — array element (8/16/32-bit element segments are chosen
//!   by subscript size)
//! - `Flags.15` — bit 15 of an integer tag; reads decode to `Bool`, writes
//!   go through the read-modify-write service
//!
//! Multi-dimensional subscripts (`[i,j]`) are rejected; their path
//! encoding is not confirmed against real controllers.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;
use tracing::{debug, warn};

pub mod cip;
pub mod codec;
mod context;
pub mod error;
pub mod tag_path;
pub mod transport;

pub use error::{cip_status_text, EtherNetIpError, Result};
pub use tag_path::ParsedTag;
pub use transport::{
    TcpTransport, Transport, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT,
};

use context::{SENDER_CONTEXT, SENDER_CONTEXT_LEN};
use error::cip_error;

/// Encapsulation header length; every reply is at least this long.
const ENCAP_HEADER_LEN: usize = 24;
/// Absolute offset of the CIP general status byte in a connected reply.
const STATUS_OFFSET: usize = 48;
/// Absolute offset of the CIP reply payload (type code onward).
const PAYLOAD_OFFSET: usize = 50;
/// Absolute offset of the multi-service reply offset table.
const MULTI_TABLE_OFFSET: usize = 52;
/// Absolute offset of the wall-clock value in a Get Attribute Single reply.
const TIME_PAYLOAD_OFFSET: usize = 56;
/// Absolute offset of the O→T connection id in a ForwardOpen reply.
const FORWARD_OPEN_CID_OFFSET: usize = 44;
/// Absolute offset of the session handle in a RegisterSession reply.
const SESSION_HANDLE_OFFSET: usize = 4;

/// The sequence counter wraps at this bound.
const SEQUENCE_MODULUS: u16 = 10_000;

/// A value read from or written to a PLC tag.
///
/// Integer-family reads decode to the **unsigned** variant of the tag's
/// width (matching what the plain read service puts on the wire); the
/// signed variants exist so writes can express negative values, which are
/// range-checked against the target type.
#[derive(Debug, Clone, PartialEq)]
pub enum PlcValue {
    /// Boolean value (single bit).
    Bool(bool),
    /// 8-bit signed integer.
    Sint(i8),
    /// 16-bit signed integer.
    Int(i16),
    /// 32-bit signed integer.
    Dint(i32),
    /// 64-bit signed integer.
    Lint(i64),
    /// 8-bit unsigned integer.
    Usint(u8),
    /// 16-bit unsigned integer.
    Uint(u16),
    /// 32-bit unsigned integer.
    Udint(u32),
    /// 64-bit unsigned integer.
    Ulint(u64),
    /// 32-bit IEEE 754 float.
    Real(f32),
    /// 64-bit IEEE 754 float.
    Lreal(f64),
    /// ASCII string (Logix STRING, up to 82 characters).
    String(String),
}

impl PlcValue {
    /// The CIP type code this value maps to on the wire.
    pub fn type_code(&self) -> u8 {
        match self {
            PlcValue::Bool(_) => cip::TYPE_BOOL,
            PlcValue::Sint(_) => cip::TYPE_SINT,
            PlcValue::Int(_) => cip::TYPE_INT,
            PlcValue::Dint(_) => cip::TYPE_DINT,
            PlcValue::Lint(_) => cip::TYPE_LINT,
            PlcValue::Usint(_) => cip::TYPE_USINT,
            PlcValue::Uint(_) => cip::TYPE_UINT,
            PlcValue::Udint(_) => cip::TYPE_UDINT,
            PlcValue::Ulint(_) => cip::TYPE_LWORD,
            PlcValue::Real(_) => cip::TYPE_REAL,
            PlcValue::Lreal(_) => cip::TYPE_LREAL,
            PlcValue::String(_) => cip::TYPE_STRUCT,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            PlcValue::Sint(v) => Some(i128::from(*v)),
            PlcValue::Int(v) => Some(i128::from(*v)),
            PlcValue::Dint(v) => Some(i128::from(*v)),
            PlcValue::Lint(v) => Some(i128::from(*v)),
            PlcValue::Usint(v) => Some(i128::from(*v)),
            PlcValue::Uint(v) => Some(i128::from(*v)),
            PlcValue::Udint(v) => Some(i128::from(*v)),
            PlcValue::Ulint(v) => Some(i128::from(*v)),
            _ => None,
        }
    }
}

/// A symbol returned by the tag-directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Symbol name; prefixed with `"<program>."` for program-scoped tags.
    pub name: String,
    /// Symbol Object instance id the symbol was reported under.
    pub offset: u16,
    /// CIP type code of the tag.
    pub data_type: u8,
}

/// Session lifecycle states.
///
/// Operations are only permitted in [`SessionStatus::Open`]; transport and
/// framing errors drive the machine to `Closed`, from which only a new
/// [`EipClient::connect`] recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Constructed, nothing sent yet.
    Unopened,
    /// RegisterSession in flight.
    Registering,
    /// ForwardOpen in flight.
    Opening,
    /// Connected messaging available.
    Open,
    /// Teardown in progress.
    Closing,
    /// Terminal state.
    Closed,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct EipConfig {
    /// `host` or `host:port`; port 44818 is appended when absent.
    pub address: String,
    /// Backplane slot of the CPU (0 is typical).
    pub slot: u8,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Idle period after which the transport closes the socket.
    pub idle_timeout: Duration,
}

impl EipConfig {
    /// Configuration with the default timeouts and slot 0.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            slot: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets the CPU backplane slot.
    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    /// Sets the per-request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the idle-close period.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Per-connection protocol state. Everything lives here; the crate keeps
/// no process-wide mutable state, so independent clients never disturb
/// each other's counters.
#[derive(Debug)]
struct SessionState {
    session_handle: u32,
    ot_connection_id: u32,
    processor_slot: u8,
    vendor_id: u16,
    originator_serial: u32,
    connection_serial: u16,
    sequence_counter: u16,
    context_pointer: u8,
    offset: u32,
    known_tags: HashMap<String, u8>,
    program_names: BTreeSet<String>,
}

impl SessionState {
    fn new(slot: u8) -> Self {
        Self {
            session_handle: 0,
            ot_connection_id: 0,
            processor_slot: slot,
            vendor_id: 1,
            originator_serial: 42,
            connection_serial: 0,
            sequence_counter: 1,
            context_pointer: 0,
            offset: 0,
            known_tags: HashMap::new(),
            program_names: BTreeSet::new(),
        }
    }
}

/// EtherNet/IP client bound to a single transport.
///
/// The client owns all mutable session state; requests are serialized by
/// `&mut self`, matching the protocol's one-outstanding-request model (a
/// single O→T connection id and sequence counter leave no room for
/// pipelining).
pub struct EipClient {
    transport: Box<dyn Transport>,
    state: SessionState,
    status: SessionStatus,
}

impl std::fmt::Debug for EipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EipClient")
            .field("state", &self.state)
            .field("status", &self.status)
            .finish()
    }
}

impl EipClient {
    /// Connects over TCP, registers the session and opens the class-3
    /// connection.
    ///
    /// Any failure during bring-up closes the transport and returns the
    /// underlying error.
    pub async fn connect(config: EipConfig) -> Result<Self> {
        let transport = TcpTransport::connect(
            &config.address,
            config.request_timeout,
            config.idle_timeout,
        )
        .await?;
        Self::with_transport(Box::new(transport), config.slot).await
    }

    /// Runs the session handshake over a caller-supplied transport.
    ///
    /// This is how recorded-replay transports are plugged in for tests; it
    /// behaves exactly like [`EipClient::connect`] otherwise.
    pub async fn with_transport(transport: Box<dyn Transport>, slot: u8) -> Result<Self> {
        let mut client = Self {
            transport,
            state: SessionState::new(slot),
            status: SessionStatus::Unopened,
        };
        if let Err(e) = client.open().await {
            client.status = SessionStatus::Closed;
            let _ = client.transport.close().await;
            return Err(e);
        }
        client.status = SessionStatus::Open;
        Ok(client)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    async fn open(&mut self) -> Result<()> {
        self.status = SessionStatus::Registering;
        let frame = self.register_session_request();
        let reply = self.exchange(frame).await?;
        self.state.session_handle = codec::read_u32(&reply, SESSION_HANDLE_OFFSET)?;
        debug!(session_handle = self.state.session_handle, "session registered");

        self.status = SessionStatus::Opening;
        let frame = self.forward_open_request();
        let reply = self.exchange(frame).await?;
        self.state.ot_connection_id = codec::read_u32(&reply, FORWARD_OPEN_CID_OFFSET)?;
        debug!(
            connection_id = self.state.ot_connection_id,
            "class-3 connection open"
        );
        Ok(())
    }

    /// Reads a tag.
    ///
    /// The tag's CIP type is resolved from the session cache or probed
    /// with a fragmented read on first contact. Integer tags decode to the
    /// unsigned variant of their width; a terminal bit index decodes to
    /// [`PlcValue::Bool`].
    pub async fn read(&mut self, tag: &str) -> Result<PlcValue> {
        let result = self.read_inner(tag).await;
        self.seal(result)
    }

    async fn read_inner(&mut self, tag: &str) -> Result<PlcValue> {
        self.ensure_open()?;
        let parsed = tag_path::parse(tag)?;
        let data_type = self.resolve_data_type(&parsed).await?;
        let info = cip::lookup(data_type).ok_or_else(|| {
            EtherNetIpError::Decode(format!(
                "tag '{}' has unknown CIP type code 0x{:02X}",
                tag, data_type
            ))
        })?;

        let elements: u16 = match tag_path::bit_index(tag) {
            Some(pos) if info.width > 0 => {
                let pos = u32::from(pos);
                let bits = u32::from(info.width) * 8;
                let mut n = (pos + bits) / bits;
                if pos + 1 > 32 {
                    n += 1;
                }
                n as u16
            }
            _ => 1,
        };

        let ioi = tag_path::build_ioi(tag, data_type == cip::TYPE_DWORD)?;
        let frame = self.read_request(&ioi, elements);
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        // Status 6 on a scalar read means the value continues beyond this
        // frame; the leading element is still intact.
        if status != 0 && status != 6 {
            return Err(cip_error(status));
        }
        let payload = reply
            .get(PAYLOAD_OFFSET..)
            .ok_or_else(|| EtherNetIpError::Frame("read reply ends before payload".to_string()))?;
        self.parse_value(tag, payload)
    }

    /// Writes a value to a tag.
    ///
    /// Values must be losslessly representable in the tag's CIP type;
    /// anything else is a [`EtherNetIpError::Coercion`] error. Terminal
    /// bit indices (and `DWORD` bit-array elements) take a
    /// [`PlcValue::Bool`] and go through the masked read-modify-write
    /// service.
    pub async fn write(&mut self, tag: &str, value: PlcValue) -> Result<()> {
        let result = self.write_inner(tag, &value).await;
        self.seal(result)
    }

    async fn write_inner(&mut self, tag: &str, value: &PlcValue) -> Result<()> {
        self.ensure_open()?;
        let parsed = tag_path::parse(tag)?;
        let data_type = self.resolve_data_type(&parsed).await?;

        let cip_request = if let Some(bit) = tag_path::bit_index(tag) {
            let set = require_bool(value, "bit writes")?;
            let info = cip::lookup(data_type).ok_or_else(|| {
                EtherNetIpError::Decode(format!(
                    "tag '{}' has unknown CIP type code 0x{:02X}",
                    tag, data_type
                ))
            })?;
            let ioi = tag_path::build_ioi(tag, false)?;
            build_write_bit_cip(&ioi, info.width, u32::from(bit), set)?
        } else if data_type == cip::TYPE_DWORD && tag.ends_with(']') {
            // BOOL-array element: address the containing 32-bit word and
            // flip one bit of it.
            let set = require_bool(value, "BOOL-array element writes")?;
            let ioi = tag_path::build_ioi(tag, true)?;
            build_write_bit_cip(&ioi, 4, parsed.index % 32, set)?
        } else {
            let ioi = tag_path::build_ioi(tag, false)?;
            build_write_cip(data_type, &ioi, value)?
        };

        let frame = self.send_unit_data(&cip_request);
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        if status != 0 {
            return Err(cip_error(status));
        }
        Ok(())
    }

    /// Reads several tags in one Multiple Service Packet.
    ///
    /// The PLC evaluates the whole packet server-side; a failing sub-reply
    /// fails the call. Returns a map keyed by the tag expressions passed
    /// in.
    pub async fn multi_read(&mut self, tags: &[&str]) -> Result<HashMap<String, PlcValue>> {
        let result = self.multi_read_inner(tags).await;
        self.seal(result)
    }

    async fn multi_read_inner(&mut self, tags: &[&str]) -> Result<HashMap<String, PlcValue>> {
        self.ensure_open()?;
        if tags.is_empty() {
            return Ok(HashMap::new());
        }

        let frame = self.multi_read_request(tags)?;
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        // 0x1E means one or more embedded services failed; the per-reply
        // status bytes below say which.
        if status != 0 && status != 0x1E {
            return Err(cip_error(status));
        }

        let table = reply.get(MULTI_TABLE_OFFSET..).ok_or_else(|| {
            EtherNetIpError::Frame("multi-service reply ends before offset table".to_string())
        })?;

        let mut values = HashMap::with_capacity(tags.len());
        for (i, tag) in tags.iter().enumerate() {
            let offset = codec::read_u16(table, i * 2)? as usize;
            let sub_status = codec::read_u8(table, offset)?;
            let extended = codec::read_u8(table, offset + 1)?;
            if sub_status != 0 || extended != 0 {
                return Err(cip_error(sub_status));
            }
            let payload = table.get(offset + 2..).ok_or_else(|| {
                EtherNetIpError::Frame(format!("sub-reply {} ends before payload", i))
            })?;
            let value = self.parse_value(tag, payload)?;
            values.insert((*tag).to_string(), value);
        }
        Ok(values)
    }

    /// Enumerates the controller's tag directory, then every discovered
    /// `Program:` scope.
    ///
    /// Large directories stream across several replies; the walk re-issues
    /// the request from the last-seen instance id (the PLC decides what
    /// "next" means) until the status byte stops signalling a partial
    /// transfer. Discovered types pre-populate the data-type cache.
    pub async fn get_tag_list(&mut self) -> Result<Vec<Tag>> {
        let result = self.get_tag_list_inner().await;
        self.seal(result)
    }

    async fn get_tag_list_inner(&mut self) -> Result<Vec<Tag>> {
        self.ensure_open()?;
        let mut tags = self.walk_tag_scope("").await?;
        let programs: Vec<String> = self.state.program_names.iter().cloned().collect();
        for program in programs {
            let scoped = self.walk_tag_scope(&program).await?;
            tags.extend(scoped);
        }
        debug!(count = tags.len(), "tag directory walk complete");
        Ok(tags)
    }

    async fn walk_tag_scope(&mut self, program: &str) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        self.state.offset = 0;
        loop {
            let frame = self.tag_list_request(program);
            let reply = self.exchange(frame).await?;
            let status = codec::read_u8(&reply, STATUS_OFFSET)?;
            if status != 0 && status != 6 {
                return Err(cip_error(status));
            }
            self.collect_symbols(&reply, program, &mut tags)?;
            if status != 6 {
                break;
            }
            // Pace fragmented directory walks; controllers dislike being
            // hammered while streaming the symbol table.
            sleep(Duration::from_millis(250)).await;
        }
        Ok(tags)
    }

    fn collect_symbols(&mut self, reply: &[u8], program: &str, out: &mut Vec<Tag>) -> Result<()> {
        let mut pos = PAYLOAD_OFFSET;
        while pos < reply.len() {
            let name_len = codec::read_u16(reply, pos + 8)? as usize;
            let record = codec::read_bytes(reply, pos, name_len + 10)?;
            let instance = codec::read_u16(record, 0)?;
            let data_type = record[4];
            let mut name = String::from_utf8_lossy(&record[10..]).into_owned();
            if !program.is_empty() {
                name = format!("{}.{}", program, name);
            }

            self.state.offset = u32::from(instance);
            if program.is_empty() && name.contains("Program:") {
                self.state.program_names.insert(name.clone());
            }
            self.state.known_tags.entry(name.clone()).or_insert(data_type);
            out.push(Tag {
                name,
                offset: instance,
                data_type,
            });
            pos += name_len + 10;
        }
        Ok(())
    }

    /// Reads the controller wall clock (UTC, microsecond resolution).
    pub async fn get_plc_time(&mut self) -> Result<SystemTime> {
        let result = self.get_plc_time_inner().await;
        self.seal(result)
    }

    async fn get_plc_time_inner(&mut self) -> Result<SystemTime> {
        self.ensure_open()?;
        let frame = self.plc_time_request(None);
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        if status != 0 {
            return Err(cip_error(status));
        }
        let micros = codec::read_u64(&reply, TIME_PAYLOAD_OFFSET)?;
        Ok(UNIX_EPOCH + Duration::from_micros(micros))
    }

    /// Sets the controller wall clock (UTC, microsecond resolution).
    pub async fn set_plc_time(&mut self, time: SystemTime) -> Result<()> {
        let result = self.set_plc_time_inner(time).await;
        self.seal(result)
    }

    async fn set_plc_time_inner(&mut self, time: SystemTime) -> Result<()> {
        self.ensure_open()?;
        let micros = time
            .duration_since(UNIX_EPOCH)
            .map_err(|_| {
                EtherNetIpError::Coercion(
                    "timestamps before the Unix epoch are not representable".to_string(),
                )
            })?
            .as_micros();
        let micros = u64::try_from(micros).map_err(|_| {
            EtherNetIpError::Coercion("timestamp exceeds the 64-bit microsecond range".to_string())
        })?;
        let frame = self.plc_time_request(Some(micros));
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        if status != 0 {
            return Err(cip_error(status));
        }
        Ok(())
    }

    /// Tears the session down: ForwardClose, UnregisterSession, transport
    /// close. Teardown errors are logged and swallowed; calling `stop` on
    /// a closed client is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status == SessionStatus::Closed {
            return Ok(());
        }
        self.status = SessionStatus::Closing;

        let frame = self.forward_close_request();
        if let Err(e) = self.transport.send(&frame).await {
            warn!(error = %e, "forward close failed during teardown");
        }
        let frame = self.unregister_session_request();
        if let Err(e) = self.transport.send(&frame).await {
            warn!(error = %e, "unregister session failed during teardown");
        }
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed during teardown");
        }
        self.status = SessionStatus::Closed;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Session plumbing
    // ---------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.status == SessionStatus::Open {
            Ok(())
        } else {
            Err(EtherNetIpError::Session(format!(
                "operation requires an open session (state: {:?})",
                self.status
            )))
        }
    }

    /// Marks the session closed when a fatal error escapes an operation.
    fn seal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.status != SessionStatus::Closed {
                warn!(error = %e, "fatal error, session closed");
                self.status = SessionStatus::Closed;
            }
        }
        result
    }

    async fn exchange(&mut self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let reply = match self.transport.send(&frame).await {
            Ok(reply) => reply,
            Err(e) => {
                self.status = SessionStatus::Closed;
                return Err(e);
            }
        };
        if reply.len() < ENCAP_HEADER_LEN {
            return Err(EtherNetIpError::Frame(format!(
                "reply shorter than encapsulation header: {} bytes",
                reply.len()
            )));
        }
        let encap_status = codec::read_u32(&reply, 8)?;
        if encap_status != 0 {
            return Err(EtherNetIpError::Frame(format!(
                "encapsulation status 0x{:08X}",
                encap_status
            )));
        }
        Ok(reply)
    }

    /// Resolves a tag's CIP type from the cache, probing the PLC with a
    /// fragmented read on first contact. The cache key is the parsed base
    /// name, so `Flags`, `Flags.3` and `Flags[2]` share one entry.
    async fn resolve_data_type(&mut self, parsed: &ParsedTag) -> Result<u8> {
        if let Some(&data_type) = self.state.known_tags.get(&parsed.base) {
            return Ok(data_type);
        }
        debug!(tag = %parsed.full, "probing data type with fragmented read");
        let ioi = tag_path::build_ioi(&parsed.full, false)?;
        let frame = self.fragmented_read_request(&ioi);
        let reply = self.exchange(frame).await?;
        let status = codec::read_u8(&reply, STATUS_OFFSET)?;
        if status != 0 && status != 6 {
            return Err(cip_error(status));
        }
        let data_type = codec::read_u8(&reply, PAYLOAD_OFFSET)?;
        self.state
            .known_tags
            .entry(parsed.base.clone())
            .or_insert(data_type);
        Ok(data_type)
    }

    fn next_context(&mut self) -> u64 {
        let context = SENDER_CONTEXT[usize::from(self.state.context_pointer)];
        self.state.context_pointer =
            ((usize::from(self.state.context_pointer) + 1) % SENDER_CONTEXT_LEN) as u8;
        context
    }

    // ---------------------------------------------------------------------
    // Request builders
    // ---------------------------------------------------------------------

    fn register_session_request(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(28);
        frame.extend_from_slice(&cip::COMMAND_REGISTER_SESSION.to_le_bytes());
        frame.extend_from_slice(&4u16.to_le_bytes()); // payload length
        frame.extend_from_slice(&0u32.to_le_bytes()); // handle, assigned by the PLC
        frame.extend_from_slice(&0u32.to_le_bytes()); // status
        frame.extend_from_slice(&0u64.to_le_bytes()); // sender context
        frame.extend_from_slice(&0u32.to_le_bytes()); // options
        frame.extend_from_slice(&1u16.to_le_bytes()); // protocol version
        frame.extend_from_slice(&0u16.to_le_bytes()); // option flags
        frame
    }

    fn unregister_session_request(&mut self) -> Vec<u8> {
        let context = self.next_context();
        let mut frame = Vec::with_capacity(ENCAP_HEADER_LEN);
        frame.extend_from_slice(&cip::COMMAND_UNREGISTER_SESSION.to_le_bytes());
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.extend_from_slice(&self.state.session_handle.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&context.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame
    }

    /// Wraps a CIP request in a SendRRData (unconnected) frame. Used for
    /// the connection-manager services that run outside the class-3
    /// connection.
    fn send_rr_data(&mut self, cip_request: &[u8]) -> Vec<u8> {
        let context = self.next_context();
        let mut frame = Vec::with_capacity(40 + cip_request.len());
        frame.extend_from_slice(&cip::COMMAND_SEND_RR_DATA.to_le_bytes());
        frame.extend_from_slice(&((16 + cip_request.len()) as u16).to_le_bytes());
        frame.extend_from_slice(&self.state.session_handle.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes()); // status
        frame.extend_from_slice(&context.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes()); // options
        frame.extend_from_slice(&0u32.to_le_bytes()); // interface handle
        frame.extend_from_slice(&0u16.to_le_bytes()); // timeout
        frame.extend_from_slice(&2u16.to_le_bytes()); // item count
        frame.extend_from_slice(&0x0000u16.to_le_bytes()); // null address item
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.extend_from_slice(&0x00B2u16.to_le_bytes()); // unconnected data item
        frame.extend_from_slice(&(cip_request.len() as u16).to_le_bytes());
        frame.extend_from_slice(cip_request);
        frame
    }

    /// Wraps a CIP request in a SendUnitData (connected) frame, consuming
    /// one sequence number.
    fn send_unit_data(&mut self, cip_request: &[u8]) -> Vec<u8> {
        let context = self.next_context();
        let sequence = self.state.sequence_counter;
        self.state.sequence_counter = (sequence + 1) % SEQUENCE_MODULUS;

        let mut frame = Vec::with_capacity(46 + cip_request.len());
        frame.extend_from_slice(&cip::COMMAND_SEND_UNIT_DATA.to_le_bytes());
        frame.extend_from_slice(&((22 + cip_request.len()) as u16).to_le_bytes());
        frame.extend_from_slice(&self.state.session_handle.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes()); // status
        frame.extend_from_slice(&context.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes()); // options
        frame.extend_from_slice(&0u32.to_le_bytes()); // interface handle
        frame.extend_from_slice(&0u16.to_le_bytes()); // timeout
        frame.extend_from_slice(&2u16.to_le_bytes()); // item count
        frame.extend_from_slice(&0x00A1u16.to_le_bytes()); // connected address item
        frame.extend_from_slice(&4u16.to_le_bytes());
        frame.extend_from_slice(&self.state.ot_connection_id.to_le_bytes());
        frame.extend_from_slice(&0x00B1u16.to_le_bytes()); // connected data item
        frame.extend_from_slice(&((cip_request.len() + 2) as u16).to_le_bytes());
        frame.extend_from_slice(&sequence.to_le_bytes());
        frame.extend_from_slice(cip_request);
        frame
    }

    fn connection_path(&self) -> [u8; 7] {
        // Half-word length prefix, backplane port + slot, Message Router.
        [0x03, 0x01, self.state.processor_slot, 0x20, 0x02, 0x24, 0x01]
    }

    fn forward_open_request(&mut self) -> Vec<u8> {
        self.state.connection_serial = rand::random::<u16>();
        let mut cip_request = Vec::with_capacity(48);
        cip_request.extend_from_slice(&[
            cip::SERVICE_FORWARD_OPEN,
            0x02, // path size in words
            0x20,
            0x06, // Connection Manager class
            0x24,
            0x01, // instance 1
            0x0A, // priority / tick time
            0x0E, // timeout ticks
        ]);
        cip_request.extend_from_slice(&0x2000_0002u32.to_le_bytes()); // O→T id, replaced by the PLC
        cip_request.extend_from_slice(&0x2000_0001u32.to_le_bytes()); // T→O id
        cip_request.extend_from_slice(&self.state.connection_serial.to_le_bytes());
        cip_request.extend_from_slice(&self.state.vendor_id.to_le_bytes());
        cip_request.extend_from_slice(&self.state.originator_serial.to_le_bytes());
        cip_request.extend_from_slice(&0x03u32.to_le_bytes()); // timeout multiplier
        cip_request.extend_from_slice(&0x0020_1234u32.to_le_bytes()); // O→T RPI, µs
        cip_request.extend_from_slice(&0x43F4u16.to_le_bytes()); // O→T network parameters
        cip_request.extend_from_slice(&0x0020_4001u32.to_le_bytes()); // T→O RPI, µs
        cip_request.extend_from_slice(&0x43F4u16.to_le_bytes()); // T→O network parameters
        cip_request.push(0xA3); // transport class 3, application trigger
        cip_request.extend_from_slice(&self.connection_path());
        self.send_rr_data(&cip_request)
    }

    fn forward_close_request(&mut self) -> Vec<u8> {
        self.state.connection_serial = rand::random::<u16>();
        let mut cip_request = Vec::with_capacity(24);
        cip_request.extend_from_slice(&[
            cip::SERVICE_FORWARD_CLOSE,
            0x02,
            0x20,
            0x06,
            0x24,
            0x01,
            0x0A,
            0x0E,
        ]);
        cip_request.extend_from_slice(&self.state.connection_serial.to_le_bytes());
        cip_request.extend_from_slice(&self.state.vendor_id.to_le_bytes());
        cip_request.extend_from_slice(&self.state.originator_serial.to_le_bytes());
        cip_request.extend_from_slice(&self.connection_path());
        self.send_rr_data(&cip_request)
    }

    fn read_request(&mut self, ioi: &[u8], elements: u16) -> Vec<u8> {
        let mut cip_request = Vec::with_capacity(4 + ioi.len());
        cip_request.push(cip::SERVICE_READ);
        cip_request.push((ioi.len() / 2) as u8);
        cip_request.extend_from_slice(ioi);
        cip_request.extend_from_slice(&elements.to_le_bytes());
        self.send_unit_data(&cip_request)
    }

    /// Fragmented read with a zero byte offset; the reply's first byte of
    /// payload carries the type code used by the data-type probe.
    fn fragmented_read_request(&mut self, ioi: &[u8]) -> Vec<u8> {
        let mut cip_request = Vec::with_capacity(8 + ioi.len());
        cip_request.push(cip::SERVICE_FRAGMENTED_READ);
        cip_request.push((ioi.len() / 2) as u8);
        cip_request.extend_from_slice(ioi);
        cip_request.extend_from_slice(&1u16.to_le_bytes()); // elements
        cip_request.extend_from_slice(&0u32.to_le_bytes()); // byte offset
        self.send_unit_data(&cip_request)
    }

    fn multi_read_request(&mut self, tags: &[&str]) -> Result<Vec<u8>> {
        let mut segments = Vec::with_capacity(tags.len());
        for tag in tags {
            let ioi = tag_path::build_ioi(tag, false)?;
            let mut segment = Vec::with_capacity(4 + ioi.len());
            segment.push(cip::SERVICE_READ);
            segment.push((ioi.len() / 2) as u8);
            segment.extend_from_slice(&ioi);
            segment.extend_from_slice(&1u16.to_le_bytes());
            segments.push(segment);
        }

        let mut cip_request = vec![
            cip::SERVICE_MULTIPLE_SERVICE,
            0x02, // path size in words
            0x20,
            0x02, // Message Router class
            0x24,
            0x01, // instance 1
        ];
        cip_request.extend_from_slice(&(tags.len() as u16).to_le_bytes());
        // Offsets are measured from the service-count field.
        let mut offset = 2 + 2 * segments.len();
        for segment in &segments {
            cip_request.extend_from_slice(&(offset as u16).to_le_bytes());
            offset += segment.len();
        }
        for segment in &segments {
            cip_request.extend_from_slice(segment);
        }
        Ok(self.send_unit_data(&cip_request))
    }

    fn tag_list_request(&mut self, program: &str) -> Vec<u8> {
        let mut path = Vec::with_capacity(program.len() + 8);
        if !program.is_empty() {
            path.push(0x91);
            path.push(program.len() as u8);
            path.extend_from_slice(program.as_bytes());
            if program.len() % 2 != 0 {
                path.push(0x00);
            }
        }
        path.extend_from_slice(&0x6B20u16.to_le_bytes()); // Symbol Object class
        let instance = self.state.offset;
        if instance < 256 {
            path.push(0x24);
            path.push(instance as u8);
        } else {
            path.push(0x25);
            path.push(0x00);
            path.extend_from_slice(&(instance as u16).to_le_bytes());
        }

        let mut cip_request = Vec::with_capacity(4 + path.len() + 8);
        cip_request.push(cip::SERVICE_GET_INSTANCE_ATTRIBUTE_LIST);
        cip_request.push((path.len() / 2) as u8);
        cip_request.extend_from_slice(&path);
        // Three attributes: symbol type, base byte count, symbol name.
        for attribute in [3u16, 2, 7, 1] {
            cip_request.extend_from_slice(&attribute.to_le_bytes());
        }
        self.send_unit_data(&cip_request)
    }

    /// Get (`micros` = `None`) or set the wall-clock attribute of the
    /// controller's time object.
    fn plc_time_request(&mut self, micros: Option<u64>) -> Vec<u8> {
        let service = if micros.is_some() {
            cip::SERVICE_SET_ATTRIBUTE_SINGLE
        } else {
            cip::SERVICE_GET_ATTRIBUTE_SINGLE
        };
        let attribute: u16 = if micros.is_some() { 0x06 } else { 0x0B };
        let mut cip_request = vec![service, 0x02, 0x20, 0x8B, 0x24, 0x01];
        cip_request.extend_from_slice(&1u16.to_le_bytes()); // attribute count
        cip_request.extend_from_slice(&attribute.to_le_bytes());
        if let Some(micros) = micros {
            cip_request.extend_from_slice(&micros.to_le_bytes());
        }
        self.send_unit_data(&cip_request)
    }

    // ---------------------------------------------------------------------
    // Reply parsing
    // ---------------------------------------------------------------------

    /// Decodes a reply payload (`type code, reserved, value...`) according
    /// to the tag expression it answers.
    fn parse_value(&self, tag: &str, payload: &[u8]) -> Result<PlcValue> {
        let code = codec::read_u8(payload, 0)?;
        let info = cip::lookup(code).ok_or_else(|| {
            EtherNetIpError::Decode(format!(
                "unknown CIP type code 0x{:02X} in reply for tag '{}'",
                code, tag
            ))
        })?;

        match code {
            cip::TYPE_BOOL => Ok(PlcValue::Bool(codec::read_u8(payload, 2)? != 0)),
            cip::TYPE_REAL => Ok(PlcValue::Real(codec::read_f32(payload, 2)?)),
            cip::TYPE_LREAL => Ok(PlcValue::Lreal(codec::read_f64(payload, 2)?)),
            cip::TYPE_STRUCT => {
                let len = codec::read_u32(payload, 4)? as usize;
                let bytes = codec::read_bytes(payload, 8, len)?;
                Ok(PlcValue::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            _ if cip::is_integer(code) => {
                let width = usize::from(info.width);
                let raw = codec::read_uint(payload, 2, width)?;
                if let Some(bit) = effective_bit(tag, code)? {
                    let bits = (width * 8) as u32;
                    if bit >= bits {
                        return Err(EtherNetIpError::Decode(format!(
                            "bit index {} out of range for {} tag '{}'",
                            bit, info.name, tag
                        )));
                    }
                    return Ok(PlcValue::Bool((raw >> bit) & 1 == 1));
                }
                Ok(match width {
                    1 => PlcValue::Usint(raw as u8),
                    2 => PlcValue::Uint(raw as u16),
                    4 => PlcValue::Udint(raw as u32),
                    _ => PlcValue::Ulint(raw),
                })
            }
            _ => Err(EtherNetIpError::Decode(format!(
                "{} values cannot be decoded as scalars (tag '{}')",
                info.name, tag
            ))),
        }
    }
}

/// Bit position a reply value must be reduced to, if any: a terminal `.N`
/// index on an integer-family tag, or the in-word position of a `DWORD`
/// bit-array subscript.
fn effective_bit(tag: &str, code: u8) -> Result<Option<u32>> {
    if !cip::is_integer(code) {
        return Ok(None);
    }
    if let Some(bit) = tag_path::bit_index(tag) {
        return Ok(Some(u32::from(bit)));
    }
    if code == cip::TYPE_DWORD && tag.ends_with(']') {
        let parsed = tag_path::parse(tag)?;
        return Ok(Some(parsed.index % 32));
    }
    Ok(None)
}

fn require_bool(value: &PlcValue, what: &str) -> Result<bool> {
    match value {
        PlcValue::Bool(b) => Ok(*b),
        other => Err(EtherNetIpError::Coercion(format!(
            "{} take a Bool value, got {:?}",
            what, other
        ))),
    }
}

fn coercion_error(value: &PlcValue, target: &str) -> EtherNetIpError {
    EtherNetIpError::Coercion(format!("{:?} is not representable as {}", value, target))
}

fn int_to_le(value: &PlcValue, target: &str, min: i128, max: i128, width: usize) -> Result<Vec<u8>> {
    let v = value.as_i128().ok_or_else(|| coercion_error(value, target))?;
    if v < min || v > max {
        return Err(coercion_error(value, target));
    }
    let raw = if v >= 0 { v as u64 } else { (v as i64) as u64 };
    Ok(raw.to_le_bytes()[..width].to_vec())
}

/// Encodes a value as the wire bytes of the target CIP type, rejecting
/// anything that is not losslessly representable.
fn encode_scalar(data_type: u8, value: &PlcValue) -> Result<Vec<u8>> {
    match data_type {
        cip::TYPE_BOOL => match value {
            PlcValue::Bool(v) => Ok(vec![u8::from(*v)]),
            other => Err(coercion_error(other, "BOOL")),
        },
        cip::TYPE_SINT => int_to_le(value, "SINT", i128::from(i8::MIN), i128::from(i8::MAX), 1),
        cip::TYPE_USINT => int_to_le(value, "USINT", 0, i128::from(u8::MAX), 1),
        cip::TYPE_INT => int_to_le(value, "INT", i128::from(i16::MIN), i128::from(i16::MAX), 2),
        cip::TYPE_UINT => int_to_le(value, "UINT", 0, i128::from(u16::MAX), 2),
        cip::TYPE_DINT => int_to_le(value, "DINT", i128::from(i32::MIN), i128::from(i32::MAX), 4),
        cip::TYPE_UDINT => int_to_le(value, "UDINT", 0, i128::from(u32::MAX), 4),
        cip::TYPE_DWORD => int_to_le(value, "DWORD", 0, i128::from(u32::MAX), 4),
        cip::TYPE_LINT => int_to_le(value, "LINT", i128::from(i64::MIN), i128::from(i64::MAX), 8),
        cip::TYPE_LWORD => int_to_le(value, "LWORD", 0, i128::from(u64::MAX), 8),
        cip::TYPE_REAL => {
            let f = match value {
                PlcValue::Real(f) => *f,
                PlcValue::Lreal(d) => {
                    let f = *d as f32;
                    if f64::from(f) != *d {
                        return Err(coercion_error(value, "REAL"));
                    }
                    f
                }
                other => {
                    let i = other.as_i128().ok_or_else(|| coercion_error(other, "REAL"))?;
                    let f = i as f32;
                    if f as i128 != i {
                        return Err(coercion_error(other, "REAL"));
                    }
                    f
                }
            };
            Ok(f.to_le_bytes().to_vec())
        }
        cip::TYPE_LREAL => {
            let d = match value {
                PlcValue::Lreal(d) => *d,
                PlcValue::Real(f) => f64::from(*f),
                other => {
                    let i = other.as_i128().ok_or_else(|| coercion_error(other, "LREAL"))?;
                    let d = i as f64;
                    if d as i128 != i {
                        return Err(coercion_error(other, "LREAL"));
                    }
                    d
                }
            };
            Ok(d.to_le_bytes().to_vec())
        }
        other => Err(EtherNetIpError::Decode(format!(
            "cannot encode a value for CIP type 0x{:02X}",
            other
        ))),
    }
}

/// Builds the CIP body of a Write Tag request.
fn build_write_cip(data_type: u8, ioi: &[u8], value: &PlcValue) -> Result<Vec<u8>> {
    let mut cip_request = Vec::with_capacity(ioi.len() + cip::STRING_DATA_LEN + 12);
    cip_request.push(cip::SERVICE_WRITE);
    cip_request.push((ioi.len() / 2) as u8);
    cip_request.extend_from_slice(ioi);

    if data_type == cip::TYPE_STRUCT {
        let s = match value {
            PlcValue::String(s) => s,
            other => return Err(coercion_error(other, "STRING")),
        };
        if !s.is_ascii() {
            return Err(EtherNetIpError::Coercion(
                "STRING values must be ASCII".to_string(),
            ));
        }
        if s.len() > cip::STRING_MAX_LEN {
            return Err(EtherNetIpError::StringTooLong {
                max_length: cip::STRING_MAX_LEN,
                actual_length: s.len(),
            });
        }
        cip_request.push(cip::TYPE_STRUCT);
        cip_request.push(0x02); // structured type, handle follows
        cip_request.extend_from_slice(&cip::STRING_STRUCT_HANDLE.to_le_bytes());
        cip_request.extend_from_slice(&1u16.to_le_bytes()); // element count
        cip_request.extend_from_slice(&(s.len() as u32).to_le_bytes());
        cip_request.extend_from_slice(s.as_bytes());
        cip_request.extend(std::iter::repeat(0u8).take(cip::STRING_DATA_LEN - s.len()));
    } else {
        cip_request.push(data_type);
        cip_request.push(0x00); // reserved
        cip_request.extend_from_slice(&1u16.to_le_bytes()); // element count
        cip_request.extend_from_slice(&encode_scalar(data_type, value)?);
    }
    Ok(cip_request)
}

/// Builds the CIP body of a masked read-modify-write request.
///
/// The OR mask sets the target bit when writing true; the AND mask clears
/// it when writing false. Their union always covers every bit of the word,
/// and exactly the target bit distinguishes a true write from a false one.
fn build_write_bit_cip(ioi: &[u8], width: u8, bit: u32, value: bool) -> Result<Vec<u8>> {
    if !matches!(width, 2 | 4 | 8) {
        return Err(EtherNetIpError::Coercion(format!(
            "bit writes are not supported for {}-byte types",
            width
        )));
    }
    let bits_total = u32::from(width) * 8;
    if bit >= bits_total {
        return Err(EtherNetIpError::Decode(format!(
            "bit index {} out of range for a {}-bit value",
            bit, bits_total
        )));
    }

    let all_ones: u64 = if bits_total == 64 {
        u64::MAX
    } else {
        (1u64 << bits_total) - 1
    };
    let set_mask: u64 = if value { 1u64 << bit } else { 0 };
    let clear_mask: u64 = if value {
        all_ones - (1u64 << bit)
    } else {
        all_ones
    };

    let width = usize::from(width);
    let mut cip_request = Vec::with_capacity(4 + ioi.len() + 2 * width);
    cip_request.push(cip::SERVICE_READ_MODIFY_WRITE);
    cip_request.push((ioi.len() / 2) as u8);
    cip_request.extend_from_slice(ioi);
    cip_request.extend_from_slice(&(width as i16).to_le_bytes());
    cip_request.extend_from_slice(&set_mask.to_le_bytes()[..width]);
    cip_request.extend_from_slice(&clear_mask.to_le_bytes()[..width]);
    Ok(cip_request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
            Err(EtherNetIpError::Closed)
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn test_client() -> EipClient {
        let mut client = EipClient {
            transport: Box::new(NullTransport),
            state: SessionState::new(2),
            status: SessionStatus::Open,
        };
        client.state.session_handle = 0x0102_0304;
        client.state.ot_connection_id = 0x3344_5566;
        client
    }

    #[test]
    fn test_register_session_frame() {
        let client = test_client();
        let frame = client.register_session_request();
        assert_eq!(frame.len(), 28);
        assert_eq!(&frame[0..2], &[0x65, 0x00]); // command
        assert_eq!(&frame[2..4], &[0x04, 0x00]); // length
        assert_eq!(&frame[4..8], &[0x00; 4]); // handle not yet assigned
        assert_eq!(&frame[24..26], &[0x01, 0x00]); // protocol version 1
        assert_eq!(&frame[26..28], &[0x00, 0x00]); // option flags
    }

    #[test]
    fn test_unit_data_frame_layout() {
        let mut client = test_client();
        let frame = client.send_unit_data(&[0xAA, 0xBB]);
        assert_eq!(frame.len(), 48);
        assert_eq!(&frame[0..2], &[0x70, 0x00]);
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 24); // 22 + cip
        assert_eq!(&frame[4..8], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&frame[28..30], &[0x02, 0x00]); // item count
        assert_eq!(&frame[30..32], &[0xA1, 0x00]);
        assert_eq!(&frame[32..34], &[0x04, 0x00]);
        assert_eq!(&frame[34..38], &0x3344_5566u32.to_le_bytes());
        assert_eq!(&frame[38..40], &[0xB1, 0x00]);
        assert_eq!(u16::from_le_bytes([frame[40], frame[41]]), 4); // cip + sequence
        assert_eq!(u16::from_le_bytes([frame[44], frame[45]]), 1); // first sequence
        assert_eq!(&frame[46..48], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_sequence_counter_increments_and_wraps() {
        let mut client = test_client();
        client.state.sequence_counter = 9998;
        let sequences: Vec<u16> = (0..4)
            .map(|_| {
                let frame = client.send_unit_data(&[0x00]);
                u16::from_le_bytes([frame[44], frame[45]])
            })
            .collect();
        assert_eq!(sequences, vec![9998, 9999, 0, 1]);
    }

    #[test]
    fn test_context_rotation_wraps_at_table_end() {
        let mut client = test_client();
        client.state.context_pointer = 154;
        let contexts: Vec<u64> = (0..3)
            .map(|_| {
                let frame = client.send_unit_data(&[0x00]);
                u64::from_le_bytes(frame[12..20].try_into().unwrap())
            })
            .collect();
        assert_eq!(contexts[0], SENDER_CONTEXT[154]);
        assert_eq!(contexts[1], SENDER_CONTEXT[155]);
        assert_eq!(contexts[2], SENDER_CONTEXT[0]);
        assert!(usize::from(client.state.context_pointer) < SENDER_CONTEXT_LEN);
    }

    #[test]
    fn test_forward_open_frame() {
        let mut client = test_client();
        let frame = client.forward_open_request();
        // SendRRData prefix: 24-byte header + 16 bytes of CPF items.
        assert_eq!(&frame[0..2], &[0x6F, 0x00]);
        assert_eq!(&frame[36..38], &[0xB2, 0x00]);
        let cip = &frame[40..];
        assert_eq!(u16::from_le_bytes([frame[38], frame[39]]) as usize, cip.len());

        assert_eq!(&cip[0..8], &[0x54, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0x0E]);
        assert_eq!(&cip[8..12], &0x2000_0002u32.to_le_bytes());
        assert_eq!(&cip[12..16], &0x2000_0001u32.to_le_bytes());
        assert_eq!(&cip[16..18], &client.state.connection_serial.to_le_bytes());
        assert_eq!(&cip[18..20], &1u16.to_le_bytes()); // vendor id
        assert_eq!(&cip[20..24], &42u32.to_le_bytes()); // originator serial
        assert_eq!(&cip[24..28], &0x03u32.to_le_bytes()); // timeout multiplier
        assert_eq!(&cip[28..32], &0x0020_1234u32.to_le_bytes());
        assert_eq!(&cip[32..34], &0x43F4u16.to_le_bytes());
        assert_eq!(&cip[34..38], &0x0020_4001u32.to_le_bytes());
        assert_eq!(&cip[38..40], &0x43F4u16.to_le_bytes());
        assert_eq!(cip[40], 0xA3);
        assert_eq!(&cip[41..], &[0x03, 0x01, 0x02, 0x20, 0x02, 0x24, 0x01]);
    }

    #[test]
    fn test_forward_close_frame() {
        let mut client = test_client();
        let frame = client.forward_close_request();
        let cip = &frame[40..];
        assert_eq!(&cip[0..8], &[0x4E, 0x02, 0x20, 0x06, 0x24, 0x01, 0x0A, 0x0E]);
        assert_eq!(&cip[8..10], &client.state.connection_serial.to_le_bytes());
        assert_eq!(&cip[10..12], &1u16.to_le_bytes());
        assert_eq!(&cip[12..16], &42u32.to_le_bytes());
        assert_eq!(&cip[16..], &[0x03, 0x01, 0x02, 0x20, 0x02, 0x24, 0x01]);
    }

    #[test]
    fn test_multi_read_offset_table() {
        let mut client = test_client();
        for count in 1..=4usize {
            let tags: Vec<String> = (0..count).map(|i| format!("Tag{}", i)).collect();
            let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
            let frame = client.multi_read_request(&tag_refs).unwrap();
            let cip = &frame[46..];
            assert_eq!(&cip[0..6], &[0x0A, 0x02, 0x20, 0x02, 0x24, 0x01]);
            assert_eq!(u16::from_le_bytes([cip[6], cip[7]]) as usize, count);

            let segment_len = {
                let ioi = tag_path::build_ioi("Tag0", false).unwrap();
                4 + ioi.len()
            };
            for i in 0..count {
                let entry = u16::from_le_bytes([cip[8 + 2 * i], cip[9 + 2 * i]]) as usize;
                assert_eq!(entry, 2 + 2 * count + i * segment_len);
            }
            // First sub-request begins right after the offset table.
            assert_eq!(cip[8 + 2 * count], 0x4C);
        }
    }

    #[test]
    fn test_tag_list_request_instance_segments() {
        let mut client = test_client();
        let frame = client.tag_list_request("");
        let cip = &frame[46..];
        assert_eq!(cip[0], 0x55);
        assert_eq!(&cip[2..4], &[0x20, 0x6B]); // Symbol Object class
        assert_eq!(&cip[4..6], &[0x24, 0x00]); // 8-bit instance 0
        assert_eq!(&cip[6..14], &[3, 0, 2, 0, 7, 0, 1, 0]);

        client.state.offset = 0x1234;
        let frame = client.tag_list_request("");
        let cip = &frame[46..];
        assert_eq!(&cip[4..8], &[0x25, 0x00, 0x34, 0x12]); // 16-bit instance

        client.state.offset = 7;
        let frame = client.tag_list_request("Program:MainProgram");
        let cip = &frame[46..];
        assert_eq!(cip[2], 0x91);
        assert_eq!(cip[3] as usize, "Program:MainProgram".len());
        assert_eq!(&cip[4..23], b"Program:MainProgram");
        assert_eq!(cip[23], 0x00); // pad to even length
        assert_eq!(&cip[24..26], &[0x20, 0x6B]);
        assert_eq!(&cip[26..28], &[0x24, 0x07]);
    }

    #[test]
    fn test_plc_time_requests() {
        let mut client = test_client();
        let frame = client.plc_time_request(None);
        let cip = &frame[46..];
        assert_eq!(&cip[0..6], &[0x03, 0x02, 0x20, 0x8B, 0x24, 0x01]);
        assert_eq!(&cip[6..10], &[0x01, 0x00, 0x0B, 0x00]);

        let frame = client.plc_time_request(Some(1_600_000_000_000_000));
        let cip = &frame[46..];
        assert_eq!(&cip[0..6], &[0x04, 0x02, 0x20, 0x8B, 0x24, 0x01]);
        assert_eq!(&cip[6..10], &[0x01, 0x00, 0x06, 0x00]);
        assert_eq!(&cip[10..18], &1_600_000_000_000_000u64.to_le_bytes());
    }

    #[test]
    fn test_write_string_cip() {
        let ioi = tag_path::build_ioi("Msg", false).unwrap();
        let cip_request =
            build_write_cip(cip::TYPE_STRUCT, &ioi, &PlcValue::String("abcd".into())).unwrap();
        let body = &cip_request[2 + ioi.len()..];
        assert_eq!(body[0], 0xA0);
        assert_eq!(body[1], 0x02);
        assert_eq!(&body[2..4], &0x0FCEu16.to_le_bytes());
        assert_eq!(&body[4..6], &1u16.to_le_bytes());
        assert_eq!(&body[6..10], &4u32.to_le_bytes());
        assert_eq!(&body[10..14], b"abcd");
        assert_eq!(body.len(), 10 + cip::STRING_DATA_LEN);
        assert!(body[14..].iter().all(|&b| b == 0));

        let long = "x".repeat(83);
        assert!(matches!(
            build_write_cip(cip::TYPE_STRUCT, &ioi, &PlcValue::String(long)),
            Err(EtherNetIpError::StringTooLong {
                max_length: 82,
                actual_length: 83
            })
        ));
        assert!(matches!(
            build_write_cip(cip::TYPE_STRUCT, &ioi, &PlcValue::String("héllo".into())),
            Err(EtherNetIpError::Coercion(_))
        ));
    }

    #[test]
    fn test_write_scalar_cip() {
        let ioi = tag_path::build_ioi("SetPoint", false).unwrap();
        let cip_request = build_write_cip(cip::TYPE_DINT, &ioi, &PlcValue::Dint(-7)).unwrap();
        assert_eq!(cip_request[0], 0x4D);
        assert_eq!(cip_request[1] as usize, ioi.len() / 2);
        let body = &cip_request[2 + ioi.len()..];
        assert_eq!(&body[0..4], &[0xC4, 0x00, 0x01, 0x00]);
        assert_eq!(&body[4..8], &(-7i32).to_le_bytes());
    }

    fn masks_of(cip_request: &[u8], ioi_len: usize, width: usize) -> (u64, u64) {
        let body = &cip_request[2 + ioi_len..];
        assert_eq!(
            i16::from_le_bytes([body[0], body[1]]) as usize,
            width,
            "mask size field"
        );
        let mut set = [0u8; 8];
        let mut clear = [0u8; 8];
        set[..width].copy_from_slice(&body[2..2 + width]);
        clear[..width].copy_from_slice(&body[2 + width..2 + 2 * width]);
        (u64::from_le_bytes(set), u64::from_le_bytes(clear))
    }

    #[test]
    fn test_write_bit_mask_properties() {
        let ioi = tag_path::build_ioi("Word", false).unwrap();
        for width in [2u8, 4, 8] {
            let bits = u32::from(width) * 8;
            let all_ones = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            for bit in 0..bits {
                let on = build_write_bit_cip(&ioi, width, bit, true).unwrap();
                let off = build_write_bit_cip(&ioi, width, bit, false).unwrap();
                let (set_on, clear_on) = masks_of(&on, ioi.len(), width as usize);
                let (set_off, clear_off) = masks_of(&off, ioi.len(), width as usize);

                assert_eq!(set_on | clear_on, all_ones, "w={} b={}", width, bit);
                assert_eq!(set_off | clear_off, all_ones, "w={} b={}", width, bit);
                assert_eq!(set_on ^ set_off, 1u64 << bit);
                assert_eq!(clear_on ^ clear_off, 1u64 << bit);
            }
        }
    }

    #[test]
    fn test_write_bit_rejections() {
        let ioi = tag_path::build_ioi("Word", false).unwrap();
        assert!(matches!(
            build_write_bit_cip(&ioi, 1, 0, true),
            Err(EtherNetIpError::Coercion(_))
        ));
        assert!(matches!(
            build_write_bit_cip(&ioi, 2, 16, true),
            Err(EtherNetIpError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_scalar_coercion() {
        assert_eq!(
            encode_scalar(cip::TYPE_SINT, &PlcValue::Dint(12)).unwrap(),
            vec![12]
        );
        assert_eq!(
            encode_scalar(cip::TYPE_SINT, &PlcValue::Sint(-1)).unwrap(),
            vec![0xFF]
        );
        assert!(encode_scalar(cip::TYPE_SINT, &PlcValue::Dint(300)).is_err());
        assert!(encode_scalar(cip::TYPE_USINT, &PlcValue::Sint(-1)).is_err());
        assert!(encode_scalar(cip::TYPE_UINT, &PlcValue::Dint(65_536)).is_err());
        assert!(encode_scalar(cip::TYPE_DINT, &PlcValue::Real(1.5)).is_err());

        assert_eq!(
            encode_scalar(cip::TYPE_LWORD, &PlcValue::Ulint(u64::MAX)).unwrap(),
            u64::MAX.to_le_bytes().to_vec()
        );

        // 2^24 survives the trip through f32, 2^24 + 1 does not.
        assert!(encode_scalar(cip::TYPE_REAL, &PlcValue::Dint(1 << 24)).is_ok());
        assert!(encode_scalar(cip::TYPE_REAL, &PlcValue::Dint((1 << 24) + 1)).is_err());
        assert!(encode_scalar(cip::TYPE_REAL, &PlcValue::Lreal(0.1)).is_err());
        assert_eq!(
            encode_scalar(cip::TYPE_LREAL, &PlcValue::Real(0.5)).unwrap(),
            0.5f64.to_le_bytes().to_vec()
        );
        assert!(matches!(
            encode_scalar(cip::TYPE_BOOL, &PlcValue::Dint(1)),
            Err(EtherNetIpError::Coercion(_))
        ));
    }

    #[test]
    fn test_parse_value_scalars() {
        let client = test_client();
        assert_eq!(
            client.parse_value("t", &[0xC2, 0x00, 12]).unwrap(),
            PlcValue::Usint(12)
        );
        assert_eq!(
            client.parse_value("t", &[0xC3, 0x00, 0x34, 0x12]).unwrap(),
            PlcValue::Uint(0x1234)
        );
        assert_eq!(
            client.parse_value("t", &[0xC1, 0x00, 0x01]).unwrap(),
            PlcValue::Bool(true)
        );
        let mut payload = vec![0xCA, 0x00];
        payload.extend_from_slice(&99.5f32.to_le_bytes());
        assert_eq!(
            client.parse_value("t", &payload).unwrap(),
            PlcValue::Real(99.5)
        );
    }

    #[test]
    fn test_parse_value_bit_extraction() {
        let client = test_client();
        // Bit 1 of 0b0010 is set.
        assert_eq!(
            client.parse_value("w.1", &[0xC3, 0x00, 0x02, 0x00]).unwrap(),
            PlcValue::Bool(true)
        );
        assert_eq!(
            client.parse_value("w.2", &[0xC3, 0x00, 0x02, 0x00]).unwrap(),
            PlcValue::Bool(false)
        );
        // Out-of-range bit index for a 16-bit word.
        assert!(matches!(
            client.parse_value("w.40", &[0xC3, 0x00, 0x02, 0x00]),
            Err(EtherNetIpError::Decode(_))
        ));
        // DWORD bit-array element: bit 35 lives at bit 3 of its word.
        let word: u32 = 0b1000;
        let mut payload = vec![0xD3, 0x00];
        payload.extend_from_slice(&word.to_le_bytes());
        assert_eq!(
            client.parse_value("Flags[35]", &payload).unwrap(),
            PlcValue::Bool(true)
        );
    }

    #[test]
    fn test_parse_value_string() {
        let client = test_client();
        let mut payload = vec![0xA0, 0x02, 0xCE, 0x0F];
        payload.extend_from_slice(&4u32.to_le_bytes());
        payload.extend_from_slice(b"abcd");
        payload.extend_from_slice(&[0u8; 10]);
        assert_eq!(
            client.parse_value("s", &payload).unwrap(),
            PlcValue::String("abcd".to_string())
        );
    }

    #[test]
    fn test_parse_value_unknown_type() {
        let client = test_client();
        assert!(matches!(
            client.parse_value("t", &[0xCE, 0x00, 0x01]),
            Err(EtherNetIpError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_open_session() {
        let mut client = test_client();
        client.status = SessionStatus::Closed;
        assert!(matches!(
            client.read("Tag").await,
            Err(EtherNetIpError::Session(_))
        ));
        assert!(matches!(
            client.write("Tag", PlcValue::Dint(1)).await,
            Err(EtherNetIpError::Session(_))
        ));
        assert!(matches!(
            client.get_tag_list().await,
            Err(EtherNetIpError::Session(_))
        ));
        // stop() on a closed client is a no-op.
        client.stop().await.unwrap();
        assert_eq!(client.status(), SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_multi_read_empty_is_a_noop() {
        let mut client = test_client();
        let values = client.multi_read(&[]).await.unwrap();
        assert!(values.is_empty());
    }
}
