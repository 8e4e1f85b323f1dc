//! CIP constants and the elementary data-type registry.
//!
//! Everything on the wire is little-endian. The service codes below are the
//! 1-byte CIP opcodes carried in explicit-messaging requests; the `0x80`
//! bit is set on the echoed service code in replies.

/// Read Tag service.
pub const SERVICE_READ: u8 = 0x4C;
/// Write Tag service.
pub const SERVICE_WRITE: u8 = 0x4D;
/// Read/Modify/Write service (single-bit writes via masks).
pub const SERVICE_READ_MODIFY_WRITE: u8 = 0x4E;
/// Read Tag Fragmented service (also used as the data-type probe).
pub const SERVICE_FRAGMENTED_READ: u8 = 0x52;
/// Get Instance Attribute List service (tag directory walk).
pub const SERVICE_GET_INSTANCE_ATTRIBUTE_LIST: u8 = 0x55;
/// Multiple Service Packet.
pub const SERVICE_MULTIPLE_SERVICE: u8 = 0x0A;
/// Forward Open (Connection Manager).
pub const SERVICE_FORWARD_OPEN: u8 = 0x54;
/// Forward Close (Connection Manager).
pub const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
/// Get Attribute Single.
pub const SERVICE_GET_ATTRIBUTE_SINGLE: u8 = 0x03;
/// Set Attribute Single.
pub const SERVICE_SET_ATTRIBUTE_SINGLE: u8 = 0x04;

/// EIP encapsulation command: RegisterSession.
pub const COMMAND_REGISTER_SESSION: u16 = 0x0065;
/// EIP encapsulation command: UnregisterSession.
pub const COMMAND_UNREGISTER_SESSION: u16 = 0x0066;
/// EIP encapsulation command: SendRRData (unconnected).
pub const COMMAND_SEND_RR_DATA: u16 = 0x006F;
/// EIP encapsulation command: SendUnitData (connected).
pub const COMMAND_SEND_UNIT_DATA: u16 = 0x0070;

/// Structured type carrier (Logix STRING on this wire).
pub const TYPE_STRUCT: u8 = 0xA0;
/// BOOL.
pub const TYPE_BOOL: u8 = 0xC1;
/// SINT, 8-bit signed.
pub const TYPE_SINT: u8 = 0xC2;
/// INT, 16-bit signed.
pub const TYPE_INT: u8 = 0xC3;
/// DINT, 32-bit signed.
pub const TYPE_DINT: u8 = 0xC4;
/// LINT, 64-bit signed.
pub const TYPE_LINT: u8 = 0xC5;
/// USINT, 8-bit unsigned.
pub const TYPE_USINT: u8 = 0xC6;
/// UINT, 16-bit unsigned.
pub const TYPE_UINT: u8 = 0xC7;
/// UDINT, 32-bit unsigned.
pub const TYPE_UDINT: u8 = 0xC8;
/// LWORD, 64-bit word.
pub const TYPE_LWORD: u8 = 0xC9;
/// REAL, 32-bit IEEE 754.
pub const TYPE_REAL: u8 = 0xCA;
/// LREAL, 64-bit IEEE 754.
pub const TYPE_LREAL: u8 = 0xCB;
/// DWORD, the 32-bit element of a BOOL array (32 bits per element).
pub const TYPE_DWORD: u8 = 0xD3;

/// Structure handle carried in STRING write headers.
pub const STRING_STRUCT_HANDLE: u16 = 0x0FCE;
/// Capacity of the Logix STRING `DATA` member.
pub const STRING_MAX_LEN: usize = 82;
/// Padded size of the STRING data area on the wire.
pub const STRING_DATA_LEN: usize = 84;

/// An entry in the elementary CIP type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipType {
    /// Width of one element in bytes (0 for the variable-length STRING).
    pub width: u8,
    /// Display name of the type.
    pub name: &'static str,
}

/// Looks up an elementary CIP type by its 1-byte type code.
///
/// Returns `None` for codes the library does not understand; callers turn
/// that into a decode error rather than guessing a width.
pub fn lookup(code: u8) -> Option<CipType> {
    let entry = match code {
        TYPE_STRUCT => CipType { width: 0, name: "STRING" },
        TYPE_BOOL => CipType { width: 1, name: "BOOL" },
        TYPE_SINT => CipType { width: 1, name: "SINT" },
        TYPE_INT => CipType { width: 2, name: "INT" },
        TYPE_DINT => CipType { width: 4, name: "DINT" },
        TYPE_LINT => CipType { width: 8, name: "LINT" },
        TYPE_USINT => CipType { width: 1, name: "USINT" },
        TYPE_UINT => CipType { width: 2, name: "UINT" },
        TYPE_UDINT => CipType { width: 4, name: "UDINT" },
        TYPE_LWORD => CipType { width: 8, name: "LWORD" },
        TYPE_REAL => CipType { width: 4, name: "REAL" },
        TYPE_LREAL => CipType { width: 8, name: "LREAL" },
        TYPE_DWORD => CipType { width: 4, name: "DWORD" },
        _ => return None,
    };
    Some(entry)
}

/// Whether the type code belongs to the integer family (bit-extractable).
pub fn is_integer(code: u8) -> bool {
    matches!(
        code,
        TYPE_SINT
            | TYPE_INT
            | TYPE_DINT
            | TYPE_LINT
            | TYPE_USINT
            | TYPE_UINT
            | TYPE_UDINT
            | TYPE_LWORD
            | TYPE_DWORD
    )
}
