//! Sender-context rotation table.
//!
//! Every encapsulation frame that carries a session handle also carries a
//! 64-bit sender context. The PLC echoes it back untouched; the protocol
//! attaches no meaning to the value. This table is kept byte-for-byte
//! identical to the widely deployed implementation so packet captures stay
//! comparable across clients. The pointer advances by one per request and
//! wraps after the last entry.

/// Number of entries in the rotation.
pub const SENDER_CONTEXT_LEN: usize = 156;

/// The fixed sender-context values, indexed by the session's context
/// pointer.
pub static SENDER_CONTEXT: [u64; SENDER_CONTEXT_LEN] = [
    0x6572276557,
    0x6f6e,
    0x676e61727473,
    0x737265,
    0x6f74,
    0x65766f6c,
    0x756f59,
    0x776f6e6b,
    0x656874,
    0x73656c7572,
    0x646e61,
    0x6f73,
    0x6f64,
    0x49,
    0x41,
    0x6c6c7566,
    0x74696d6d6f63,
    0x7327746e656d,
    0x74616877,
    0x6d2749,
    0x6b6e696874,
    0x676e69,
    0x666f,
    0x756f59,
    0x746e646c756f77,
    0x746567,
    0x73696874,
    0x6d6f7266,
    0x796e61,
    0x726568746f,
    0x797567,
    0x49,
    0x7473756a,
    0x616e6e6177,
    0x6c6c6574,
    0x756f79,
    0x776f68,
    0x6d2749,
    0x676e696c656566,
    0x6174746f47,
    0x656b616d,
    0x756f79,
    0x7265646e75,
    0x646e617473,
    0x726576654e,
    0x616e6e6f67,
    0x65766967,
    0x756f79,
    0x7075,
    0x726576654e,
    0x616e6e6f67,
    0x74656c,
    0x756f79,
    0x6e776f64,
    0x726576654e,
    0x616e6e6f67,
    0x6e7572,
    0x646e756f7261,
    0x646e61,
    0x747265736564,
    0x756f79,
    0x726576654e,
    0x616e6e6f67,
    0x656b616d,
    0x756f79,
    0x797263,
    0x726576654e,
    0x616e6e6f67,
    0x796173,
    0x657962646f6f67,
    0x726576654e,
    0x616e6e6f67,
    0x6c6c6574,
    0x61,
    0x65696c,
    0x646e61,
    0x74727568,
    0x756f79,
    0x6576276557,
    0x6e776f6e6b,
    0x68636165,
    0x726568746f,
    0x726f66,
    0x6f73,
    0x676e6f6c,
    0x72756f59,
    0x73277472616568,
    0x6e656562,
    0x676e69686361,
    0x747562,
    0x657227756f59,
    0x6f6f74,
    0x796873,
    0x6f74,
    0x796173,
    0x7469,
    0x656469736e49,
    0x6577,
    0x68746f62,
    0x776f6e6b,
    0x732774616877,
    0x6e656562,
    0x676e696f67,
    0x6e6f,
    0x6557,
    0x776f6e6b,
    0x656874,
    0x656d6167,
    0x646e61,
    0x6572276577,
    0x616e6e6f67,
    0x79616c70,
    0x7469,
    0x646e41,
    0x6669,
    0x756f79,
    0x6b7361,
    0x656d,
    0x776f68,
    0x6d2749,
    0x676e696c656566,
    0x74276e6f44,
    0x6c6c6574,
    0x656d,
    0x657227756f79,
    0x6f6f74,
    0x646e696c62,
    0x6f74,
    0x656573,
    0x726576654e,
    0x616e6e6f67,
    0x65766967,
    0x756f79,
    0x7075,
    0x726576654e,
    0x616e6e6f67,
    0x74656c,
    0x756f79,
    0x6e776f64,
    0x726576654e,
    0x6e7572,
    0x646e756f7261,
    0x646e61,
    0x747265736564,
    0x756f79,
    0x726576654e,
    0x616e6e6f67,
    0x656b616d,
    0x756f79,
    0x797263,
    0x726576654e,
    0x616e6e6f67,
    0x796173,
    0x657962646f6f67,
    0x726576654e,
    0xa680e2616e6e6f67,
];
