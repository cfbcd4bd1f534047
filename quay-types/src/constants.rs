use std::time::Duration;

// ─── Logical Address Layout ──────────────────────────────────────────────────

/// High 14 bits: cluster id.
pub const CLUSTER_MASK: u32 = 0xFFFC_0000;

/// Middle 8 bits: node type.
pub const TYPE_MASK: u32 = 0x0003_FC00;

/// Low 10 bits: server index.
pub const SERVER_MASK: u32 = 0x0000_03FF;

/// Bit offset of the cluster field.
pub const CLUSTER_SHIFT: u32 = 18;

/// Bit offset of the type field.
pub const TYPE_SHIFT: u32 = 10;

/// Largest valid cluster id.
pub const MAX_CLUSTER: u32 = CLUSTER_MASK >> CLUSTER_SHIFT; // 16383

/// Largest valid node type.
pub const MAX_TYPE: u32 = TYPE_MASK >> TYPE_SHIFT; // 255

/// Largest valid server index.
pub const MAX_SERVER: u32 = SERVER_MASK; // 1023

/// Reserved node type for harbor nodes bridging clusters.
pub const HARBOR_TYPE: u32 = 255;

// ─── Handshake Parameters ────────────────────────────────────────────────────

/// Overall deadline for an inbound handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default deadline handed to a node when sending a message.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Upper bound accepted for the login frame length prefix.
pub const MAX_LOGIN_FRAME_SIZE: usize = 65_536; // 64 KiB

/// Acknowledgment written to the peer once a handshake succeeds.
pub const HANDSHAKE_ACK: [u8; 4] = [0, 0, 0, 0];

// ─── Session Parameters ──────────────────────────────────────────────────────

/// How long a closing session keeps writing its backlog before abandoning a
/// blocked write.
pub const SESSION_CLOSE_GRACE: Duration = Duration::from_millis(1000);

// ─── Cipher Parameters ───────────────────────────────────────────────────────

/// AES block size in bytes.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Length of the random IV prepended to every ciphertext.
pub const IV_SIZE: usize = 16;

/// Length of the big-endian payload length header inside the plaintext frame.
pub const LENGTH_HEADER_SIZE: usize = 4;
