/// Wire constants for the Sony control protocol and the hands-free side channel.
use uuid::Uuid;

// Control packet framing
pub const FRAME_START: u8 = 0x3E;
pub const FRAME_END: u8 = 0x3C;

/// Fixed header preceding every ambient-sound payload.
pub const AMBIENT_PREFIX: [u8; 8] = [12, 0, 0, 0, 0, 8, 104, 2];

/// Payload marker for "any ambient/NC mode active".
pub const AMBIENT_ENABLED: u8 = 16;

/// Sony vendor control service.
pub const SONY_CONTROL_UUID: Uuid = Uuid::from_u128(0x96cc203e_5068_46ad_b32d_e316f5e069ba);

/// Handsfree service class (0x111E) on the Bluetooth base UUID.
pub const HANDS_FREE_UUID: Uuid = Uuid::from_u128(0x0000111e_0000_1000_8000_00805f9b34fb);

/// RFCOMM channel tried for the AT session when SDP has no usable record.
pub const HANDS_FREE_DEFAULT_PORT: u8 = 4;
