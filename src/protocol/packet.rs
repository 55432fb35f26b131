use super::checksum::checksum8;
use super::commands::{AMBIENT_ENABLED, AMBIENT_PREFIX, FRAME_END, FRAME_START};

/// Total length of an ambient-sound control packet on the wire.
pub const PACKET_LEN: usize = 17;

/// Parameters carried by an ambient-sound control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSettings {
    /// Any of NC / wind / ambient active.
    pub enabled: bool,
    /// Noise cancelling strength, 0..=2.
    pub noise_cancelling: u8,
    /// Ambient sound volume, 0..=20.
    pub volume: u8,
    /// Focus on human voices in ambient mode.
    pub voice_focus: bool,
}

/// A framed Sony control packet.
///
/// Wire format:
/// ```text
/// [0x3E] [prefix: 8 bytes] [enabled, 2, nc_level, 1, voice, volume] [checksum] [0x3C]
/// ```
///
/// The checksum is the 8-bit wrapping sum of prefix + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    bytes: [u8; PACKET_LEN],
}

impl ControlPacket {
    pub fn encode(settings: &AmbientSettings) -> Self {
        let enabled = if settings.enabled { AMBIENT_ENABLED } else { 0 };
        let payload = [
            enabled,
            2,
            settings.noise_cancelling,
            1,
            settings.voice_focus as u8,
            settings.volume,
        ];

        let mut body = [0u8; 14];
        body[..8].copy_from_slice(&AMBIENT_PREFIX);
        body[8..].copy_from_slice(&payload);

        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = FRAME_START;
        bytes[1..15].copy_from_slice(&body);
        bytes[15] = checksum8(&body);
        bytes[16] = FRAME_END;
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[15]
    }
}

impl std::fmt::Display for ControlPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
