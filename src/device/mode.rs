use crate::error::Error;
use crate::protocol::{AmbientSettings, ControlPacket};

/// Ambient sound / noise cancelling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeCommand {
    NoiseCancelling,
    WindCancelling,
    AmbientSound,
    Disabled,
}

impl ModeCommand {
    pub const ALL: [ModeCommand; 4] = [
        Self::NoiseCancelling,
        Self::WindCancelling,
        Self::AmbientSound,
        Self::Disabled,
    ];

    pub fn settings(&self) -> AmbientSettings {
        let (enabled, noise_cancelling, volume) = match self {
            Self::NoiseCancelling => (true, 2, 0),
            Self::WindCancelling => (true, 1, 0),
            Self::AmbientSound => (true, 0, 19),
            Self::Disabled => (false, 0, 0),
        };
        AmbientSettings {
            enabled,
            noise_cancelling,
            volume,
            voice_focus: false,
        }
    }

    pub fn encode(&self) -> ControlPacket {
        ControlPacket::encode(&self.settings())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoiseCancelling => "noise-cancelling",
            Self::WindCancelling => "wind-cancelling",
            Self::AmbientSound => "ambient-sound",
            Self::Disabled => "disable",
        }
    }
}

impl std::str::FromStr for ModeCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noise-cancelling" | "nc" => Ok(Self::NoiseCancelling),
            "wind-cancelling" | "wind" => Ok(Self::WindCancelling),
            "ambient-sound" | "ambient" => Ok(Self::AmbientSound),
            "disable" | "disabled" | "off" => Ok(Self::Disabled),
            _ => Err(Error::UnknownMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for ModeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{FRAME_END, FRAME_START};
    use crate::protocol::PACKET_LEN;

    #[test]
    fn test_mode_table() {
        let nc = ModeCommand::NoiseCancelling.settings();
        assert!(nc.enabled);
        assert_eq!((nc.noise_cancelling, nc.volume), (2, 0));

        let wind = ModeCommand::WindCancelling.settings();
        assert!(wind.enabled);
        assert_eq!((wind.noise_cancelling, wind.volume), (1, 0));

        let ambient = ModeCommand::AmbientSound.settings();
        assert!(ambient.enabled);
        assert_eq!((ambient.noise_cancelling, ambient.volume), (0, 19));

        let off = ModeCommand::Disabled.settings();
        assert!(!off.enabled);
        assert_eq!((off.noise_cancelling, off.volume), (0, 0));

        assert!(ModeCommand::ALL.iter().all(|m| !m.settings().voice_focus));
    }

    #[test]
    fn test_every_mode_frames_and_checksums() {
        for mode in ModeCommand::ALL {
            let pkt = mode.encode();
            let bytes = pkt.as_bytes();
            assert_eq!(bytes.len(), PACKET_LEN);
            assert_eq!(bytes[0], FRAME_START);
            assert_eq!(bytes[16], FRAME_END);
            let sum = bytes[1..15].iter().fold(0u8, |s, b| s.wrapping_add(*b));
            assert_eq!(bytes[15], sum, "checksum for {mode}");
        }
    }

    #[test]
    fn test_literal_packets() {
        assert_eq!(
            ModeCommand::NoiseCancelling.encode().as_bytes(),
            &[62, 12, 0, 0, 0, 0, 8, 104, 2, 16, 2, 2, 1, 0, 0, 147, 60]
        );
        assert_eq!(
            ModeCommand::Disabled.encode().as_bytes(),
            &[62, 12, 0, 0, 0, 0, 8, 104, 2, 0, 2, 0, 1, 0, 0, 129, 60]
        );
        assert_eq!(
            ModeCommand::AmbientSound.encode().as_bytes(),
            &[62, 12, 0, 0, 0, 0, 8, 104, 2, 16, 2, 0, 1, 0, 19, 164, 60]
        );
    }

    #[test]
    fn test_parse_names() {
        for mode in ModeCommand::ALL {
            assert_eq!(mode.as_str().parse::<ModeCommand>().unwrap(), mode);
        }
        assert_eq!("off".parse::<ModeCommand>().unwrap(), ModeCommand::Disabled);
        assert!(matches!(
            "loud".parse::<ModeCommand>(),
            Err(Error::UnknownMode(_))
        ));
    }
}
