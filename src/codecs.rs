use std::fmt::Display;

/// Codec names as reported by ffprobe's `codec_name`.
#[derive(Clone, Debug, PartialEq)]
pub enum Codec {
    Unknown(String),
    AAC,
    AC3,
    EAC3,
    DTS,
    TrueHD,
    FLAC,
    Opus,
    MP3,
    H264,
    HEVC,
    AV1,
}

impl Codec {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aac" => Codec::AAC,
            "ac3" => Codec::AC3,
            "eac3" => Codec::EAC3,
            "dts" => Codec::DTS,
            "truehd" => Codec::TrueHD,
            "flac" => Codec::FLAC,
            "opus" => Codec::Opus,
            "mp3" => Codec::MP3,
            "h264" => Codec::H264,
            "hevc" => Codec::HEVC,
            "av1" => Codec::AV1,
            _ => Codec::Unknown(String::from(s)),
        }
    }

    /// ffmpeg encoder used when the output has to be in this codec.
    pub fn encoder(codec: &Codec) -> Option<&'static str> {
        match codec {
            Codec::AAC => Some("aac"),
            Codec::H264 => Some("h264_nvenc"),
            _ => None,
        }
    }

    pub fn is_aac(&self) -> bool {
        *self == Codec::AAC
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Unknown(String::new())
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Unknown(codec) if codec.is_empty() => write!(f, "?"),
            Codec::Unknown(codec) => write!(f, "{}", codec.to_lowercase()),
            _ => write!(f, "{}", format!("{:?}", self).to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Codec::AAC), "aac");
        assert_eq!(format!("{}", Codec::TrueHD), "truehd");
        assert_eq!(format!("{}", Codec::EAC3), "eac3");
        assert_eq!(format!("{}", Codec::Unknown(String::from("PCM_S16LE"))), "pcm_s16le");
        assert_eq!(format!("{}", Codec::default()), "?");
    }

    #[test]
    fn test_from_str_round_trips_ffprobe_names() {
        for name in ["aac", "ac3", "eac3", "dts", "truehd", "flac", "opus", "mp3", "h264", "hevc", "av1"] {
            assert_eq!(Codec::from_str(name).to_string(), name);
        }
        assert_eq!(Codec::from_str("AAC"), Codec::AAC);
    }

    #[test]
    fn test_encoder() {
        assert_eq!(Codec::encoder(&Codec::AAC), Some("aac"));
        assert_eq!(Codec::encoder(&Codec::H264), Some("h264_nvenc"));
        assert_eq!(Codec::encoder(&Codec::DTS), None);
    }
}
