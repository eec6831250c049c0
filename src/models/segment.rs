use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::job::PathField;

/// A separately composed clip of the final video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentKind {
    Intro,
    Short,
    Bumper,
    Main,
    Outro,
}

impl SegmentKind {
    /// Order in which segments appear in the final video.
    pub const ASSEMBLY_ORDER: [SegmentKind; 5] = [
        SegmentKind::Intro,
        SegmentKind::Short,
        SegmentKind::Bumper,
        SegmentKind::Main,
        SegmentKind::Outro,
    ];

    pub fn path_field(&self) -> PathField {
        match self {
            SegmentKind::Intro => PathField::IntroVideoPath,
            SegmentKind::Short => PathField::ShortVideoPath,
            SegmentKind::Bumper => PathField::BumperVideoPath,
            SegmentKind::Main => PathField::MainVideoPath,
            SegmentKind::Outro => PathField::OutroVideoPath,
        }
    }

    pub fn file_name(&self, job_id: i64) -> String {
        format!("{}_video_{}.mp4", <&'static str>::from(self), job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(SegmentKind::Bumper.file_name(42), "bumper_video_42.mp4");
    }

    #[test]
    fn test_order_starts_with_intro_and_ends_with_outro() {
        assert_eq!(SegmentKind::ASSEMBLY_ORDER.first(), Some(&SegmentKind::Intro));
        assert_eq!(SegmentKind::ASSEMBLY_ORDER.last(), Some(&SegmentKind::Outro));
    }
}
