use crate::{innertube::RawFormat, model::MediaKind};

pub const QUALITY_LADDER: [&str; 3] = ["360p", "480p", "720p"];

/// Picks the format to relay for `kind`, ignoring anything without a
/// direct URL (signature-ciphered entries).
pub fn select_format<'a>(
    kind: MediaKind,
    progressive: &'a [RawFormat],
    adaptive: &'a [RawFormat],
) -> Option<&'a RawFormat> {
    match kind {
        MediaKind::Video => select_progressive(progressive),
        MediaKind::Audio => select_audio(adaptive),
    }
}

pub fn select_progressive(formats: &[RawFormat]) -> Option<&RawFormat> {
    let playable: Vec<&RawFormat> = formats.iter().filter(|f| f.url.is_some()).collect();

    for label in QUALITY_LADDER {
        if let Some(format) = playable
            .iter()
            .find(|f| f.quality_label.as_deref() == Some(label))
        {
            return Some(*format);
        }
    }

    playable
        .into_iter()
        .min_by_key(|f| (f.height.unwrap_or(u32::MAX), f.bitrate))
}

pub fn select_audio(formats: &[RawFormat]) -> Option<&RawFormat> {
    formats
        .iter()
        .filter(|f| f.url.is_some() && f.mime_type.starts_with("audio/"))
        .max_by_key(|f| f.bitrate)
}
