//! Playable file selection and content types.

use std::path::Path;

use crate::engine::TorrentFile;

/// Extensions treated as playable media.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "avi", "mov", "wmv", "flv", "mpg", "mpeg", "ts", "m2ts", "ogv",
    "mp3", "m4a", "flac", "ogg", "opus", "wav",
];

/// Whether `name` has a recognised media extension.
pub fn is_media_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Index of the largest media file, the first one on ties.
pub fn select_playable_file(files: &[TorrentFile]) -> Option<usize> {
    files
        .iter()
        .enumerate()
        .filter(|(_, file)| file.length > 0 && is_media_file(&file.name))
        .fold(None, |best: Option<(usize, u64)>, (index, file)| match best {
            Some((_, length)) if length >= file.length => best,
            _ => Some((index, file.length)),
        })
        .map(|(index, _)| index)
}

/// MIME type from the file extension, `application/octet-stream` if unknown.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, u64)]) -> Vec<TorrentFile> {
        let mut offset = 0;
        entries
            .iter()
            .map(|(name, length)| {
                let file = TorrentFile::new(*name, *length, offset);
                offset += length;
                file
            })
            .collect()
    }

    #[test]
    fn test_largest_media_file_wins() {
        let files = files(&[
            ("Movie/sample.mkv", 50),
            ("Movie/movie.nfo", 9_000),
            ("Movie/movie.mkv", 5_000),
            ("Movie/extras.mp4", 700),
        ]);
        assert_eq!(select_playable_file(&files), Some(2));
    }

    #[test]
    fn test_ties_keep_first_file() {
        let files = files(&[("a.mp4", 10), ("b.mp4", 10)]);
        assert_eq!(select_playable_file(&files), Some(0));
    }

    #[test]
    fn test_no_media_file() {
        let files = files(&[("readme.txt", 10), ("empty.mp4", 0)]);
        assert_eq!(select_playable_file(&files), None);
        assert_eq!(select_playable_file(&[]), None);
    }

    #[test]
    fn test_extension_case_insensitive() {
        assert!(is_media_file("MOVIE.MP4"));
        assert!(!is_media_file("mp4"));
        assert!(!is_media_file("notes.txt"));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("movie.mp4"), "video/mp4");
        assert_eq!(content_type_for("clip.webm"), "video/webm");
        assert_eq!(content_type_for("movie.unknownext"), "application/octet-stream");
    }
}
