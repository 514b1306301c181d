//! Content type resolution for uploads.

/// Resolves a content type for a blob key.
pub trait MimeTypeResolver: Send + Sync {
    /// The content type of `path`, or `None` if it cannot be determined.
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Resolves content types from the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionMimeTypeResolver;

const TYPES: &[(&str, &str)] = &[
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("gif", "image/gif"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("m4a", "audio/mp4"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("svg", "image/svg+xml"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

impl MimeTypeResolver for ExtensionMimeTypeResolver {
    fn resolve(&self, path: &str) -> Option<String> {
        let name = path.rsplit(['/', '\\']).next()?;
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        TYPES
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, t)| t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_known_extensions() {
        let r = ExtensionMimeTypeResolver;
        assert_eq!(r.resolve("1010/media.jpg").as_deref(), Some("image/jpeg"));
        assert_eq!(r.resolve("1010/MEDIA.PNG").as_deref(), Some("image/png"));
        assert_eq!(r.resolve("forms\\doc.pdf").as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_unknown_extensions_are_none() {
        let r = ExtensionMimeTypeResolver;
        assert_eq!(r.resolve("1010/archive.xyz"), None);
        assert_eq!(r.resolve("1010/noext"), None);
        assert_eq!(r.resolve("v1.2/noext"), None);
        assert_eq!(r.resolve(""), None);
    }
}
