use worker::ContentTypeSniffer;

const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"\x00asm", "application/wasm"),
    (b"PK\x03\x04", "application/zip"),
];

/// Magic bytes first, then the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeSniffer;

impl ContentTypeSniffer for MimeSniffer {
    fn sniff(&self, bytes: &[u8], file_name: Option<&str>) -> Option<String> {
        for (magic, mime) in MAGIC {
            if bytes.starts_with(magic) {
                return Some((*mime).to_string());
            }
        }
        if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"WEBP"[..]) {
            return Some("image/webp".to_string());
        }
        if looks_like_html(bytes) {
            return Some("text/html; charset=utf-8".to_string());
        }
        file_name
            .and_then(|name| mime_guess::from_path(name).first())
            .map(|mime| mime.essence_str().to_string())
    }
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html")
}
