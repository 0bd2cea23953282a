//! Content hashing for render caching and determinism checks.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::picture::Picture;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    fn finish(hasher: Sha256) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self::from_bytes(bytes)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash the pixels of a picture. Dimensions and depth are part of the hash
/// so identical planes at different sizes do not collide.
pub fn hash_picture(picture: &Picture) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(picture.width.to_le_bytes());
    hasher.update(picture.height.to_le_bytes());
    hasher.update([picture.depth.bits()]);
    for plane in [&picture.r, &picture.g, &picture.b] {
        for v in plane.iter() {
            hasher.update(v.to_le_bytes());
        }
    }
    match &picture.a {
        Some(alpha) => {
            hasher.update([1]);
            for v in alpha {
                hasher.update(v.to_bits().to_le_bytes());
            }
        }
        None => hasher.update([0]),
    }
    ContentHash::finish(hasher)
}

/// Record fields that name a file a clip reads pixels from.
const FILE_FIELDS: [&str; 2] = ["FilePath", "FontFile"];

/// Incremental fingerprint of one timeline frame request.
///
/// Covers the frame index, the output size, the records of the active clips
/// and the identity (length and modification time) of every file those
/// records reference, so an edited source file yields a new fingerprint.
pub struct FrameFingerprint {
    hasher: Sha256,
}

impl FrameFingerprint {
    pub fn new(frame: u32, width: u32, height: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(frame.to_le_bytes());
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        Self { hasher }
    }

    /// Scope the fingerprint, e.g. to one clip set.
    pub fn salt(mut self, salt: &str) -> Self {
        self.hasher.update(b"salt:");
        self.hasher.update(salt.as_bytes());
        self.hasher.update([0x1e]);
        self
    }

    /// Add one clip record and the files it references.
    pub fn record(mut self, record: &Value) -> Self {
        // serde_json::Map is ordered by key, so this text is stable.
        self.hasher.update(record.to_string().as_bytes());
        self.hasher.update([0x1e]);
        for path in referenced_files(record) {
            self = self.file(&path);
        }
        self
    }

    /// Add the identity of the file at `path`. A missing file hashes as such.
    pub fn file(mut self, path: &Path) -> Self {
        self.hasher.update(path.to_string_lossy().as_bytes());
        match std::fs::metadata(path) {
            Ok(meta) => {
                self.hasher.update(meta.len().to_le_bytes());
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                self.hasher.update(modified.to_le_bytes());
            }
            Err(_) => self.hasher.update(b"missing"),
        }
        self.hasher.update([0x1e]);
        self
    }

    pub fn finish(self) -> ContentHash {
        ContentHash::finish(self.hasher)
    }
}

/// Fingerprint of one timeline frame: the frame index, the output size and
/// the serialized records of the clips active at that frame, in order,
/// together with the files they reference.
pub fn fingerprint_frame(frame: u32, width: u32, height: u32, records: &[Value]) -> ContentHash {
    records
        .iter()
        .fold(FrameFingerprint::new(frame, width, height), |fp, r| fp.record(r))
        .finish()
}

/// Every non-empty `FilePath` or `FontFile` value in `record`, at any depth.
/// Virtual sources (paths starting with `#`) are skipped.
pub fn referenced_files(record: &Value) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files(record, &mut files);
    files
}

fn collect_files(value: &Value, out: &mut Vec<PathBuf>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::String(s)
                        if FILE_FIELDS.contains(&key.as_str())
                            && !s.is_empty()
                            && !s.starts_with('#') =>
                    {
                        out.push(PathBuf::from(s))
                    }
                    other => collect_files(other, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_files(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use serde_json::json;

    #[test]
    fn test_hash_deterministic() {
        let a = Picture::solid(10, 10, &Color::RED);
        let b = Picture::solid(10, 10, &Color::RED);
        assert_eq!(hash_picture(&a), hash_picture(&b));
    }

    #[test]
    fn test_hash_differs_by_content_and_size() {
        let red = Picture::solid(10, 10, &Color::RED);
        let blue = Picture::solid(10, 10, &Color::BLUE);
        let wide = Picture::solid(20, 5, &Color::RED);
        assert_ne!(hash_picture(&red), hash_picture(&blue));
        assert_ne!(hash_picture(&red), hash_picture(&wide));
    }

    #[test]
    fn test_hash_sees_alpha() {
        let opaque = Picture::solid(2, 2, &Color::RED);
        let explicit = Picture::solid(2, 2, &Color::rgba16(65535, 0, 0, 1.0));
        assert_ne!(hash_picture(&opaque), hash_picture(&explicit));
    }

    #[test]
    fn test_fingerprint() {
        let records = vec![json!({ "Id": "a", "LayerIndex": 1 })];
        let first = fingerprint_frame(5, 64, 64, &records);
        assert_eq!(first, fingerprint_frame(5, 64, 64, &records));
        assert_ne!(first, fingerprint_frame(6, 64, 64, &records));
        assert_ne!(first, fingerprint_frame(5, 64, 64, &[]));
        assert_eq!(first.to_hex().len(), 64);
    }

    #[test]
    fn test_referenced_files_walks_nested_entries() {
        let record = json!({
            "FilePath": "/media/a.png",
            "TextEntries": [
                { "Text": "hi", "FontFile": "/fonts/b.ttf" },
                { "Text": "no font", "FontFile": "" }
            ],
            "Effects": [{ "Arguments": { "FilePath": "#virtual" } }]
        });
        assert_eq!(
            referenced_files(&record),
            vec![PathBuf::from("/media/a.png"), PathBuf::from("/fonts/b.ttf")]
        );
    }

    #[test]
    fn test_fingerprint_follows_file_changes() {
        let path = std::env::temp_dir().join(format!("framecut_hash_{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"first").unwrap();
        let records = vec![json!({ "Id": "p", "FilePath": path.to_string_lossy() })];
        let before = fingerprint_frame(1, 8, 8, &records);
        assert_eq!(before, fingerprint_frame(1, 8, 8, &records));

        // Same length, later modification time.
        std::fs::write(&path, b"secnd").unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
        drop(file);
        let edited = fingerprint_frame(1, 8, 8, &records);
        assert_ne!(before, edited);

        std::fs::remove_file(&path).unwrap();
        assert_ne!(edited, fingerprint_frame(1, 8, 8, &records));
    }

    #[test]
    fn test_salt_scopes_fingerprint() {
        let record = json!({ "Id": "a" });
        let plain = FrameFingerprint::new(0, 4, 4).record(&record).finish();
        let salted = FrameFingerprint::new(0, 4, 4).salt("set-1").record(&record).finish();
        assert_ne!(plain, salted);
        assert_ne!(
            salted,
            FrameFingerprint::new(0, 4, 4).salt("set-2").record(&record).finish()
        );
    }
}
