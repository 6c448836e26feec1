//! Leading-byte signatures of the media containers we accept.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// MPEG transport stream packet size.
pub const TS_PACKET_LEN: usize = 188;

/// Bytes read from the head of a file when sniffing its container: enough to
/// see the sync byte of the first three transport stream packets.
pub const SNIFF_LEN: usize = 2 * TS_PACKET_LEN + 1;

const TS_SYNC: u8 = 0x47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    IsoBmff,
    Riff,
    Matroska,
    MpegTs,
    Flv,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::IsoBmff => "iso_bmff",
            ContainerKind::Riff => "riff",
            ContainerKind::Matroska => "matroska",
            ContainerKind::MpegTs => "mpeg_ts",
            ContainerKind::Flv => "flv",
        }
    }

    /// File extension for an unmodified copy of this container.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::IsoBmff => "mp4",
            ContainerKind::Riff => "avi",
            ContainerKind::Matroska => "mkv",
            ContainerKind::MpegTs => "ts",
            ContainerKind::Flv => "flv",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn detect_container(head: &[u8]) -> Option<ContainerKind> {
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return Some(ContainerKind::IsoBmff);
    }
    if head.starts_with(b"RIFF") {
        return Some(ContainerKind::Riff);
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(ContainerKind::Matroska);
    }
    if head.starts_with(b"FLV") {
        return Some(ContainerKind::Flv);
    }
    if is_transport_stream(head) {
        return Some(ContainerKind::MpegTs);
    }
    None
}

/// Sync byte at the start of the first two packets, and of the third when the
/// head reaches it. A lone sync byte is not enough.
fn is_transport_stream(head: &[u8]) -> bool {
    head.len() > TS_PACKET_LEN
        && head
            .iter()
            .step_by(TS_PACKET_LEN)
            .take(3)
            .all(|byte| *byte == TS_SYNC)
}

/// Sniffs the container of a file on disk. Unreadable or empty files yield `None`.
pub async fn sniff_file(path: &Path) -> std::io::Result<Option<ContainerKind>> {
    let mut file = File::open(path).await?;
    let mut head = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let read = file.read(&mut head[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(detect_container(&head[..filled]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packets(count: usize) -> Vec<u8> {
        let mut packet = vec![0u8; TS_PACKET_LEN];
        packet[0] = TS_SYNC;
        packet[1] = 0x40;
        packet.repeat(count)
    }

    #[test]
    fn recognizes_known_signatures() {
        let mp4 = [0, 0, 0, 0x20, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm'];
        assert_eq!(detect_container(&mp4), Some(ContainerKind::IsoBmff));
        assert_eq!(detect_container(b"RIFF\0\0\0\0AVI "), Some(ContainerKind::Riff));
        assert_eq!(
            detect_container(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            Some(ContainerKind::Matroska)
        );
        assert_eq!(detect_container(&ts_packets(3)), Some(ContainerKind::MpegTs));
        assert_eq!(
            detect_container(&ts_packets(2)[..TS_PACKET_LEN + 1]),
            Some(ContainerKind::MpegTs)
        );
        assert_eq!(detect_container(b"FLV\x01\x05"), Some(ContainerKind::Flv));
    }

    #[test]
    fn html_and_short_input_do_not_match() {
        assert_eq!(detect_container(b"<!DOCTYPE html><html>"), None);
        assert_eq!(detect_container(b""), None);
        assert_eq!(detect_container(b"\0\0\0"), None);
    }

    #[test]
    fn text_starting_with_sync_byte_is_not_a_transport_stream() {
        assert_eq!(detect_container(b"Gateway Time-out\n"), None);
        assert_eq!(detect_container(b"GIF89a\x01\x00\x01\x00"), None);
        assert_eq!(detect_container(b"GET / HTTP/1.1\r\nHost: cdn\r\n"), None);

        let mut page = b"Gateway Time-out: ".to_vec();
        page.resize(SNIFF_LEN, b'.');
        assert_eq!(detect_container(&page), None);

        let mut broken = ts_packets(3);
        broken[2 * TS_PACKET_LEN] = b'x';
        assert_eq!(detect_container(&broken), None);
    }

    #[tokio::test]
    async fn sniffs_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, b"\0\0\0\x18ftypmp42rest-of-file").unwrap();
        assert_eq!(sniff_file(&path).await.unwrap(), Some(ContainerKind::IsoBmff));
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(sniff_file(&empty).await.unwrap(), None);

        let stream = dir.path().join("clip.ts");
        std::fs::write(&stream, ts_packets(8)).unwrap();
        assert_eq!(sniff_file(&stream).await.unwrap(), Some(ContainerKind::MpegTs));
    }
}
