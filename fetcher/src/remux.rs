use anyhow::{bail, ensure};
use bytes::{Bytes, BytesMut};

const TS_PACKET_LEN: usize = 188;
const TS_SYNC: u8 = 0x47;

/// Container-only extraction of the audio elementary stream from one HLS
/// media segment. MPEG-TS payloads are unwrapped packet by packet; segments
/// already carrying raw ADTS (optionally ID3-prefixed) pass through.
pub fn extract_elementary(data: &[u8]) -> anyhow::Result<Bytes> {
    if is_adts(data) || data.starts_with(b"ID3") {
        return Ok(Bytes::copy_from_slice(data));
    }

    ensure!(
        data.len() >= TS_PACKET_LEN && data[0] == TS_SYNC,
        "unrecognized container ({} bytes)",
        data.len()
    );

    let mut out = BytesMut::new();
    let mut audio_pid: Option<u16> = None;

    for packet in data.chunks_exact(TS_PACKET_LEN) {
        if packet[0] != TS_SYNC {
            continue;
        }
        let unit_start = packet[1] & 0x40 != 0;
        let pid = u16::from(packet[1] & 0x1F) << 8 | u16::from(packet[2]);
        let adaptation = (packet[3] >> 4) & 0b11;

        // 0b00 is reserved, 0b10 carries no payload.
        if adaptation == 0b00 || adaptation == 0b10 {
            continue;
        }
        let mut offset = 4;
        if adaptation == 0b11 {
            offset += 1 + packet[4] as usize;
        }
        if offset >= TS_PACKET_LEN {
            continue;
        }
        let payload = &packet[offset..];

        if unit_start && payload.len() > 9 && payload[..3] == [0x00, 0x00, 0x01] {
            let stream_id = payload[3];
            let is_audio = (0xC0..=0xDF).contains(&stream_id);
            if is_audio && (audio_pid.is_none() || audio_pid == Some(pid)) {
                audio_pid = Some(pid);
                let header_len = payload[8] as usize;
                let start = 9 + header_len;
                if start < payload.len() {
                    out.extend_from_slice(&payload[start..]);
                }
            }
        } else if audio_pid == Some(pid) {
            out.extend_from_slice(payload);
        }
    }

    if out.is_empty() {
        bail!("no audio elementary stream found in segment");
    }
    Ok(out.freeze())
}

fn is_adts(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF0 == 0xF0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packet(pid: u16, unit_start: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0xFFu8; TS_PACKET_LEN];
        packet[0] = TS_SYNC;
        packet[1] = (if unit_start { 0x40 } else { 0x00 }) | (pid >> 8) as u8;
        packet[2] = (pid & 0xFF) as u8;
        packet[3] = 0b0001_0000; // payload only
        packet[4..4 + payload.len()].copy_from_slice(payload);
        // Pad the rest with stuffing that still counts as payload; keep the
        // test payloads full-length instead.
        packet.truncate(4 + payload.len());
        packet.resize(TS_PACKET_LEN, 0xAA);
        packet
    }

    fn pes_header(stream_id: u8) -> Vec<u8> {
        // 00 00 01 <sid> len(2) flags(2) header_len=0
        vec![0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80, 0x00, 0x00]
    }

    #[test]
    fn adts_passes_through() {
        let data = [0xFF, 0xF1, 0x50, 0x80, 0x01, 0x02];
        let out = extract_elementary(&data).unwrap();
        assert_eq!(out.as_ref(), &data);
    }

    #[test]
    fn ts_audio_payload_is_unwrapped() {
        let mut first = pes_header(0xC0);
        first.extend_from_slice(b"hello");
        let packets = [
            ts_packet(0x101, true, &first),
            ts_packet(0x101, false, b"world"),
            ts_packet(0x200, false, b"video"),
        ]
        .concat();

        let out = extract_elementary(&packets).unwrap();
        assert!(out.starts_with(b"hello"));
        assert!(!out
            .windows(b"video".len())
            .any(|window| window == b"video"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(extract_elementary(b"not a transport stream").is_err());
    }
}
