//! Byte-level builders for hand-written test files.

/// Wrap raw event bytes (delta + message each) into an `MTrk` chunk.
pub fn track_chunk(events: &[&[u8]]) -> Vec<u8> {
    let body: Vec<u8> = events.iter().flat_map(|e| e.iter().copied()).collect();
    let mut chunk = Vec::with_capacity(body.len() + 8);
    chunk.extend_from_slice(b"MTrk");
    chunk.extend_from_slice(&(body.len() as u32).to_be_bytes());
    chunk.extend_from_slice(&body);
    chunk
}

/// Header chunk followed by the given track chunks.
pub fn smf_bytes(format: u16, ppqn: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&format.to_be_bytes());
    buf.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    buf.extend_from_slice(&ppqn.to_be_bytes());
    for track in tracks {
        buf.extend_from_slice(track);
    }
    buf
}
