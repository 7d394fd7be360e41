//! Software CRC support for the card bus
//!
//! Command tokens and responses are protected by CRC7, data blocks by CRC16.
//! On a 4-lane bus each data lane carries its own CRC16, computed over that
//! lane's bit-stream and interleaved back onto the bus after the payload;
//! [`crc16_stream_trailer`] produces that 8-byte trailer for stream writes
//! the controller cannot checksum in hardware.

/// Longest payload [`crc16_stream_trailer`] accepts, in bytes.
pub const STREAM_CRC_MAX_LEN: usize = 512;
/// Length of the interleaved CRC16 trailer appended to 4-lane stream writes.
pub const STREAM_CRC_TRAILER_LEN: usize = 8;

const LANES: usize = 4;
const LANE_BUF_LEN: usize = STREAM_CRC_MAX_LEN * 2 / 8;

/// CRC7 over the low `bits` bits of `byte`, most significant first.
fn crc7_step(crc: u8, byte: u8, bits: u32) -> u8 {
    let mut crc = crc;
    let mut i = bits;
    while i > 0 {
        i -= 1;
        let bit = (byte >> i) & 0x01;
        let xorb = ((crc >> 6) & 0x01) ^ bit;
        crc = ((crc << 1) & 0x7f) ^ ((xorb << 3) | xorb);
    }
    crc
}

/// CRC16 (x^16 + x^12 + x^5 + 1) over the low `bits` bits of `byte`.
fn crc16_step(crc: u16, byte: u8, bits: u32) -> u16 {
    let mut crc = crc;
    let mut i = bits;
    while i > 0 {
        i -= 1;
        let bit = u16::from((byte >> i) & 0x01);
        let xorb = ((crc >> 15) & 0x01) ^ bit;
        crc = (crc << 1) ^ ((xorb << 12) | (xorb << 5) | xorb);
    }
    crc
}

/// Computes the CRC7 of the first `bit_len` bits of `data`.
///
/// Bits are consumed most-significant first within each byte; a trailing
/// partial byte contributes its low `bit_len % 8` bits. Zero initial value,
/// no final XOR. The caller shifts in the end bit when framing a token.
pub fn crc7(data: &[u8], bit_len: usize) -> u8 {
    let mut crc = 0;
    let mut index = 0;
    while index < bit_len {
        let bits = (bit_len - index).min(8);
        crc = crc7_step(crc, data[index / 8], bits as u32);
        index += bits;
    }
    crc
}

/// Computes the CRC16 of the first `bit_len` bits of `data`.
///
/// Same bit ordering and partial-byte convention as [`crc7`].
pub fn crc16(data: &[u8], bit_len: usize) -> u16 {
    let mut crc = 0;
    let mut index = 0;
    while index < bit_len {
        let bits = (bit_len - index).min(8);
        crc = crc16_step(crc, data[index / 8], bits as u32);
        index += bits;
    }
    crc
}

/// Splits a 4-lane bus byte stream into per-lane bit-streams.
///
/// Each byte is two bus clocks: the high nibble first, bits 7..4 on lanes
/// 3..0, then the low nibble, bits 3..0 on lanes 3..0. Lane streams
/// accumulate most-significant first, two bits per payload byte.
fn split_lanes(lanes: &mut [[u8; LANE_BUF_LEN]; LANES], bus_data: &[u8]) {
    for (i, &byte) in bus_data.iter().enumerate() {
        let index = i / 4;
        for nibble in [byte >> 4, byte & 0x0f] {
            for (lane, stream) in lanes.iter_mut().enumerate() {
                let bit = (nibble >> lane) & 0x01;
                stream[index] = (stream[index] << 1) | bit;
            }
        }
    }
}

/// One bus nibble of CRC bit `bit`, lane 3 in nibble bit 3.
fn crc_nibble(crcs: &[u16; LANES], bit: u32) -> u8 {
    let mut nibble = 0;
    for lane in (0..LANES).rev() {
        nibble = (nibble << 1) | ((crcs[lane] >> bit) & 0x01) as u8;
    }
    nibble
}

/// Interleaves four per-lane CRC16 values back into bus byte order.
///
/// Output byte `i` carries CRC bit `15 - 2i` in its high nibble and bit
/// `14 - 2i` in its low nibble, so the trailer clocks each lane's CRC out
/// most-significant bit first.
fn merge_trailer(crcs: &[u16; LANES]) -> [u8; STREAM_CRC_TRAILER_LEN] {
    let mut trailer = [0; STREAM_CRC_TRAILER_LEN];
    for (i, out) in trailer.iter_mut().enumerate() {
        let hi_bit = (15 - 2 * i) as u32;
        *out = (crc_nibble(crcs, hi_bit) << 4) | crc_nibble(crcs, hi_bit - 1);
    }
    trailer
}

/// Computes the 8-byte interleaved CRC16 trailer for a 4-lane stream write.
///
/// Returns `None` when `bus_data` exceeds [`STREAM_CRC_MAX_LEN`]; no trailer
/// exists for such a payload and the caller must not extend the transfer.
pub fn crc16_stream_trailer(bus_data: &[u8]) -> Option<[u8; STREAM_CRC_TRAILER_LEN]> {
    if bus_data.len() > STREAM_CRC_MAX_LEN {
        return None;
    }
    let mut lanes = [[0; LANE_BUF_LEN]; LANES];
    split_lanes(&mut lanes, bus_data);
    let lane_bits = bus_data.len() * 2;
    let mut crcs = [0; LANES];
    for (stream, crc) in lanes.iter().zip(crcs.iter_mut()) {
        *crc = crc16(stream, lane_bits);
    }
    Some(merge_trailer(&crcs))
}
