// Ethernet/IPv4 header validation. Every classifier goes through
// `parse_ipv4` before touching anything structured; a frame that fails here
// is never-overlay traffic and is left to the default stack.

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_MIN_HDR_LEN: usize = 20;

/// Bytes a classifier must be able to read before it may classify: Ethernet
/// header plus a minimal IPv4 header.
pub const FRAME_HDR_LEN: usize = ETH_HDR_LEN + IPV4_MIN_HDR_LEN;

pub const ETH_DST_OFFSET: usize = 0;
pub const ETH_SRC_OFFSET: usize = 6;

const ETHERTYPE_OFFSET: usize = 12;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPV4_SRC_OFFSET: usize = ETH_HDR_LEN + 12;
const IPV4_DST_OFFSET: usize = ETH_HDR_LEN + 16;

/// Source and destination address of a validated IPv4 frame, native-endian.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Addrs {
    pub src: u32,
    pub dst: u32,
}

/// Validate the fixed-size header prefix of a frame and extract its
/// addresses. Returns `None` for non-IPv4 ethertypes and for payloads whose
/// version nibble is not 4 (a stale ethertype on a malformed frame).
///
/// Taking the prefix by fixed-size array makes truncation the caller's
/// problem: an eBPF program gets here only if its bounded `load` of
/// `FRAME_HDR_LEN` bytes succeeded, userspace only via [`parse_frame`].
#[inline(always)]
pub fn parse_ipv4(hdr: &[u8; FRAME_HDR_LEN]) -> Option<Ipv4Addrs> {
    let ethertype = u16::from_be_bytes([hdr[ETHERTYPE_OFFSET], hdr[ETHERTYPE_OFFSET + 1]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    if hdr[ETH_HDR_LEN] >> 4 != 4 {
        return None;
    }
    Some(Ipv4Addrs {
        src: read_be32(hdr, IPV4_SRC_OFFSET),
        dst: read_be32(hdr, IPV4_DST_OFFSET),
    })
}

/// Slice-based entry point for userspace callers; truncated frames fail
/// here.
pub fn parse_frame(frame: &[u8]) -> Option<Ipv4Addrs> {
    let hdr: &[u8; FRAME_HDR_LEN] = frame.get(..FRAME_HDR_LEN)?.try_into().ok()?;
    parse_ipv4(hdr)
}

#[inline(always)]
fn read_be32(hdr: &[u8; FRAME_HDR_LEN], offset: usize) -> u32 {
    u32::from_be_bytes([hdr[offset], hdr[offset + 1], hdr[offset + 2], hdr[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(src: [u8; 4], dst: [u8; 4]) -> [u8; FRAME_HDR_LEN] {
        let mut frame = [0u8; FRAME_HDR_LEN];
        frame[ETHERTYPE_OFFSET] = 0x08;
        frame[ETHERTYPE_OFFSET + 1] = 0x00;
        frame[ETH_HDR_LEN] = 0x45;
        frame[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4].copy_from_slice(&src);
        frame[IPV4_DST_OFFSET..IPV4_DST_OFFSET + 4].copy_from_slice(&dst);
        frame
    }

    #[test]
    fn parses_addresses_from_valid_frame() {
        let frame = ipv4_frame([10, 1, 0, 2], [10, 1, 1, 3]);
        let addrs = parse_ipv4(&frame).expect("valid frame");
        assert_eq!(addrs.src, u32::from_be_bytes([10, 1, 0, 2]));
        assert_eq!(addrs.dst, u32::from_be_bytes([10, 1, 1, 3]));
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = ipv4_frame([10, 1, 0, 2], [10, 1, 1, 3]);
        // ARP
        frame[ETHERTYPE_OFFSET] = 0x08;
        frame[ETHERTYPE_OFFSET + 1] = 0x06;
        assert_eq!(parse_ipv4(&frame), None);
    }

    #[test]
    fn rejects_wrong_ip_version() {
        let mut frame = ipv4_frame([10, 1, 0, 2], [10, 1, 1, 3]);
        frame[ETH_HDR_LEN] = 0x60;
        assert_eq!(parse_ipv4(&frame), None);
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = ipv4_frame([10, 1, 0, 2], [10, 1, 1, 3]);
        assert_eq!(parse_frame(&frame[..FRAME_HDR_LEN - 1]), None);
        assert_eq!(parse_frame(&[]), None);
        assert!(parse_frame(&frame).is_some());
    }
}
