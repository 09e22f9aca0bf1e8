use chrono::{DateTime, Datelike, Timelike, Utc};
use once_cell::sync::Lazy;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const ZIP_VERSION: u16 = 20;
const METHOD_STORE: u16 = 0;

/// One file to pack. Exists only for the duration of a build.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    pub modified: DateTime<Utc>,
}

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut crc = n as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                0xEDB8_8320 ^ (crc >> 1)
            } else {
                crc >> 1
            };
        }
        *slot = crc;
    }
    table
});

/// Standard reflected CRC-32 (polynomial 0xEDB88320), table-driven.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Pack entries into a store-only ZIP: local header + raw bytes per
/// entry, then the central directory, then the end record. Everything is
/// little-endian and byte-exact so standard extractors accept it.
pub fn build_archive(entries: &[ArchiveEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for entry in entries {
        let offset = out.len() as u32;
        let crc = crc32(&entry.bytes);
        let size = entry.bytes.len() as u32;
        let time = dos_time(&entry.modified);
        let date = dos_date(&entry.modified);
        let name = entry.name.as_bytes();

        push_u32(&mut out, LOCAL_HEADER_SIG);
        push_u16(&mut out, ZIP_VERSION);
        push_u16(&mut out, 0); // general purpose flags
        push_u16(&mut out, METHOD_STORE);
        push_u16(&mut out, time);
        push_u16(&mut out, date);
        push_u32(&mut out, crc);
        push_u32(&mut out, size); // compressed == uncompressed for store
        push_u32(&mut out, size);
        push_u16(&mut out, name.len() as u16);
        push_u16(&mut out, 0); // extra field length
        out.extend_from_slice(name);
        out.extend_from_slice(&entry.bytes);

        push_u32(&mut central, CENTRAL_DIR_SIG);
        push_u16(&mut central, ZIP_VERSION); // version made by
        push_u16(&mut central, ZIP_VERSION); // version needed
        push_u16(&mut central, 0);
        push_u16(&mut central, METHOD_STORE);
        push_u16(&mut central, time);
        push_u16(&mut central, date);
        push_u32(&mut central, crc);
        push_u32(&mut central, size);
        push_u32(&mut central, size);
        push_u16(&mut central, name.len() as u16);
        push_u16(&mut central, 0); // extra field length
        push_u16(&mut central, 0); // comment length
        push_u16(&mut central, 0); // disk number start
        push_u16(&mut central, 0); // internal attributes
        push_u32(&mut central, 0); // external attributes
        push_u32(&mut central, offset);
        central.extend_from_slice(name);
    }

    let central_offset = out.len() as u32;
    let central_size = central.len() as u32;
    out.extend_from_slice(&central);

    push_u32(&mut out, END_OF_CENTRAL_DIR_SIG);
    push_u16(&mut out, 0); // this disk
    push_u16(&mut out, 0); // disk with central directory
    push_u16(&mut out, entries.len() as u16);
    push_u16(&mut out, entries.len() as u16);
    push_u32(&mut out, central_size);
    push_u32(&mut out, central_offset);
    push_u16(&mut out, 0); // comment length
    out
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn dos_time(t: &DateTime<Utc>) -> u16 {
    ((t.hour() << 11) | (t.minute() << 5) | (t.second() / 2)) as u16
}

// The DOS date format cannot represent years before 1980; clamp to its
// first representable day.
fn dos_date(t: &DateTime<Utc>) -> u16 {
    if t.year() < 1980 {
        return (1 << 5) | 1;
    }
    let year = (t.year() - 1980) as u32;
    ((year << 9) | (t.month() << 5) | t.day()) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, bytes: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            bytes: bytes.to_vec(),
            modified: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 42).unwrap(),
        }
    }

    fn read_u16(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn crc32_matches_reference_values() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"AB"), 0x3069_4C07);
        assert_eq!(crc32(b"hello world"), 0x0D4A_1185);
    }

    #[test]
    fn empty_archive_is_bare_end_record() {
        let archive = build_archive(&[]);
        assert_eq!(archive.len(), 22);
        assert_eq!(read_u32(&archive, 0), END_OF_CENTRAL_DIR_SIG);
        assert_eq!(read_u16(&archive, 8), 0); // entries on this disk
        assert_eq!(read_u16(&archive, 10), 0); // entries total
        assert_eq!(read_u32(&archive, 12), 0); // central directory size
        assert_eq!(read_u32(&archive, 16), 0); // central directory offset
    }

    #[test]
    fn single_entry_layout_is_byte_exact() {
        let archive = build_archive(&[entry("a.txt", &[0x41, 0x42])]);

        // Local header.
        assert_eq!(read_u32(&archive, 0), LOCAL_HEADER_SIG);
        assert_eq!(read_u16(&archive, 8), METHOD_STORE);
        assert_eq!(read_u32(&archive, 14), 0x3069_4C07); // crc of "AB"
        assert_eq!(read_u32(&archive, 18), 2); // compressed size
        assert_eq!(read_u32(&archive, 22), 2); // uncompressed size
        assert_eq!(read_u16(&archive, 26), 5); // name length
        assert_eq!(&archive[30..35], b"a.txt");
        assert_eq!(&archive[35..37], &[0x41, 0x42]);

        // Central directory right after the data.
        let central_at = 37;
        assert_eq!(read_u32(&archive, central_at), CENTRAL_DIR_SIG);
        assert_eq!(read_u32(&archive, central_at + 16), 0x3069_4C07);
        assert_eq!(read_u32(&archive, central_at + 42), 0); // local offset
        assert_eq!(&archive[central_at + 46..central_at + 51], b"a.txt");

        // End record.
        let end_at = central_at + 51;
        assert_eq!(read_u32(&archive, end_at), END_OF_CENTRAL_DIR_SIG);
        assert_eq!(read_u16(&archive, end_at + 8), 1);
        assert_eq!(read_u16(&archive, end_at + 10), 1);
        assert_eq!(read_u32(&archive, end_at + 12), 51); // central size
        assert_eq!(read_u32(&archive, end_at + 16), 37); // central offset
        assert_eq!(archive.len(), end_at + 22);
    }

    #[test]
    fn offsets_accumulate_across_entries() {
        let archive = build_archive(&[entry("a", b"xy"), entry("bb", b"z")]);
        // First local record: 30 + 1 + 2 = 33 bytes, so the second entry's
        // central record points at offset 33.
        let second_central_at = 33 + 33 + 46 + 1;
        assert_eq!(read_u32(&archive, second_central_at), CENTRAL_DIR_SIG);
        assert_eq!(read_u32(&archive, second_central_at + 42), 33);
    }

    #[test]
    fn dos_timestamp_packs_fields() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 42).unwrap();
        assert_eq!(dos_time(&t), (10 << 11) | (30 << 5) | 21);
        assert_eq!(dos_date(&t), ((2024 - 1980) << 9) | (3 << 5) | 15);
    }

    #[test]
    fn years_before_1980_clamp_to_epoch_of_the_format() {
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(dos_date(&t), (1 << 5) | 1);
    }
}
