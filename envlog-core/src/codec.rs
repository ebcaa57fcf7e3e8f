//! On-flash record format.
//!
//! Every record occupies exactly one page:
//!
//! ```text
//! +----------+----------+----------+-------------+--------+-------------+
//! | magic    | start_ts | end_ts   | num_samples | fields | interval_s  |
//! | 4 bytes  | 4 bytes  | 4 bytes  | 2 bytes     | 1 byte | 4 bytes     |
//! +----------+----------+----------+-------------+--------+-------------+
//! | overflow | sequence | crc32c   | reserved    | elements ...          |
//! | 1 byte   | 4 bytes  | 4 bytes  | 4 bytes     | num_samples * size    |
//! +----------+----------+----------+-------------+-----------------------+
//! ```
//!
//! All integers are big-endian. The CRC covers the header up to the CRC field
//! followed by the element bytes. Bytes past the last element stay erased.

use crate::config::{FieldMask, LogConfig, OverflowPolicy};
use crate::element::Element;
use crate::error::LogError;
use crate::record::Record;
use crate::STORAGE_RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use envlog_flash::{PageId, ERASED_BYTE};

/// Magic bytes for records: "ELOG"
pub const RECORD_MAGIC: [u8; 4] = *b"ELOG";

/// Offset of the CRC field; the checksum covers everything before it.
const CRC_OFFSET: usize = 24;

/// Encodes `record` into the bytes to program at the start of a page.
pub fn encode_record(record: &Record, page_size: usize, max_samples: u16) -> Result<BytesMut, LogError> {
    let config = &record.block_configuration;
    let num_samples = record.num_samples();

    if num_samples == 0 || num_samples > max_samples {
        return Err(LogError::InvalidGeometry {
            reason: format!(
                "record holds {} samples, expected 1..={}",
                num_samples, max_samples
            ),
        });
    }

    let element_size = config.fields.element_size();
    let total_size = STORAGE_RECORD_HEADER_SIZE + num_samples as usize * element_size;
    if total_size > page_size {
        return Err(LogError::InvalidGeometry {
            reason: format!(
                "record needs {} bytes, page holds {}",
                total_size, page_size
            ),
        });
    }

    let mut buf = BytesMut::with_capacity(total_size);

    // Magic (4 bytes)
    buf.put_slice(&RECORD_MAGIC);

    // Timestamps (4 + 4 bytes)
    buf.put_u32(record.start_timestamp_s);
    buf.put_u32(record.end_timestamp_s);

    // Sample count (2 bytes)
    buf.put_u16(num_samples);

    // Configuration snapshot (1 + 4 + 1 bytes)
    buf.put_u8(config.fields.bits());
    buf.put_u32(config.interval_s);
    buf.put_u8(config.overflow as u8);

    // Sequence (4 bytes)
    buf.put_u32(record.sequence);

    // CRC placeholder (4 bytes) and reserved (4 bytes)
    buf.put_u32(0);
    buf.put_u32(0);

    for element in &record.elements {
        element.encode(config.fields, &mut buf);
    }

    let crc = crc32c::crc32c(&buf[..CRC_OFFSET]);
    let crc = crc32c::crc32c_append(crc, &buf[STORAGE_RECORD_HEADER_SIZE..]);
    buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());

    Ok(buf)
}

/// Decodes the record stored in `bytes`, the full contents of `page`.
///
/// Returns `Ok(None)` for an erased page.
pub fn decode_record(page: PageId, bytes: &[u8], max_samples: u16) -> Result<Option<Record>, LogError> {
    if bytes.len() < STORAGE_RECORD_HEADER_SIZE {
        return Err(LogError::corrupt(page, "page shorter than record header"));
    }

    let magic = &bytes[0..4];
    if magic != RECORD_MAGIC {
        if magic.iter().all(|&b| b == ERASED_BYTE) {
            return Ok(None);
        }
        return Err(LogError::corrupt(page, format!("bad magic: {:02x?}", magic)));
    }

    let mut header = &bytes[4..STORAGE_RECORD_HEADER_SIZE];
    let start_timestamp_s = header.get_u32();
    let end_timestamp_s = header.get_u32();
    let num_samples = header.get_u16();
    let fields = FieldMask::from_bits_truncate(header.get_u8());
    let interval_s = header.get_u32();
    let overflow_raw = header.get_u8();
    let sequence = header.get_u32();
    let stored_crc = header.get_u32();

    if num_samples == 0 || num_samples > max_samples {
        return Err(LogError::corrupt(
            page,
            format!("sample count {} outside 1..={}", num_samples, max_samples),
        ));
    }
    if start_timestamp_s > end_timestamp_s {
        return Err(LogError::corrupt(
            page,
            format!(
                "start timestamp {} after end timestamp {}",
                start_timestamp_s, end_timestamp_s
            ),
        ));
    }
    let overflow = OverflowPolicy::try_from(overflow_raw)
        .map_err(|_| LogError::corrupt(page, format!("unknown overflow policy {}", overflow_raw)))?;

    let elements_len = num_samples as usize * fields.element_size();
    let end = STORAGE_RECORD_HEADER_SIZE + elements_len;
    if end > bytes.len() {
        return Err(LogError::corrupt(
            page,
            format!("{} samples overrun the page", num_samples),
        ));
    }

    let body = &bytes[STORAGE_RECORD_HEADER_SIZE..end];
    let crc = crc32c::crc32c_append(crc32c::crc32c(&bytes[..CRC_OFFSET]), body);
    if crc != stored_crc {
        return Err(LogError::corrupt(
            page,
            format!("CRC mismatch: expected {:08x}, got {:08x}", stored_crc, crc),
        ));
    }

    let mut body = body;
    let elements = (0..num_samples)
        .map(|_| Element::decode(&mut body, fields))
        .collect();

    Ok(Some(Record {
        page: Some(page),
        sequence,
        start_timestamp_s,
        end_timestamp_s,
        block_configuration: LogConfig::new(fields, interval_s, overflow),
        elements,
    }))
}
