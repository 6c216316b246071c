//! Binary layout for the capsule package format
//!
//! Pure encode/decode of the fixed 64-byte header and the variable-length
//! file-index entries. No I/O happens here; the builder and loader hand
//! byte buffers in and out.
//!
//! **Layout** (all integers little-endian):
//!
//! ```text
//! Header (64 bytes):
//!   magic(4) version(2) flags(2) file_count(4)
//!   index_offset(8) data_offset(8) enc_method(1) comp_method(1)
//!   reserved(34, zero)
//! FileEntry (variable):
//!   name_len(2) name(n) offset(8) size(8) orig_size(8) hash(32) flags(2)
//! ```
//!
//! Entry offsets are relative to the data-section start, not absolute.

use crate::error::{PackageError, Result};

/// Package file magic: "CAPS"
pub const MAGIC: [u8; 4] = *b"CAPS";

/// Current (and only accepted) format version
pub const VERSION: u16 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Size of the key-derivation salt stored after the header
pub const SALT_SIZE: usize = 32;

/// Size of the per-entry content hash (SHA-256)
pub const HASH_SIZE: usize = 32;

/// Header flag: data section entries are encrypted
pub const FLAG_ENCRYPTED: u16 = 0b01;

/// Header flag: data section entries are compressed
pub const FLAG_COMPRESSED: u16 = 0b10;

/// Fixed portion of an encoded entry (everything except the name bytes)
const ENTRY_FIXED_SIZE: usize = 2 + 8 + 8 + 8 + HASH_SIZE + 2;

/// Encryption method stored in the header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None = 0,
    Aes256Gcm = 1,
}

impl EncryptionMethod {
    /// Parse a method id. Unknown ids are a hard format error, not a default.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EncryptionMethod::None),
            1 => Ok(EncryptionMethod::Aes256Gcm),
            other => Err(PackageError::UnknownEncryptionMethod(other)),
        }
    }
}

/// Compression method stored in the header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None = 0,
    Deflate = 1,
}

impl CompressionMethod {
    /// Parse a method id. Unknown ids are a hard format error, not a default.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Deflate),
            other => Err(PackageError::UnknownCompressionMethod(other)),
        }
    }
}

/// Package header (first 64 bytes of the file)
#[derive(Debug, Clone, Copy)]
pub struct PackageHeader {
    /// Magic number: "CAPS"
    pub magic: [u8; 4],

    /// Format version
    pub version: u16,

    /// Flags bitfield (bit0 = encrypted, bit1 = compressed)
    pub flags: u16,

    /// Number of entries in the index
    pub file_count: u32,

    /// Absolute byte offset of the index
    pub index_offset: u64,

    /// Absolute byte offset of the data section
    pub data_offset: u64,

    /// Encryption method id
    pub enc_method: EncryptionMethod,

    /// Compression method id
    pub comp_method: CompressionMethod,
}

impl PackageHeader {
    pub fn new() -> Self {
        PackageHeader {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            file_count: 0,
            index_offset: 0,
            data_offset: 0,
            enc_method: EncryptionMethod::None,
            comp_method: CompressionMethod::None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Serialize header to exactly [`HEADER_SIZE`] bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.file_count.to_le_bytes());
        bytes.extend_from_slice(&self.index_offset.to_le_bytes());
        bytes.extend_from_slice(&self.data_offset.to_le_bytes());
        bytes.push(self.enc_method as u8);
        bytes.push(self.comp_method as u8);

        // Reserved region, zero-padded
        bytes.resize(HEADER_SIZE, 0);

        bytes
    }

    /// Deserialize and validate a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PackageError::TruncatedHeader {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(PackageError::InvalidMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(PackageError::UnsupportedVersion { version });
        }

        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
        let file_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[12..20]);
        let index_offset = u64::from_le_bytes(buf);
        buf.copy_from_slice(&bytes[20..28]);
        let data_offset = u64::from_le_bytes(buf);

        let enc_method = EncryptionMethod::from_u8(bytes[28])?;
        let comp_method = CompressionMethod::from_u8(bytes[29])?;

        Ok(PackageHeader {
            magic,
            version,
            flags,
            file_count,
            index_offset,
            data_offset,
            enc_method,
            comp_method,
        })
    }
}

impl Default for PackageHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One file-index entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Logical path inside the package (forward slashes)
    pub name: String,

    /// Byte offset of the stored payload, relative to the data-section start
    pub offset: u64,

    /// Stored payload size (after compression/encryption)
    pub size: u64,

    /// Plaintext size before any transform
    pub orig_size: u64,

    /// SHA-256 of the original, untransformed plaintext
    pub hash: [u8; HASH_SIZE],

    /// Reserved entry flags
    pub entry_flags: u16,
}

impl FileEntry {
    /// Encoded byte length of this entry
    pub fn encoded_len(&self) -> usize {
        ENTRY_FIXED_SIZE + self.name.len()
    }

    /// Append the encoded entry to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let name = self.name.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(PackageError::InvalidInput(format!(
                "entry name too long: {} bytes",
                name.len()
            )));
        }

        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.orig_size.to_le_bytes());
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.entry_flags.to_le_bytes());

        Ok(())
    }

    /// Decode one entry starting at `offset` in `buf`.
    ///
    /// Returns the entry and the number of bytes consumed, so index parsing
    /// can loop over a contiguous buffer without external length tracking.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(FileEntry, usize)> {
        let remaining = &buf[offset.min(buf.len())..];
        if remaining.len() < 2 {
            return Err(PackageError::InvalidIndex(
                "truncated entry: missing name length".into(),
            ));
        }

        let name_len = u16::from_le_bytes([remaining[0], remaining[1]]) as usize;
        let total = ENTRY_FIXED_SIZE + name_len;
        if remaining.len() < total {
            return Err(PackageError::InvalidIndex(format!(
                "truncated entry: need {} bytes, have {}",
                total,
                remaining.len()
            )));
        }

        let name = std::str::from_utf8(&remaining[2..2 + name_len])
            .map_err(|_| PackageError::InvalidIndex("entry name is not UTF-8".into()))?
            .to_string();

        let mut cursor = 2 + name_len;
        let mut buf8 = [0u8; 8];

        buf8.copy_from_slice(&remaining[cursor..cursor + 8]);
        let payload_offset = u64::from_le_bytes(buf8);
        cursor += 8;

        buf8.copy_from_slice(&remaining[cursor..cursor + 8]);
        let size = u64::from_le_bytes(buf8);
        cursor += 8;

        buf8.copy_from_slice(&remaining[cursor..cursor + 8]);
        let orig_size = u64::from_le_bytes(buf8);
        cursor += 8;

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&remaining[cursor..cursor + HASH_SIZE]);
        cursor += HASH_SIZE;

        let entry_flags = u16::from_le_bytes([remaining[cursor], remaining[cursor + 1]]);
        cursor += 2;

        Ok((
            FileEntry {
                name,
                offset: payload_offset,
                size,
                orig_size,
                hash,
                entry_flags,
            },
            cursor,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = PackageHeader::new();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.flags, 0);
        assert!(!header.is_encrypted());
        assert!(!header.is_compressed());
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = PackageHeader::new();
        header.flags = FLAG_ENCRYPTED | FLAG_COMPRESSED;
        header.file_count = 42;
        header.index_offset = 96;
        header.data_offset = 4096;
        header.enc_method = EncryptionMethod::Aes256Gcm;
        header.comp_method = CompressionMethod::Deflate;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = PackageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.file_count, 42);
        assert_eq!(decoded.index_offset, 96);
        assert_eq!(decoded.data_offset, 4096);
        assert_eq!(decoded.enc_method, EncryptionMethod::Aes256Gcm);
        assert_eq!(decoded.comp_method, CompressionMethod::Deflate);
        assert!(decoded.is_encrypted());
        assert!(decoded.is_compressed());
    }

    #[test]
    fn test_reserved_region_is_zero() {
        let bytes = PackageHeader::new().to_bytes();
        assert!(bytes[30..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = PackageHeader::new().to_bytes();
        bytes[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            PackageHeader::from_bytes(&bytes),
            Err(PackageError::InvalidMagic)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = PackageHeader::new().to_bytes();
        bytes[4..6].copy_from_slice(&99u16.to_le_bytes());
        assert!(matches!(
            PackageHeader::from_bytes(&bytes),
            Err(PackageError::UnsupportedVersion { version: 99 })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = PackageHeader::new().to_bytes();
        assert!(matches!(
            PackageHeader::from_bytes(&bytes[..HEADER_SIZE - 1]),
            Err(PackageError::TruncatedHeader { .. })
        ));
    }

    #[test]
    fn test_unknown_method_ids() {
        let mut bytes = PackageHeader::new().to_bytes();
        bytes[28] = 7;
        assert!(matches!(
            PackageHeader::from_bytes(&bytes),
            Err(PackageError::UnknownEncryptionMethod(7))
        ));

        let mut bytes = PackageHeader::new().to_bytes();
        bytes[29] = 7;
        assert!(matches!(
            PackageHeader::from_bytes(&bytes),
            Err(PackageError::UnknownCompressionMethod(7))
        ));
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = FileEntry {
            name: "assets/sprites/hero.png".to_string(),
            offset: 1024,
            size: 512,
            orig_size: 2048,
            hash: [0xAB; HASH_SIZE],
            entry_flags: 0,
        };

        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), entry.encoded_len());

        let (decoded, consumed) = FileEntry::decode(&buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.name, "assets/sprites/hero.png");
        assert_eq!(decoded.offset, 1024);
        assert_eq!(decoded.size, 512);
        assert_eq!(decoded.orig_size, 2048);
        assert_eq!(decoded.hash, [0xAB; HASH_SIZE]);
    }

    #[test]
    fn test_entry_decode_loop() {
        let mut buf = Vec::new();
        for (i, name) in ["a.txt", "dir/b.bin", "c"].iter().enumerate() {
            let entry = FileEntry {
                name: name.to_string(),
                offset: i as u64 * 100,
                size: 10,
                orig_size: 10,
                hash: [i as u8; HASH_SIZE],
                entry_flags: 0,
            };
            entry.encode(&mut buf).unwrap();
        }

        let mut offset = 0;
        let mut names = Vec::new();
        for _ in 0..3 {
            let (entry, consumed) = FileEntry::decode(&buf, offset).unwrap();
            names.push(entry.name);
            offset += consumed;
        }
        assert_eq!(offset, buf.len());
        assert_eq!(names, vec!["a.txt", "dir/b.bin", "c"]);
    }

    #[test]
    fn test_entry_truncated() {
        let entry = FileEntry {
            name: "a.txt".to_string(),
            offset: 0,
            size: 1,
            orig_size: 1,
            hash: [0; HASH_SIZE],
            entry_flags: 0,
        };
        let mut buf = Vec::new();
        entry.encode(&mut buf).unwrap();

        assert!(matches!(
            FileEntry::decode(&buf[..buf.len() - 1], 0),
            Err(PackageError::InvalidIndex(_))
        ));
        assert!(matches!(
            FileEntry::decode(&buf, buf.len()),
            Err(PackageError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_entry_name_not_utf8() {
        let mut buf = Vec::new();
        let entry = FileEntry {
            name: "ab".to_string(),
            offset: 0,
            size: 0,
            orig_size: 0,
            hash: [0; HASH_SIZE],
            entry_flags: 0,
        };
        entry.encode(&mut buf).unwrap();
        buf[2] = 0xFF;
        buf[3] = 0xFE;

        assert!(matches!(
            FileEntry::decode(&buf, 0),
            Err(PackageError::InvalidIndex(_))
        ));
    }
}
