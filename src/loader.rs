//! Package loading and random-access file decode
//!
//! Opens a built package, parses the header and the full index up front
//! (all-or-nothing; later offsets depend on earlier ones), and then serves
//! random-access reads of individual files: seek, read, decrypt,
//! decompress, SHA-256 verify.
//!
//! The loader takes `&self` everywhere; the read handle sits behind a
//! `Mutex` that is held only for the seek+read pair, so concurrent callers
//! can decode different (or the same) entries against one parsed index.
//! The derived key is immutable after open.

use crate::compression;
#[cfg(feature = "crypto")]
use crate::crypto;
use crate::error::{PackageError, Result};
use crate::header::{FileEntry, PackageHeader, HEADER_SIZE, SALT_SIZE};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Outcome of a batch operation ([`extract_all`](PackageLoader::extract_all)
/// or [`verify`](PackageLoader::verify)): per-entry failures are collected
/// so one bad entry does not block the rest of the archive.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Entries processed successfully, in index order
    pub ok: Vec<String>,

    /// Per-entry failures
    pub failures: Vec<(String, PackageError)>,
}

impl BatchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Read-only view of a built package
pub struct PackageLoader {
    file: Mutex<File>,
    path: PathBuf,
    header: PackageHeader,
    order: Vec<String>,
    entries: HashMap<String, FileEntry>,
    #[cfg(feature = "crypto")]
    key: Option<crypto::EncryptionKey>,
}

impl PackageLoader {
    /// Open a package without a password.
    ///
    /// Encrypted packages still open for listing and metadata inspection;
    /// [`load_file`](Self::load_file) on them fails until the package is
    /// reopened with a password.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Open a package, deriving the decryption key eagerly from `password`
    pub fn open_with_password<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        Self::open_inner(path.as_ref(), Some(password))
    }

    fn open_inner(path: &Path, password: Option<&str>) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PackageError::TruncatedHeader {
                    expected: HEADER_SIZE,
                    actual: file_len as usize,
                }
            } else {
                PackageError::Io(e)
            }
        })?;
        let header = PackageHeader::from_bytes(&header_buf)?;

        let mut salt = [0u8; SALT_SIZE];
        if header.is_encrypted() {
            file.read_exact(&mut salt).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    PackageError::InvalidIndex("truncated key-derivation salt".into())
                } else {
                    PackageError::Io(e)
                }
            })?;
        }

        #[cfg(feature = "crypto")]
        let key = match (header.is_encrypted(), password) {
            (true, Some(pw)) => Some(crypto::derive_key(pw, &salt)),
            (true, None) => None,
            (false, _) => None,
        };
        #[cfg(not(feature = "crypto"))]
        {
            if header.is_encrypted() && password.is_some() {
                return Err(PackageError::CryptoUnavailable);
            }
        }

        let index_start = (HEADER_SIZE + if header.is_encrypted() { SALT_SIZE } else { 0 }) as u64;
        if header.index_offset < index_start
            || header.data_offset < header.index_offset
            || header.data_offset > file_len
        {
            return Err(PackageError::InvalidIndex(format!(
                "inconsistent section offsets: index={}, data={}, file={}",
                header.index_offset, header.data_offset, file_len
            )));
        }

        // Index parsing is all-or-nothing: any corruption fails the open.
        file.seek(SeekFrom::Start(header.index_offset))?;
        let index_len = (header.data_offset - header.index_offset) as usize;
        let mut index_buf = vec![0u8; index_len];
        file.read_exact(&mut index_buf)
            .map_err(|_| PackageError::InvalidIndex("index extends past end of file".into()))?;

        let data_len = file_len - header.data_offset;
        let mut order = Vec::with_capacity(header.file_count as usize);
        let mut entries = HashMap::with_capacity(header.file_count as usize);
        let mut cursor = 0usize;

        for _ in 0..header.file_count {
            let (entry, consumed) = FileEntry::decode(&index_buf, cursor)?;
            cursor += consumed;

            let end = entry.offset.checked_add(entry.size).ok_or_else(|| {
                PackageError::InvalidIndex(format!("entry offset overflow: {}", entry.name))
            })?;
            if end > data_len {
                return Err(PackageError::InvalidIndex(format!(
                    "entry payload outside file: {}",
                    entry.name
                )));
            }

            order.push(entry.name.clone());
            entries.insert(entry.name.clone(), entry);
        }
        if cursor != index_buf.len() {
            return Err(PackageError::InvalidIndex(
                "trailing bytes after last index entry".into(),
            ));
        }

        tracing::debug!(
            path = %path.display(),
            files = order.len(),
            encrypted = header.is_encrypted(),
            compressed = header.is_compressed(),
            "package opened"
        );

        Ok(PackageLoader {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            header,
            order,
            entries,
            #[cfg(feature = "crypto")]
            key,
        })
    }

    /// Filenames in index order
    pub fn list_files(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Index entry metadata for one logical path
    pub fn entry(&self, name: &str) -> Option<&FileEntry> {
        self.entries.get(name)
    }

    pub fn file_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.is_encrypted()
    }

    pub fn is_compressed(&self) -> bool {
        self.header.is_compressed()
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// Load and fully decode one file.
    ///
    /// Decrypts and decompresses as the header flags dictate, then verifies
    /// the SHA-256 content hash against the index entry. A failure here is
    /// scoped to this entry; the parsed index stays usable.
    pub fn load_file(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| PackageError::NotFound(format!("no such entry: {}", name)))?;

        let blob = self.read_payload(entry)?;

        let blob = if self.header.is_encrypted() {
            #[cfg(feature = "crypto")]
            {
                let key = self.key.as_ref().ok_or_else(|| {
                    PackageError::InvalidInput(
                        "package is encrypted; open it with a password".into(),
                    )
                })?;
                crypto::decrypt(&blob, key)?
            }
            #[cfg(not(feature = "crypto"))]
            {
                return Err(PackageError::CryptoUnavailable);
            }
        } else {
            blob
        };

        let plaintext = if self.header.is_compressed() {
            compression::decompress(&blob, entry.orig_size as usize)?
        } else {
            blob
        };

        let mut hasher = Sha256::new();
        hasher.update(&plaintext);
        let got: [u8; 32] = hasher.finalize().into();
        if got != entry.hash {
            return Err(PackageError::Integrity {
                path: name.to_string(),
            });
        }

        Ok(plaintext)
    }

    /// Decode every entry into `output_dir`, preserving relative paths.
    ///
    /// Per-file failures are collected in the report rather than aborting
    /// the extraction. Entries whose name would place the output outside
    /// `output_dir` (parent or absolute components, possible in a crafted
    /// index) are recorded as failures and never written.
    pub fn extract_all<P: AsRef<Path>>(&self, output_dir: P) -> Result<BatchReport> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir)?;

        let mut report = BatchReport::default();
        for name in &self.order {
            if !is_safe_relative(name) {
                report.failures.push((
                    name.clone(),
                    PackageError::InvalidInput(format!(
                        "entry path escapes the output directory: {}",
                        name
                    )),
                ));
                continue;
            }
            match self.load_file(name) {
                Ok(bytes) => {
                    let dest: PathBuf = output_dir.join(name.split('/').collect::<PathBuf>());
                    let outcome = match dest.parent() {
                        Some(parent) => {
                            fs::create_dir_all(parent).and_then(|_| fs::write(&dest, &bytes))
                        }
                        None => fs::write(&dest, &bytes),
                    };
                    match outcome {
                        Ok(()) => report.ok.push(name.clone()),
                        Err(e) => report.failures.push((name.clone(), PackageError::Io(e))),
                    }
                }
                Err(e) => report.failures.push((name.clone(), e)),
            }
        }

        tracing::info!(
            path = %self.path.display(),
            extracted = report.ok.len(),
            failed = report.failures.len(),
            "extraction finished"
        );
        Ok(report)
    }

    /// Decode every entry without writing anything, reporting per-entry
    /// failures.
    pub fn verify(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for name in &self.order {
            match self.load_file(name) {
                Ok(_) => report.ok.push(name.clone()),
                Err(e) => report.failures.push((name.clone(), e)),
            }
        }
        report
    }

    fn read_payload(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.header.data_offset + entry.offset))?;
        let mut buf = vec![0u8; entry.size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// True when `name` stays inside an extraction directory: forward slashes
/// only, every component a plain filename.
fn is_safe_relative(name: &str) -> bool {
    !name.contains('\\')
        && name
            .split('/')
            .all(|comp| !comp.is_empty() && comp != "." && comp != "..")
}
