//! Package construction
//!
//! Collects input files, transforms each one (hash, then optional DEFLATE,
//! then optional AES-256-GCM), and writes the package with a two-pass
//! index: a placeholder index reserves space so the data-section offset is
//! known, the data section is written while recording true relative
//! offsets, and the index and header are then rewritten in place.
//!
//! Builds go to a `.partial` sibling of the output path and are renamed
//! into place only on success, so a failed or cancelled build never leaves
//! a file that could be mistaken for a valid package.

use crate::compression;
#[cfg(feature = "crypto")]
use crate::crypto;
use crate::error::{PackageError, Result};
use crate::header::{
    CompressionMethod, EncryptionMethod, FileEntry, PackageHeader, FLAG_COMPRESSED,
    FLAG_ENCRYPTED, HASH_SIZE, HEADER_SIZE,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Build configuration
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// DEFLATE-compress each file before encryption
    pub compress: bool,

    /// AES-256-GCM encrypt each file; requires `password`
    pub encrypt: bool,

    /// Password for key derivation when `encrypt` is set
    pub password: Option<String>,
}

impl BuildOptions {
    /// Plain package: no compression, no encryption
    pub fn plain() -> Self {
        BuildOptions::default()
    }

    /// Compressed, unencrypted package
    pub fn compressed() -> Self {
        BuildOptions {
            compress: true,
            ..Default::default()
        }
    }

    /// Encrypted package (optionally compressed via the field)
    pub fn encrypted(password: &str) -> Self {
        BuildOptions {
            encrypt: true,
            password: Some(password.to_string()),
            ..Default::default()
        }
    }
}

/// Summary of a completed build
#[derive(Debug, Clone)]
pub struct BuildStats {
    /// Number of files packed
    pub file_count: u32,

    /// Total plaintext bytes across all inputs
    pub original_size: u64,

    /// Final package file size in bytes
    pub package_size: u64,

    /// `package_size / original_size` (0.0 when no input bytes)
    pub compression_ratio: f64,

    pub encrypted: bool,
    pub compressed: bool,
}

enum Source {
    Disk(PathBuf),
    Memory(Vec<u8>),
}

struct Input {
    name: String,
    source: Source,
}

/// Package builder
///
/// Register inputs with [`add_file`](PackageBuilder::add_file),
/// [`add_bytes`](PackageBuilder::add_bytes) or
/// [`add_directory`](PackageBuilder::add_directory), then call
/// [`build`](PackageBuilder::build) once. Entries are written in
/// registration order.
pub struct PackageBuilder {
    options: BuildOptions,
    inputs: Vec<Input>,
    seen: HashSet<String>,
}

impl PackageBuilder {
    pub fn new(options: BuildOptions) -> Self {
        PackageBuilder {
            options,
            inputs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Number of registered inputs
    pub fn file_count(&self) -> usize {
        self.inputs.len()
    }

    fn register(&mut self, name: String, source: Source) -> Result<()> {
        if !self.seen.insert(name.clone()) {
            return Err(PackageError::InvalidInput(format!(
                "duplicate entry registration: {}",
                name
            )));
        }
        self.inputs.push(Input { name, source });
        Ok(())
    }

    /// Register one on-disk file under a logical path.
    ///
    /// Fails with [`PackageError::NotFound`] if the source does not exist.
    pub fn add_file<P: AsRef<Path>>(&mut self, logical: &str, source: P) -> Result<()> {
        let path = source.as_ref();
        if !path.is_file() {
            return Err(PackageError::NotFound(format!(
                "source file does not exist: {}",
                path.display()
            )));
        }
        let name = normalize_logical(logical)?;
        self.register(name, Source::Disk(path.to_path_buf()))
    }

    /// Register an in-memory buffer under a logical path
    pub fn add_bytes(&mut self, logical: &str, bytes: Vec<u8>) -> Result<()> {
        let name = normalize_logical(logical)?;
        self.register(name, Source::Memory(bytes))
    }

    /// Recursively register every file under `root` whose normalized
    /// relative path does not match any exclusion glob.
    pub fn add_directory<P: AsRef<Path>>(&mut self, root: P, excludes: &[String]) -> Result<()> {
        let root = root.as_ref();

        let patterns: Vec<glob::Pattern> = excludes
            .iter()
            .map(|e| {
                glob::Pattern::new(e).map_err(|err| {
                    PackageError::InvalidInput(format!("bad exclusion pattern {:?}: {}", e, err))
                })
            })
            .collect::<Result<_>>()?;

        for ent in WalkDir::new(root).follow_links(false) {
            let ent = ent.map_err(|e| {
                let msg = e.to_string();
                PackageError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, msg)),
                )
            })?;

            if !ent.file_type().is_file() {
                continue;
            }

            let rel = relative_name(root, ent.path())?;
            if patterns.iter().any(|p| p.matches(&rel)) {
                tracing::debug!(path = %rel, "excluded by pattern");
                continue;
            }
            self.register(rel, Source::Disk(ent.path().to_path_buf()))?;
        }

        Ok(())
    }

    /// Build the package at `output`.
    ///
    /// Fails with [`PackageError::InvalidInput`] if no files were registered
    /// or encryption was requested without a password. On failure no file is
    /// left at `output`.
    pub fn build<P: AsRef<Path>>(self, output: P) -> Result<BuildStats> {
        let output = output.as_ref();

        if self.inputs.is_empty() {
            return Err(PackageError::InvalidInput(
                "cannot build a package with zero files".into(),
            ));
        }
        if self.options.encrypt {
            #[cfg(not(feature = "crypto"))]
            {
                return Err(PackageError::CryptoUnavailable);
            }
            #[cfg(feature = "crypto")]
            {
                if self.options.password.is_none() {
                    return Err(PackageError::InvalidInput(
                        "encryption requested without a password".into(),
                    ));
                }
            }
        }

        let partial = partial_path(output);
        tracing::info!(
            output = %output.display(),
            files = self.inputs.len(),
            compress = self.options.compress,
            encrypt = self.options.encrypt,
            "building package"
        );

        match self.write_package(&partial) {
            Ok(stats) => {
                fs::rename(&partial, output)?;
                tracing::info!(
                    package_size = stats.package_size,
                    original_size = stats.original_size,
                    "package built"
                );
                Ok(stats)
            }
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    fn write_package(&self, path: &Path) -> Result<BuildStats> {
        let mut out = File::create(path)?;

        // Pass 1: reserve the header, store the salt, transform the inputs.
        out.write_all(&[0u8; HEADER_SIZE])?;

        #[cfg(feature = "crypto")]
        let key = if self.options.encrypt {
            // password presence was validated in build()
            let password = self.options.password.as_deref().ok_or_else(|| {
                PackageError::InvalidInput("encryption requested without a password".into())
            })?;
            let salt = crypto::generate_salt();
            out.write_all(&salt)?;
            Some(crypto::derive_key(password, &salt))
        } else {
            None
        };

        let mut pending: Vec<(FileEntry, Vec<u8>)> = Vec::with_capacity(self.inputs.len());
        let mut original_size: u64 = 0;

        for input in &self.inputs {
            let plaintext = match &input.source {
                Source::Disk(p) => fs::read(p)?,
                Source::Memory(b) => b.clone(),
            };

            // Hash plaintext first; the stored hash always covers the
            // untransformed content.
            let mut hasher = Sha256::new();
            hasher.update(&plaintext);
            let hash: [u8; HASH_SIZE] = hasher.finalize().into();

            let orig_size = plaintext.len() as u64;
            original_size += orig_size;

            let mut blob = plaintext;
            if self.options.compress {
                blob = compression::compress(&blob)?;
            }
            #[cfg(feature = "crypto")]
            {
                if let Some(key) = &key {
                    blob = crypto::encrypt(&blob, key)?;
                }
            }

            tracing::debug!(
                name = %input.name,
                orig_size,
                stored_size = blob.len() as u64,
                "transformed entry"
            );

            pending.push((
                FileEntry {
                    name: input.name.clone(),
                    offset: 0,
                    size: blob.len() as u64,
                    orig_size,
                    hash,
                    entry_flags: 0,
                },
                blob,
            ));
        }

        // Placeholder index reserves space so the data-section start is known.
        let index_offset = out.stream_position()?;
        let mut index_buf = Vec::new();
        for (entry, _) in &pending {
            entry.encode(&mut index_buf)?;
        }
        out.write_all(&index_buf)?;

        // Data section; record the true relative offset of each payload.
        let data_offset = out.stream_position()?;
        let mut rel: u64 = 0;
        for (entry, blob) in &mut pending {
            out.write_all(blob)?;
            entry.offset = rel;
            rel += blob.len() as u64;
        }
        let package_size = out.stream_position()?;

        // Pass 2: back-patch the index with final offsets. The name bytes
        // are unchanged, so the rewrite is byte-length identical.
        out.seek(SeekFrom::Start(index_offset))?;
        index_buf.clear();
        for (entry, _) in &pending {
            entry.encode(&mut index_buf)?;
        }
        out.write_all(&index_buf)?;

        // Final header with accurate counts and offsets.
        let mut header = PackageHeader::new();
        header.file_count = pending.len() as u32;
        header.index_offset = index_offset;
        header.data_offset = data_offset;
        if self.options.compress {
            header.flags |= FLAG_COMPRESSED;
            header.comp_method = CompressionMethod::Deflate;
        }
        if self.options.encrypt {
            header.flags |= FLAG_ENCRYPTED;
            header.enc_method = EncryptionMethod::Aes256Gcm;
        }

        out.seek(SeekFrom::Start(0))?;
        out.write_all(&header.to_bytes())?;
        out.flush()?;
        out.sync_all()?;

        Ok(BuildStats {
            file_count: pending.len() as u32,
            original_size,
            package_size,
            compression_ratio: if original_size > 0 {
                package_size as f64 / original_size as f64
            } else {
                0.0
            },
            encrypted: self.options.encrypt,
            compressed: self.options.compress,
        })
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// Normalize a caller-supplied logical path: forward slashes, no leading
/// separator, non-empty, and strictly relative (no `.`, `..`, or empty
/// components, so an extracted entry can never land outside its target
/// directory).
fn normalize_logical(logical: &str) -> Result<String> {
    let mut name = logical.replace('\\', "/");
    while name.starts_with('/') {
        name.remove(0);
    }
    if name.is_empty() {
        return Err(PackageError::InvalidInput("empty logical path".into()));
    }
    for comp in name.split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            return Err(PackageError::InvalidInput(format!(
                "logical path must be strictly relative: {:?}",
                logical
            )));
        }
    }
    Ok(name)
}

/// Relative path of `file_path` under `root`, joined with forward slashes
fn relative_name(root: &Path, file_path: &Path) -> Result<String> {
    let rel = file_path.strip_prefix(root).map_err(|_| {
        PackageError::InvalidInput(format!(
            "path is outside the scanned root: {}",
            file_path.display()
        ))
    })?;

    let mut out = String::new();
    for (i, comp) in rel.components().enumerate() {
        if i != 0 {
            out.push('/');
        }
        out.push_str(&comp.as_os_str().to_string_lossy());
    }

    normalize_logical(&out)
}
