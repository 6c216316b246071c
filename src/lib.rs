//! Capsule Package Format
//!
//! An encrypted, compressed package container for distributing a finished
//! project as a single opaque file. Build-once, read-many: a builder writes
//! the package at export time, a loader serves random-access reads of
//! individual files at runtime.
//!
//! ## Features
//!
//! - **Fixed 64-byte header** with magic, version, flags, and section offsets
//! - **Flat filename-keyed index** with per-entry offsets and sizes
//! - **SHA-256 content hashes** over the original plaintext of every file
//! - **Per-file DEFLATE compression** (optional)
//! - **Per-file AES-256-GCM encryption** with PBKDF2 key derivation
//!   (optional, behind the `crypto` feature which is on by default)
//! - **Atomic builds**: output appears only after a successful rename
//!
//! ## On-disk layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Capsule Package File             │
//! ├─────────────────────────────────────────────┤
//! │ Header (64 bytes)                           │
//! │  - Magic: "CAPS", version, flags            │
//! │  - file_count, index_offset, data_offset    │
//! │  - encryption / compression method ids      │
//! ├─────────────────────────────────────────────┤
//! │ Salt (32 bytes, only when encrypted)        │
//! ├─────────────────────────────────────────────┤
//! │ Index: file_count × FileEntry               │
//! │  - name, relative offset, sizes, SHA-256    │
//! ├─────────────────────────────────────────────┤
//! │ Data: concatenated transformed payloads     │
//! │  - each file: [deflate]? then [AES-GCM]?    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Per-file transform order is fixed: hash the plaintext, compress, then
//! encrypt. The stored hash always covers the original content, so the
//! loader can verify integrity after undoing both transforms.
//!
//! ## Example
//!
//! ```rust,no_run
//! use capsule::{BuildOptions, PackageBuilder, PackageLoader};
//!
//! let mut builder = PackageBuilder::new(BuildOptions::encrypted("p@ss"));
//! builder.add_directory("game/dist", &["*.log".to_string()])?;
//! let stats = builder.build("game.caps")?;
//! println!("packed {} files", stats.file_count);
//!
//! let loader = PackageLoader::open_with_password("game.caps", "p@ss")?;
//! for name in loader.list_files() {
//!     let bytes = loader.load_file(&name)?;
//!     println!("{}: {} bytes", name, bytes.len());
//! }
//! # Ok::<(), capsule::PackageError>(())
//! ```

pub mod builder;
pub mod compression;
#[cfg(feature = "crypto")]
pub mod crypto;
pub mod error;
pub mod header;
pub mod loader;

// Re-export commonly used types
pub use builder::{BuildOptions, BuildStats, PackageBuilder};
pub use error::{PackageError, Result};
pub use header::{
    CompressionMethod, EncryptionMethod, FileEntry, PackageHeader, HEADER_SIZE, SALT_SIZE,
};
pub use loader::{BatchReport, PackageLoader};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package format magic number
pub const MAGIC: &[u8; 4] = &header::MAGIC;
