//! # confsync codec
//!
//! Content encoding for files stored in the cluster.
//!
//! Every pushed file becomes two values:
//! - a **fingerprint**: lowercase hex SHA-512/224 digest of the raw bytes
//! - a **payload**: the raw bytes in Snappy block format
//!
//! Both halves are a compatibility contract between push and pull
//! installations. The digest algorithm and the compression format must not
//! change without a migration of every stored tree.
//!
//! ## Usage
//!
//! ```
//! use confsync_codec::{decompress, encode};
//!
//! let encoded = encode(b"hello").unwrap();
//! assert_eq!(encoded.fingerprint.as_str().len(), 56);
//! assert_eq!(decompress(&encoded.payload).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod content;
mod error;

pub use content::{compress, decompress, encode, EncodedContent, Fingerprint, FINGERPRINT_HEX_LEN};
pub use error::{CodecError, CodecResult};
