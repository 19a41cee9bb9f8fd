//! # logdex-store
//!
//! Framed binary key/value stores used to persist logdex index metadata.
//!
//! This crate provides:
//!
//! - [`BinaryCodec`]: big-endian encoding for integers, strings, lists, sets
//!   and [`TimeRange`] records
//! - [`PersistentMap`]: a key/value map saved as one length-prefixed frame
//! - [`PersistentBiMap`]: a bidirectional map with dense key allocation
//! - [`DenseKey`]: key types that can be allocated from a zero-based index
//!
//! ## Example
//!
//! ```rust
//! use logdex_store::PersistentBiMap;
//!
//! let mut modules: PersistentBiMap<i32, String> = PersistentBiMap::new();
//! let core = modules.add_if_absent("core".to_string()).unwrap();
//! let net = modules.add_if_absent("net".to_string()).unwrap();
//! assert_eq!((core, net), (0, 1));
//! assert_eq!(modules.add_if_absent("core".to_string()).unwrap(), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bimap;
pub mod codec;
pub mod error;
pub mod frame;
pub mod map;

pub use bimap::{DenseKey, PersistentBiMap};
pub use codec::{BinaryCodec, TimeRange};
pub use error::{Result, StoreError};
pub use frame::write_file_atomically;
pub use map::PersistentMap;
