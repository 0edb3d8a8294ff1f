//! Codec module - serialization of structured frame payloads.
//!
//! Only open and error messages carry structured payloads; body chunks and
//! control payloads are written as raw bytes.
//!
//! # Example
//!
//! ```
//! use worker_fetch::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
