//! Wire schema for the wasimoff broker, version 1.
//!
//! Every frame on a broker connection is an [`Envelope`] carrying either a
//! [`Request`], a [`Response`] or an [`Event`]. The same message structs
//! serve both supported encodings: the Protobuf layout is defined by the
//! `prost` field tags and the JSON layout by the parallel `serde` derives,
//! so a peer can pick either one during subprotocol negotiation without the
//! broker keeping two schemas in sync by hand.
//!
//! ```rust
//! use wasimoff_types::{codec::Encoding, Envelope, Ping};
//!
//! let envelope = Envelope::request(1, wasimoff_types::envelope::request::Body::Ping(Ping {}));
//! let wire = Encoding::Protobuf.encode(&envelope).unwrap();
//! let back = Encoding::Protobuf.decode(&wire).unwrap();
//! assert_eq!(envelope, back);
//! ```

pub mod b64;
pub mod codec;
pub mod envelope;
pub mod event;
pub mod file;
pub mod filesystem;
pub mod task;
pub mod trace;

mod ducktype;

pub use self::ducktype::{TaskKind, TaskRequest, TaskResponse};
pub use self::envelope::{Envelope, Event, Ping, Request, Response};
pub use self::file::File;
