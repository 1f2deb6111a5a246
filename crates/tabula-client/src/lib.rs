//! # tabula-client: multiplexed, tablet-aware request dispatch
//!
//! Each [`Connection`] carries up to 32 767 concurrent requests, told
//! apart by the stream id in the frame header. Ids come from a lock-free
//! bitmap ([`StreamIdSet`]); a reader thread per connection hands each
//! response to the caller blocked on that id.
//!
//! ```text
//!   caller ──Statement──▶ Dispatcher ──route──▶ Connection ──frame──▶ node
//!                             │                     ▲
//!                  TabletDirectory          reader thread ◀── responses
//!                             ▲                     │
//!                             └──── events ─────────┘ ──▶ debounced refresh
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tabula_client::{ClientConfig, Dispatcher, Statement};
//! use tabula_codec::CqlType;
//! use tabula_types::HostId;
//! use uuid::Uuid;
//!
//! # fn main() -> Result<(), tabula_client::ClientError> {
//! let dispatcher = Dispatcher::new(ClientConfig::default())?;
//! dispatcher.connect(HostId::new(Uuid::nil()), "127.0.0.1:9042".parse().unwrap())?;
//!
//! let statement = Statement::query("SELECT name FROM ks.users WHERE id = ?")
//!     .with_table("ks", "users")
//!     .bind_key(&dispatcher.type_info(CqlType::Int), &42i32)?;
//! let response = dispatcher.execute(&statement)?;
//! if let Some(rows) = response.rows() {
//!     let mut name = String::new();
//!     rows.get(0, 0, &mut name)?;
//! }
//! # Ok(())
//! # }
//! ```

mod body;
mod buffer_pool;
mod config;
mod connection;
mod debounce;
mod dispatcher;
mod error;
mod event;
mod frame;
mod request;
mod result;
mod stream;

pub use buffer_pool::FrameBufferPool;
pub use config::ClientConfig;
pub use connection::{Connection, Transport};
pub use debounce::SingleFlightDebouncer;
pub use dispatcher::Dispatcher;
pub use error::{ClientError, ClientResult};
pub use event::{EVENT_TYPES, Event, SchemaChange};
pub use frame::{
    EVENT_STREAM, FRAME_HEADER_SIZE, Frame, FrameFlags, FrameHeader, MAX_BODY_SIZE, Opcode,
};
pub use request::Statement;
pub use result::{ColumnSpec, Prepared, QueryResult, Response, Rows, RowsMetadata};
pub use stream::{MAX_STREAMS, StreamIdSet};

#[cfg(test)]
mod tests;
