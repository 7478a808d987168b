//! Inter-process communication with the notebook frontend.
//!
//! The frontend launches the kernel and talks to it over the kernel's
//! stdin/stdout using the line protocol in [`protocol`].

pub mod protocol;

pub use protocol::{
    DisplayData, ErrorCode, Method, Reply, Request, Response, decode_request, read_line,
    write_message,
};
