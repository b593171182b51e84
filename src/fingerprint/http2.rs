//! HTTP/2 connection settings (SETTINGS frame and flow-control windows).

use std::time::Duration;

use hyper::client::conn::http2;

/// HTTP/2 settings applied to the hyper client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    pub initial_stream_window_size: u32,
    pub initial_connection_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    /// How long to wait for the connection task to wind down once the
    /// response body has been read.
    pub shutdown_grace: Duration,
}

impl Default for Http2Settings {
    fn default() -> Self {
        // Chrome defaults
        Self {
            initial_stream_window_size: 6291456,
            initial_connection_window_size: 15728640,
            max_frame_size: 16384,
            max_header_list_size: 262144,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl Http2Settings {
    pub(crate) fn apply<E: Clone>(&self, builder: &mut http2::Builder<E>) {
        builder
            .adaptive_window(false)
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_frame_size(self.max_frame_size)
            .max_header_list_size(self.max_header_list_size);
    }
}
