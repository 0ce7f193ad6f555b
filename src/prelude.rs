pub use crate::config::{AppConfig, RouteConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::http::*;

pub use crate::*;
pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use weblog::{debug, error, info, trace, warn};
pub use std::collections::HashMap;
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::os::unix::fs::MetadataExt;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::Instant;
pub use std::time::Duration;

pub use std::{
    fmt::{self, Display},
    io,
    net::Shutdown,
    os::{
        fd::{FromRawFd, IntoRawFd},
        unix::net::UnixStream,
    },
    process::{Command, Stdio},
    str::FromStr,
    time::SystemTime,
};

pub use mio::*;

pub use crate::{
    cgi::{build_cgi_env, cleanup_cgi, force_cgi_timeout, handle_cgi_event, mark_cgi_reaped},
    config::validate_configs,
    http::HttpResponse,
    router::RoutingError,
    server::Server,
    upload::{Upload, UploadState},
};

pub use crate::http::{
    handle_delete, handle_error, handle_get, execute_active_action, find_subsequence,
    generate_autoindex, get_ext_from_content_type, get_mime_type, parse_part_headers, ActiveAction,
    HttpConnection, HttpRequest, Method, ParseError, ParsingState, PartInfo,
};

pub const READ_BUF_SIZE: usize = 4096;
// 2xx Success
pub const HTTP_OK: u16 = 200;
// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_HEADERS_TOO_LARGE: u16 = 431;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const GATEWAY_TIMEOUT: u16 = 504;

pub const HTTP_FOUND: u16 = 302;
pub const HTTP_CREATED: u16 = 201;

pub const _1MB: usize = 1_024 * 1024;
pub const MAX_READ_DATA: usize = u16::MAX as usize; // 64KB

/// Hard ceiling on the request line, independent of any configured cap.
pub const MAX_REQUEST_LINE: usize = 8 * 1024;
/// Hard ceiling on the accumulated header section.
pub const MAX_HEADER_SECTION: usize = 32 * 1024;

/// Idle client connections are dropped after this long with no activity.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default CGI wall-clock timeout (spec.md 4.H): a child running longer than
/// this is killed and the client gets a 504.
pub const TIMEOUT_CGI: u64 = 30;
