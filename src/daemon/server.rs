//! TCP Server for the Crane daemon
//!
//! Accepts HTTP/1.1 connections, reads one request per connection and
//! answers with the API handler's JSON response, then closes the
//! connection. Bodies must carry a `Content-Length`; request lines and
//! headers are bounded.

use super::api::{ApiHandler, ApiResponse, Request};
use crate::cluster::ClusterClient;
use crate::error::{CraneError, ErrorKind, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Longest request line or header line accepted, line ending included
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Most header lines accepted in one request
pub const MAX_HEADERS: usize = 100;

/// Crane Daemon - HTTP server for stack management
pub struct CraneDaemon<C: ClusterClient + 'static> {
    addr: String,
    api_handler: ApiHandler<C>,
}

impl<C: ClusterClient + 'static> CraneDaemon<C> {
    pub fn new(addr: &str, api_handler: ApiHandler<C>) -> Self {
        Self {
            addr: addr.to_string(),
            api_handler,
        }
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("Crane daemon listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        continue;
                    }
                },
            };

            debug!("Connection from {}", peer);
            let api_handler = self.api_handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &api_handler).await {
                    error!("Error handling connection: {}", e);
                }
            });
        }

        info!("Crane daemon stopped");
        Ok(())
    }
}

/// Handle a single connection
async fn handle_connection<S, C>(stream: S, api_handler: &ApiHandler<C>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: ClusterClient,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let response = match read_request(&mut reader).await {
        Ok(request) => api_handler.handle_request(&request).await,
        Err(e) => ApiResponse::error(&e),
    };

    write_response(&mut writer, &response).await
}

/// Parse the request line, headers and a `Content-Length` body
async fn read_request<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Request> {
    let bad_request =
        |msg: &str| CraneError::invalid(ErrorKind::InvalidSpec, "request", msg.to_string());

    let request_line = read_line_bounded(reader).await?;
    debug!("Received request: {}", request_line.trim());

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(bad_request("malformed request line"));
    }
    let mut request = Request::new(parts[0], parts[1]);

    let mut content_length = 0;
    let mut header_count = 0;
    loop {
        let header_line = read_line_bounded(reader).await?;
        if header_line.trim().is_empty() {
            break;
        }
        header_count += 1;
        if header_count > MAX_HEADERS {
            return Err(bad_request("too many headers"));
        }

        if let Some((name, value)) = header_line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("transfer-encoding") {
                return Err(bad_request(
                    "Transfer-Encoding is not supported, send a Content-Length body",
                ));
            }
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| bad_request("invalid Content-Length"))?;
            }
            request = request.with_header(name, value);
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(bad_request("request body too large"));
    }
    if content_length > 0 {
        let mut buf = vec![0u8; content_length];
        reader.read_exact(&mut buf).await?;
        request.body = String::from_utf8_lossy(&buf).to_string();
    }

    Ok(request)
}

/// Read one line of at most [`MAX_LINE_BYTES`]; empty at end of stream
async fn read_line_bounded<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<String> {
    let mut line = String::new();
    (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_line(&mut line)
        .await?;

    if line.len() > MAX_LINE_BYTES {
        return Err(CraneError::invalid(
            ErrorKind::InvalidSpec,
            "request",
            "request line or header too long",
        ));
    }
    Ok(line)
}

/// Send HTTP response
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &ApiResponse) -> Result<()> {
    let body = response.body.to_string();
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        response.status,
        reason_phrase(response.status),
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}
