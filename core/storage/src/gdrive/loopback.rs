//! Loopback redirect receiver for the installed-application OAuth2 flow.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;
use url::Url;

use driveup_common::{Error, Result};

/// Longest request line read from a redirect connection.
const MAX_REQUEST_LINE: u64 = 8192;

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
<p>You may close this window and return to the terminal.</p></body></html>";

const FAILURE_PAGE: &str = "<html><body><h3>Authorization failed.</h3>\
<p>Check the terminal for details.</p></body></html>";

/// What a single request to the redirect URL carried.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    /// Authorization granted with this code.
    Code(String),
    /// Authorization denied or failed.
    Denied(String),
    /// Unrelated request (e.g. favicon).
    Ignored,
}

/// Parse the request line of a redirect such as
/// `GET /?state=xyz&code=4/abc HTTP/1.1`.
fn parse_request_line(line: &str, expected_state: &str) -> Result<Callback> {
    let target = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::InvalidInput(format!("Malformed redirect request: {}", line.trim())))?;

    let url = Url::parse(&format!("http://127.0.0.1{}", target))
        .map_err(|e| Error::InvalidInput(format!("Malformed redirect target: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Ok(Callback::Denied(error));
    }

    let Some(code) = code else {
        return Ok(Callback::Ignored);
    };

    if state.as_deref() != Some(expected_state) {
        return Err(Error::Authentication(
            "OAuth2 state mismatch in redirect".to_string(),
        ));
    }

    Ok(Callback::Code(code))
}

/// A listener on `127.0.0.1` that receives the OAuth2 redirect.
pub struct LoopbackReceiver {
    listener: TcpListener,
    redirect_url: String,
}

impl LoopbackReceiver {
    /// Bind an ephemeral port on the loopback interface.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            listener,
            redirect_url: format!("http://127.0.0.1:{}/", port),
        })
    }

    /// Redirect URL to register with the authorization request.
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Serve requests until one carries the authorization result.
    ///
    /// Connections that fail or carry unrelated requests are skipped.
    ///
    /// # Errors
    /// - `Authentication` if the user denied access or the state does not match
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("Redirect connection from {}", peer);

            match handle_connection(stream, expected_state).await {
                Ok(Some(code)) => return Ok(code),
                Ok(None) => continue,
                Err(Error::Io(e)) => {
                    debug!("Redirect connection from {} failed: {}", peer, e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Answer one redirect request; `None` when it carried no result.
async fn handle_connection(stream: TcpStream, expected_state: &str) -> Result<Option<String>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader).take(MAX_REQUEST_LINE);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let callback = parse_request_line(&request_line, expected_state);

    let (status, page) = match &callback {
        Ok(Callback::Code(_)) => ("200 OK", SUCCESS_PAGE),
        Ok(Callback::Ignored) => ("404 Not Found", ""),
        Ok(Callback::Denied(_)) | Err(_) => ("400 Bad Request", FAILURE_PAGE),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        page.len(),
        page
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;

    match callback {
        Ok(Callback::Code(code)) => Ok(Some(code)),
        Ok(Callback::Denied(reason)) => Err(Error::Authentication(format!(
            "Authorization denied: {}",
            reason
        ))),
        Ok(Callback::Ignored) => Ok(None),
        Err(Error::InvalidInput(e)) => {
            debug!("Ignoring malformed redirect request: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
