//! Text memcached protocol: request parsing and the per-connection loop.

use crate::app::App;
use crate::memcached::with_deadline;
use std::io;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const ERROR_RESPONSE: &[u8] = b"ERROR\r\n";

/// Request lines longer than this close the connection.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One parsed request line. GET and GETS are folded together; the server
/// treats them identically.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get { keys: Vec<String> },
    Quit,
    Stats,
    Version,
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("empty command line")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            return Err(ParseError::Empty);
        };
        match name.to_ascii_uppercase().as_str() {
            "GET" | "GETS" => Ok(Self::Get {
                keys: fields.map(str::to_owned).collect(),
            }),
            "QUIT" => Ok(Self::Quit),
            "STATS" => Ok(Self::Stats),
            "VERSION" => Ok(Self::Version),
            _ => Err(ParseError::Unknown(name.to_owned())),
        }
    }
}

pub(crate) async fn serve_connection<R, W>(
    app: &App,
    reader: &mut BufReader<R>,
    writer: &mut BufWriter<W>,
    shutdown: &CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = with_deadline(app, shutdown, read_line(reader, &mut line)).await?;
        if n == 0 {
            return Ok(());
        }

        let request = String::from_utf8_lossy(trim_crlf(&line));
        let command = match Command::parse(&request) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "bad request line");
                writer.write_all(ERROR_RESPONSE).await?;
                writer.flush().await?;
                continue;
            }
        };

        match command {
            Command::Get { keys } => {
                app.record_get_command();
                if keys.is_empty() {
                    warn!("GET command without a key");
                    writer.write_all(ERROR_RESPONSE).await?;
                } else {
                    match values_response(app, &keys) {
                        Ok(response) => writer.write_all(&response).await?,
                        Err(err) => {
                            warn!(error = %err, "id generation failed");
                            writer.write_all(ERROR_RESPONSE).await?;
                        }
                    }
                }
            }
            Command::Quit => return Ok(()),
            Command::Stats => writer.write_all(&stats_response(app)).await?,
            Command::Version => {
                writer
                    .write_all(format!("VERSION {}\r\n", crate::VERSION).as_bytes())
                    .await?;
            }
        }
        writer.flush().await?;
    }
}

/// One `VALUE` block per key, terminated by `END`.
fn values_response(app: &App, keys: &[String]) -> boreal::Result<Vec<u8>> {
    let mut response = Vec::with_capacity(keys.len() * 48);
    for key in keys {
        let id = app.next_id()?;
        let value = id.to_string();
        response.extend_from_slice(b"VALUE ");
        response.extend_from_slice(key.as_bytes());
        response.extend_from_slice(format!(" 0 {}\r\n", value.len()).as_bytes());
        response.extend_from_slice(value.as_bytes());
        response.extend_from_slice(b"\r\n");
    }
    response.extend_from_slice(b"END\r\n");
    Ok(response)
}

fn stats_response(app: &App) -> Vec<u8> {
    let mut response = Vec::new();
    for (name, value) in app.stats().pairs() {
        response.extend_from_slice(format!("STAT {name} {value}\r\n").as_bytes());
    }
    response.extend_from_slice(b"END\r\n");
    response
}

async fn read_line<R>(reader: &mut BufReader<R>, line: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    // The cap bounds how much a line missing its `\n` can buffer.
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', line)
        .await?;
    if line.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request line too long",
        ));
    }
    Ok(n)
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
