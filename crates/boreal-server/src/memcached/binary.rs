//! Binary memcached protocol: fixed-header framing and the per-connection
//! loop.
//!
//! Requests and responses share a 24-byte network-order header followed by
//! extras, key and value. Unknown opcodes answer an error response and
//! keep the connection; malformed frames close it.

use crate::app::App;
use crate::memcached::with_deadline;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub(crate) const MAGIC_REQUEST: u8 = 0x80;
const MAGIC_RESPONSE: u8 = 0x81;
const HEADER_SIZE: usize = 24;

const OPCODE_GET: u8 = 0x00;
const OPCODE_VERSION: u8 = 0x0b;
const OPCODE_STAT: u8 = 0x10;

const STATUS_OK: u16 = 0x0000;
const STATUS_INTERNAL_ERROR: u16 = 0x0084;

/// Four zero flag bytes carried as extras on every Get response.
const GET_RESPONSE_EXTRAS: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Bodies larger than this are rejected before allocation.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
struct Request {
    opcode: u8,
    opaque: [u8; 4],
    key: Vec<u8>,
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
    loop {
        let request = match with_deadline(app, shutdown, read_request(reader)).await? {
            Some(request) => request,
            None => return Ok(()),
        };

        let mut out = Vec::new();
        match request.opcode {
            OPCODE_GET => {
                app.record_get_command();
                trace!(key = %String::from_utf8_lossy(&request.key), "binary get");
                match app.next_id() {
                    Ok(id) => {
                        let value = id.to_string();
                        Response {
                            opcode: OPCODE_GET,
                            status: STATUS_OK,
                            opaque: request.opaque,
                            extras: &GET_RESPONSE_EXTRAS,
                            key: &[],
                            value: value.as_bytes(),
                        }
                        .encode_into(&mut out);
                    }
                    Err(err) => {
                        warn!(error = %err, "id generation failed");
                        Response {
                            opcode: OPCODE_GET,
                            status: STATUS_INTERNAL_ERROR,
                            opaque: request.opaque,
                            extras: &[],
                            key: &[],
                            value: &[],
                        }
                        .encode_into(&mut out);
                    }
                }
            }
            OPCODE_VERSION => {
                Response {
                    opcode: OPCODE_VERSION,
                    status: STATUS_OK,
                    opaque: request.opaque,
                    extras: &[],
                    key: &[],
                    value: crate::VERSION.as_bytes(),
                }
                .encode_into(&mut out);
            }
            OPCODE_STAT => {
                for (name, value) in app.stats().pairs() {
                    Response {
                        opcode: OPCODE_STAT,
                        status: STATUS_OK,
                        opaque: request.opaque,
                        extras: &[],
                        key: name.as_bytes(),
                        value: value.as_bytes(),
                    }
                    .encode_into(&mut out);
                }
                // An empty key and value terminate the sequence.
                Response {
                    opcode: OPCODE_STAT,
                    status: STATUS_OK,
                    opaque: request.opaque,
                    extras: &[],
                    key: &[],
                    value: &[],
                }
                .encode_into(&mut out);
            }
            opcode => {
                warn!("unknown binary command: {opcode:#04x}");
                Response {
                    opcode: OPCODE_GET,
                    status: STATUS_INTERNAL_ERROR,
                    opaque: [0x00; 4],
                    extras: &[],
                    key: &[],
                    value: &[],
                }
                .encode_into(&mut out);
            }
        }
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
}

/// Reads one framed request. Returns `None` on a clean end of stream
/// (no bytes before the header, or the defensive all-zero magic).
async fn read_request<R>(reader: &mut BufReader<R>) -> io::Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    if !read_full(reader, &mut header).await? {
        return Ok(None);
    }

    let magic = header[0];
    if magic == 0x00 {
        return Ok(None);
    }
    if magic != MAGIC_REQUEST {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid request magic: {magic:#04x}"),
        ));
    }

    let opcode = header[1];
    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let mut opaque = [0u8; 4];
    opaque.copy_from_slice(&header[12..16]);

    // Length consistency must hold before any body access.
    if body_len < key_len + extras_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("total body {body_len} is too small: key length {key_len}, extras length {extras_len}"),
        ));
    }
    if body_len > MAX_BODY_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("total body {body_len} exceeds the {MAX_BODY_BYTES} byte limit"),
        ));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    let key = body[extras_len..extras_len + key_len].to_vec();

    Ok(Some(Request { opcode, opaque, key }))
}

/// Reads exactly `buf.len()` bytes. Returns `false` on end of stream
/// before the first byte; end of stream mid-buffer is an error.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("request header is shorter than {} bytes", buf.len()),
            ));
        }
        filled += n;
    }
    Ok(true)
}

struct Response<'a> {
    opcode: u8,
    status: u16,
    opaque: [u8; 4],
    extras: &'a [u8],
    key: &'a [u8],
    value: &'a [u8],
}

impl Response<'_> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        let body_len = self.extras.len() + self.key.len() + self.value.len();
        out.reserve(HEADER_SIZE + body_len);
        out.push(MAGIC_RESPONSE);
        out.push(self.opcode);
        out.extend_from_slice(&(self.key.len() as u16).to_be_bytes());
        out.push(self.extras.len() as u8);
        out.push(0x00); // data type, reserved
        out.extend_from_slice(&self.status.to_be_bytes());
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&self.opaque);
        out.extend_from_slice(&[0u8; 8]); // CAS
        out.extend_from_slice(self.extras);
        out.extend_from_slice(self.key);
        out.extend_from_slice(self.value);
    }
}
