//! Human-readable rendering of binary call arguments for trace output.
//!
//! Binary buffers passed to appliance calls can be very large, so the trace
//! output shows a bounded, quoted prefix only. This is never used for wire
//! encoding.

use std::fmt::Write as _;
use std::io::{self, Write};

use guestkit_shared::constants::TRACE_BUFFER_LIMIT;

/// Write `buf` as a quoted string to `out`.
///
/// Printable ASCII is written as-is; every other byte is written as a
/// `\xNN` escape. Only the first 256 bytes are shown; a longer buffer is
/// followed by `<truncated, original size N bytes>`.
pub fn write_buffer_in<W: Write>(out: &mut W, buf: &[u8]) -> io::Result<()> {
    out.write_all(render_buffer_in(buf).as_bytes())
}

/// String form of [`write_buffer_in`].
pub fn render_buffer_in(buf: &[u8]) -> String {
    let shown = &buf[..buf.len().min(TRACE_BUFFER_LIMIT)];

    let mut rendered = String::with_capacity(shown.len() + 2);
    rendered.push('"');
    for &byte in shown {
        if is_print(byte) {
            rendered.push(byte as char);
        } else {
            let _ = write!(rendered, "\\x{:02x}", byte);
        }
    }
    rendered.push('"');

    if buf.len() > shown.len() {
        let _ = write!(
            rendered,
            "<truncated, original size {} bytes>",
            buf.len()
        );
    }
    rendered
}

/// Printable in the C locale: space through tilde.
fn is_print(byte: u8) -> bool {
    (0x20..=0x7e).contains(&byte)
}
