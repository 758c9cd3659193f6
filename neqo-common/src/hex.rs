// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt::Write;

/// Formats a byte slice as a lowercase hex string, for log output.
#[must_use]
pub fn hex(buf: impl AsRef<[u8]>) -> String {
    let buf = buf.as_ref();
    let mut s = String::with_capacity(buf.len() * 2);
    for b in buf {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Like [`hex`], but elides the middle of long buffers so trace lines
/// for full packets don't dominate the log.
#[must_use]
pub fn hex_snip_middle(buf: impl AsRef<[u8]>) -> String {
    const KEEP: usize = 20;
    let buf = buf.as_ref();
    if buf.len() <= KEEP * 2 {
        return hex(buf);
    }
    format!(
        "{}..{}",
        hex(&buf[..KEEP]),
        hex(&buf[buf.len() - KEEP..])
    )
}
