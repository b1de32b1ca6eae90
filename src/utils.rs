/**
 * Helpers for trace logs
 */

/**
 * Hex dump of a buffer with the bytes separated by commas, e.g. `01,ab,ff`.
 */
pub(crate) fn hex_encode_delimited(buffer: &[u8]) -> String {
    let mut out = String::with_capacity(buffer.len() * 3);
    for (i, byte) in buffer.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&hex::encode([*byte]));
    }
    out
}
