/// Reserved first character of every TRON base58 address.
pub const ADDRESS_PREFIX: char = 'T';

/// Total length of a TRON address, prefix included.
pub const ADDRESS_LEN: usize = 34;

/// Check whether `address` looks like a TRC20 (TRON) address.
///
/// Grammar: `T` followed by exactly 33 ASCII alphanumeric characters. No
/// checksum verification is done; malformed input simply returns `false`.
pub fn is_valid(address: &str) -> bool {
    address.len() == ADDRESS_LEN
        && address.starts_with(ADDRESS_PREFIX)
        && address.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Shorten an address for display: first 10 chars, `...`, last 6 chars.
pub fn shorten(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 16 {
        return address.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}...{tail}")
}
