//! Font de-obfuscation (IDPF and Adobe algorithms).
//!
//! Both schemes XOR the head of the font file with a key derived from the
//! publication's unique identifier; applying the XOR again restores it.

/// IDPF obfuscates the first 1040 bytes.
pub const IDPF_HEADER_LEN: usize = 1040;
/// Adobe obfuscates the first 1024 bytes.
pub const ADOBE_HEADER_LEN: usize = 1024;

/// SHA-1 of the unique identifier with all XML whitespace removed.
pub fn idpf_key(unique_identifier: &str) -> [u8; 20] {
    let stripped: String = unique_identifier
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();
    sha1_smol::Sha1::from(stripped.as_bytes()).digest().bytes()
}

/// The 16 bytes of a UUID identifier (`urn:uuid:` prefix and dashes ignored).
/// `None` when the identifier is not a UUID.
pub fn adobe_key(unique_identifier: &str) -> Option<[u8; 16]> {
    let hex: String = unique_identifier
        .trim()
        .trim_start_matches("urn:uuid:")
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .collect();
    if hex.len() != 32 {
        return None;
    }
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(key)
}

/// XOR the first `header_len` bytes of `data` with the repeating key.
pub fn deobfuscate(mut data: Vec<u8>, key: &[u8], header_len: usize) -> Vec<u8> {
    if key.is_empty() {
        return data;
    }
    let n = header_len.min(data.len());
    for (i, byte) in data[..n].iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idpf_key_ignores_whitespace() {
        assert_eq!(idpf_key("urn:uuid:abc"), idpf_key(" urn:uuid:abc\n"));
        assert_ne!(idpf_key("urn:uuid:abc"), idpf_key("urn:uuid:abd"));
    }

    #[test]
    fn idpf_key_is_sha1() {
        // SHA-1("abc")
        let expected = [
            0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
            0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
        ];
        assert_eq!(idpf_key("abc"), expected);
    }

    #[test]
    fn adobe_key_from_uuid() {
        let key = adobe_key("urn:uuid:00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[1], 0x11);
        assert_eq!(key[15], 0xff);
        assert!(adobe_key("isbn:9780000000000").is_none());
    }

    #[test]
    fn xor_touches_only_the_header() {
        let original: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let key = idpf_key("urn:uuid:1");
        let obfuscated = deobfuscate(original.clone(), &key, IDPF_HEADER_LEN);
        assert_ne!(obfuscated[..IDPF_HEADER_LEN], original[..IDPF_HEADER_LEN]);
        assert_eq!(obfuscated[IDPF_HEADER_LEN..], original[IDPF_HEADER_LEN..]);
        assert_eq!(deobfuscate(obfuscated, &key, IDPF_HEADER_LEN), original);
    }

    #[test]
    fn short_files_are_handled() {
        let key = [1u8, 2, 3];
        assert_eq!(deobfuscate(vec![0, 0], &key, ADOBE_HEADER_LEN), vec![1, 2]);
    }
}
