use anyhow::{anyhow, Result};

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Draw `len` characters uniformly from `alphabet` using the OS RNG (rejection sampling).
fn random_from(alphabet: &[u8], len: usize) -> Result<String> {
    debug_assert!(!alphabet.is_empty() && alphabet.len() <= 256);
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        getrandom::getrandom(&mut buf).map_err(|e| anyhow!("os rng unavailable: {e}"))?;
        for b in buf {
            if (b as usize) < limit {
                out.push(alphabet[b as usize % alphabet.len()] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// Password safe to pass through shells, SQL literals and `.env` files unquoted.
pub fn generate_password(len: usize) -> Result<String> {
    random_from(PASSWORD_ALPHABET, len)
}

/// Short lowercase id for sentinel file names and tokens.
pub fn random_token(len: usize) -> Result<String> {
    random_from(TOKEN_ALPHABET, len)
}

/// Stable 64-bit FNV-1a digest as 16 hex chars; identical across runs and hosts.
pub fn stable_hash_hex(s: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let h = s
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    format!("{h:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_length_and_alphabet() {
        let p = generate_password(24).unwrap();
        assert_eq!(p.len(), 24);
        assert!(p.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_tokens_differ() {
        let a = random_token(16).unwrap();
        let b = random_token(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_stable_hash_is_fnv1a() {
        assert_eq!(stable_hash_hex(""), "cbf29ce484222325");
        assert_eq!(stable_hash_hex("a"), "af63dc4c8601ec8c");
        assert_ne!(stable_hash_hex("a.example.com"), stable_hash_hex("a.example.org"));
    }
}
