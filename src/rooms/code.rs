//! Invite/join code generation shared by rooms and tournaments

use rand::Rng;

use crate::error::{CoreError, CoreResult};

pub const CODE_LEN: usize = 5;

/// No 0/O or 1/I so codes survive being read aloud
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draw codes until `taken` rejects none of them
pub fn unique_code<F>(taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut rng = rand::thread_rng();
    loop {
        let code = random_code(&mut rng);
        if !taken(&code) {
            return code;
        }
    }
}

/// Trim, uppercase and length-check a user supplied code
pub fn normalize_code(code: &str) -> CoreResult<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.chars().count() != CODE_LEN {
        return Err(CoreError::validation(format!(
            "Join code must be {} characters",
            CODE_LEN
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_codes_use_alphabet() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let code = random_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_unique_code_rejects_taken() {
        let first = unique_code(|_| false);
        let second = unique_code(|c| c == first);
        assert_ne!(first, second);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" ab3cd ").unwrap(), "AB3CD");
        assert!(matches!(normalize_code("abc"), Err(CoreError::Validation(_))));
        assert!(normalize_code("ABCDEF").is_err());
    }
}
