//! Request correlation ids: 128-bit values rendered as 32 lowercase hex
//! characters, minted by the server at ingress.

use rand::RngCore;

pub const HEADER_NAME: &str = "x-inlets-id";

pub fn mint() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub fn is_well_formed(id: &str) -> bool {
    id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_well_formed() {
        for _ in 0..100 {
            let id = mint();
            assert!(is_well_formed(&id), "not well formed: {id}");
        }
    }

    #[test]
    fn minted_ids_are_unique_in_practice() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(mint()), "collision in 10k draws");
        }
    }
}
