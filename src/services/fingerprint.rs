use sha2::{Digest, Sha256};

use crate::error::MlError;
use crate::services::features::NormalizedTable;

/// Length of the hex content address used to key the artifact set.
pub const FINGERPRINT_LEN: usize = 16;

/// Derive the content address of a training dataset.
///
/// Hashes the owning identity, the item identity, a caller-supplied salt and
/// a deterministic encoding of the feature plus price columns, then keeps the
/// first 16 hex characters. Identical inputs always produce the identical
/// fingerprint; callers pass the training wall-clock time as the salt so that
/// retraining the same data still yields a fresh artifact set.
pub fn fingerprint_dataset(
    owner_id: i64,
    item_id: i64,
    salt: &str,
    table: &NormalizedTable,
) -> Result<String, MlError> {
    let columns = (table.feature_rows(), table.prices());
    let encoded = bincode::serialize(&columns)
        .map_err(|e| MlError::ArtifactIo(format!("failed to encode dataset for hashing: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(owner_id.to_string().as_bytes());
    hasher.update(item_id.to_string().as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(&encoded);

    let digest = hex::encode(hasher.finalize());
    Ok(digest[..FINGERPRINT_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::{PriceTick, normalize_prices};

    fn table() -> NormalizedTable {
        let ticks: Vec<PriceTick> = (1..=5)
            .map(|day| PriceTick {
                time: format!("Jan 0{day} 2024 00:"),
                price: 10.0 + day as f64,
                volume: day as f64,
            })
            .collect();
        normalize_prices(&ticks).unwrap()
    }

    #[test]
    fn is_deterministic_for_identical_inputs() {
        let table = table();
        let a = fingerprint_dataset(7, 101, "20240101_000000", &table).unwrap();
        let b = fingerprint_dataset(7, 101, "20240101_000000", &table).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn has_sixteen_hex_chars() {
        let fp = fingerprint_dataset(7, 101, "salt", &table()).unwrap();
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn differs_across_salts() {
        let table = table();
        let a = fingerprint_dataset(7, 101, "20240101_000000", &table).unwrap();
        let b = fingerprint_dataset(7, 101, "20240101_000001", &table).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn differs_across_owners_and_items() {
        let table = table();
        let base = fingerprint_dataset(7, 101, "salt", &table).unwrap();
        assert_ne!(base, fingerprint_dataset(8, 101, "salt", &table).unwrap());
        assert_ne!(base, fingerprint_dataset(7, 102, "salt", &table).unwrap());
    }
}
