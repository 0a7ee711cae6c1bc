//! Dense vectors are persisted as little-endian f32 blobs.

use crate::error::ClusterError;

pub fn dense_to_blob(dense: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(dense.len() * 4);
    for value in dense {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub fn dense_from_blob(blob: &[u8]) -> Result<Vec<f32>, ClusterError> {
    if blob.len() % 4 != 0 {
        return Err(ClusterError::InvariantViolation(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_dense_vector() {
        let dense = vec![1.0_f32, -0.5, 0.0, 3.25e-3];
        let decoded = dense_from_blob(&dense_to_blob(&dense)).unwrap();
        assert_eq!(decoded, dense);
    }

    #[test]
    fn rejects_truncated_blobs() {
        assert!(dense_from_blob(&[0u8, 1, 2]).is_err());
    }
}
