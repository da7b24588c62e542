use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::RecordError;

/// Cuts the partial key out of the embedded player secret.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    secret: Arc<str>,
}

impl KeyDeriver {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The `length` characters of the secret starting at character `offset`.
    /// An empty or out-of-bounds selection is an [`RecordError::InvalidChallenge`].
    pub fn derive(&self, offset: usize, length: usize) -> Result<&str, RecordError> {
        let secret_len = self.secret.chars().count();
        let invalid = RecordError::InvalidChallenge {
            offset,
            length,
            secret_len,
        };
        let end = match offset.checked_add(length) {
            Some(end) if length > 0 && end <= secret_len => end,
            _ => return Err(invalid),
        };

        let byte_at = |char_idx: usize| {
            self.secret
                .char_indices()
                .nth(char_idx)
                .map_or(self.secret.len(), |(i, _)| i)
        };
        Ok(&self.secret[byte_at(offset)..byte_at(end)])
    }

    /// Partial key in the form the upstream expects in `X-Radiko-Partialkey`.
    pub fn derive_encoded(&self, offset: usize, length: usize) -> Result<String, RecordError> {
        self.derive(offset, length)
            .map(|partial| STANDARD.encode(partial.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_AUTH_KEY;

    #[test]
    fn every_in_bounds_selection_is_the_substring() {
        let deriver = KeyDeriver::new(DEFAULT_AUTH_KEY);
        let len = DEFAULT_AUTH_KEY.len();
        for offset in 0..len {
            for length in 1..=(len - offset) {
                assert_eq!(
                    deriver.derive(offset, length).unwrap(),
                    &DEFAULT_AUTH_KEY[offset..offset + length]
                );
            }
        }
    }

    #[test]
    fn out_of_bounds_is_invalid_challenge() {
        let deriver = KeyDeriver::new(DEFAULT_AUTH_KEY);
        let len = DEFAULT_AUTH_KEY.len();
        for (offset, length) in [(len, 1), (0, len + 1), (len - 1, 2), (usize::MAX, 2), (3, 0)] {
            assert!(
                matches!(
                    deriver.derive(offset, length),
                    Err(RecordError::InvalidChallenge { secret_len, .. }) if secret_len == len
                ),
                "offset {offset} length {length} should be rejected"
            );
        }
    }

    #[test]
    fn counts_characters_not_bytes() {
        let deriver = KeyDeriver::new("αβγδ");
        assert_eq!(deriver.derive(1, 2).unwrap(), "βγ");
        assert_eq!(deriver.derive(3, 1).unwrap(), "δ");
        assert!(deriver.derive(3, 2).is_err());
    }

    #[test]
    fn encoded_partial_key_is_base64() {
        let deriver = KeyDeriver::new(DEFAULT_AUTH_KEY);
        assert_eq!(deriver.derive_encoded(0, 4).unwrap(), "YmNkMQ==");
        // Same challenge, same answer.
        assert_eq!(
            deriver.derive_encoded(7, 16).unwrap(),
            deriver.derive_encoded(7, 16).unwrap()
        );
    }
}
