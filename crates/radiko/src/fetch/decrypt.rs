use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};

use crate::playlist::{EncryptionMethod, KeyInfo};
use crate::RecordError;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;

/// IV used when the key tag has none: the media sequence number,
/// big-endian, in the low eight bytes.
pub fn sequence_iv(sequence_number: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence_number.to_be_bytes());
    iv
}

pub fn decrypt_segment(
    data: &[u8],
    key_info: &KeyInfo,
    key: &[u8],
    sequence_number: u64,
) -> Result<Bytes, RecordError> {
    if key_info.method != EncryptionMethod::Aes128 {
        return Err(RecordError::DecryptionFailed(format!(
            "unsupported encryption method {:?} for segment {sequence_number}",
            key_info.method
        )));
    }
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(RecordError::DecryptionFailed(format!(
            "segment {sequence_number} ciphertext of {} bytes is not block aligned",
            data.len()
        )));
    }

    let iv = key_info.iv.unwrap_or_else(|| sequence_iv(sequence_number));
    let cipher = Aes128CbcDec::new_from_slices(key, &iv).map_err(|e| {
        RecordError::DecryptionFailed(format!("failed to initialize AES decryptor: {e}"))
    })?;

    let mut buffer = data.to_vec();
    let plain_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| {
            RecordError::DecryptionFailed(format!("segment {sequence_number}: {e}"))
        })?
        .len();
    buffer.truncate(plain_len);
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    pub(crate) fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let mut buffer = vec![0u8; plain.len() + BLOCK_SIZE];
        buffer[..plain.len()].copy_from_slice(plain);
        let len = cbc::Encryptor::<Aes128>::new(key.into(), iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plain.len())
            .unwrap()
            .len();
        buffer.truncate(len);
        buffer
    }

    fn aes_key(iv: Option<[u8; 16]>) -> KeyInfo {
        KeyInfo {
            method: EncryptionMethod::Aes128,
            uri: "https://media.example/key".into(),
            iv,
        }
    }

    const KEY: [u8; 16] = *b"0123456789abcdef";

    #[test]
    fn sequence_number_fills_low_half_of_iv() {
        let iv = sequence_iv(0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(&iv[14..], &[0x01, 0x02]);
    }

    #[test]
    fn decrypts_with_sequence_iv() {
        let cipher = encrypt(b"adts frame payload", &KEY, &sequence_iv(42));
        let plain = decrypt_segment(&cipher, &aes_key(None), &KEY, 42).unwrap();
        assert_eq!(&plain[..], b"adts frame payload");
    }

    #[test]
    fn explicit_iv_wins_over_sequence() {
        let iv = [7u8; 16];
        let cipher = encrypt(b"payload", &KEY, &iv);
        let plain = decrypt_segment(&cipher, &aes_key(Some(iv)), &KEY, 42).unwrap();
        assert_eq!(&plain[..], b"payload");
    }

    #[test]
    fn misaligned_ciphertext_fails() {
        let err = decrypt_segment(&[0u8; 17], &aes_key(None), &KEY, 1).unwrap_err();
        assert!(matches!(err, RecordError::DecryptionFailed(_)));
    }

    #[test]
    fn short_key_and_sample_aes_are_rejected() {
        let cipher = encrypt(b"payload", &KEY, &sequence_iv(3));
        assert!(decrypt_segment(&cipher, &aes_key(None), &KEY[..8], 3).is_err());

        let sample = KeyInfo {
            method: EncryptionMethod::SampleAes,
            ..aes_key(None)
        };
        assert!(matches!(
            decrypt_segment(&cipher, &sample, &KEY, 3),
            Err(RecordError::DecryptionFailed(_))
        ));
    }
}
